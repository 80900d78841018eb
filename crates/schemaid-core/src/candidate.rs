//! Candidate model: what the schema parser hands over for reconciliation.
//! Identifiers are never set here; only uid annotations are.

use serde::{Deserialize, Serialize};

use crate::iduid::Uid;
use crate::types::{IndexKind, PropertyFlags, PropertyType};

/// An explicit uid annotation on a candidate element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UidRequest {
    /// Empty annotation: the user wants to see the current uid (or a fresh
    /// one) before deciding between a rename and a reset.
    Pending,
    /// Use exactly this uid. Keeps the matched element if it already has it,
    /// otherwise replaces the element with a new one carrying this uid.
    Assign(Uid),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateModel {
    /// Where the candidates were parsed from, for reporting.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub entities: Vec<CandidateEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntity {
    pub name: String,
    /// Bind to the existing entity with this uid (used for renames).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_request: Option<UidRequest>,
    #[serde(default)]
    pub properties: Vec<CandidateProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<CandidateRelation>,
}

/// Requested index on a candidate property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateIndex {
    #[serde(default)]
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProperty {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub flags: PropertyFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<CandidateIndex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_request: Option<UidRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRelation {
    pub name: String,
    /// Target entity name.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_request: Option<UidRequest>,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

impl CandidateModel {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: CandidateEntity) -> Self {
        self.entities.push(entity);
        self
    }
}

impl CandidateEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
            uid_request: None,
            properties: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_uid_request(mut self, request: UidRequest) -> Self {
        self.uid_request = Some(request);
        self
    }

    pub fn with_property(mut self, property: CandidateProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_relation(mut self, relation: CandidateRelation) -> Self {
        self.relations.push(relation);
        self
    }
}

impl CandidateProperty {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            flags: PropertyFlags::empty(),
            index: None,
            relation_target: None,
            uid: None,
            uid_request: None,
        }
    }

    /// A `long` property flagged as the object id.
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Long).with_flags(PropertyFlags::ID)
    }

    /// A to-one relation property pointing at `target`.
    pub fn relation(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut property = Self::new(name, PropertyType::Relation);
        property.relation_target = Some(target.into());
        property
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_index(mut self, kind: IndexKind) -> Self {
        self.index.get_or_insert_with(CandidateIndex::default).kind = kind;
        self
    }

    pub fn unique(mut self) -> Self {
        self.index.get_or_insert_with(CandidateIndex::default).unique = true;
        self
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_uid_request(mut self, request: UidRequest) -> Self {
        self.uid_request = Some(request);
        self
    }

    /// Flags to store: index bits are dropped (they come from the index),
    /// relation properties skip zero in their index.
    pub fn resolved_flags(&self) -> PropertyFlags {
        let mut flags = self.flags - PropertyFlags::INDEX_BITS;
        if self.property_type == PropertyType::Relation && self.index.is_none() {
            flags |= PropertyFlags::INDEX_PARTIAL_SKIP_ZERO;
        }
        flags
    }

    /// Index to store, if any. Relation properties always get a value index.
    pub fn resolved_index(&self) -> Option<CandidateIndex> {
        match self.index {
            Some(index) => Some(index),
            None if self.property_type == PropertyType::Relation => Some(CandidateIndex {
                kind: IndexKind::Value,
                unique: false,
            }),
            None => None,
        }
    }
}

impl CandidateRelation {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            uid: None,
            uid_request: None,
        }
    }

    pub fn with_uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }
}
