use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::catalogs::names_match;
use crate::error::ModelError;
use crate::iduid::{IdUid, Uid};

// ---------------------------------------------------------------------------
// Property type
// ---------------------------------------------------------------------------

/// Semantic type of a stored property. Persisted as the engine's numeric code,
/// spelled out in camelCase in candidate files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Milliseconds since epoch; a refinement of `Long`.
    Date,
    /// Id of a related entity's object (to-one relation).
    Relation,
    DateNano,
    ByteVector,
    StringVector,
}

/// Physical representation class; changing it on a stored property changes
/// how existing data must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Boolean,
    Integer,
    Float,
    String,
    Bytes,
    StringList,
}

impl PropertyType {
    pub const fn code(self) -> u16 {
        match self {
            Self::Bool => 1,
            Self::Byte => 2,
            Self::Short => 3,
            Self::Char => 4,
            Self::Int => 5,
            Self::Long => 6,
            Self::Float => 7,
            Self::Double => 8,
            Self::String => 9,
            Self::Date => 10,
            Self::Relation => 11,
            Self::DateNano => 12,
            Self::ByteVector => 23,
            Self::StringVector => 30,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Char,
            5 => Self::Int,
            6 => Self::Long,
            7 => Self::Float,
            8 => Self::Double,
            9 => Self::String,
            10 => Self::Date,
            11 => Self::Relation,
            12 => Self::DateNano,
            23 => Self::ByteVector,
            30 => Self::StringVector,
            _ => return None,
        })
    }

    pub const fn storage_class(self) -> StorageClass {
        match self {
            Self::Bool => StorageClass::Boolean,
            Self::Byte
            | Self::Short
            | Self::Char
            | Self::Int
            | Self::Long
            | Self::Date
            | Self::Relation
            | Self::DateNano => StorageClass::Integer,
            Self::Float | Self::Double => StorageClass::Float,
            Self::String => StorageClass::String,
            Self::ByteVector => StorageClass::Bytes,
            Self::StringVector => StorageClass::StringList,
        }
    }

    /// Only a 64-bit integer can hold object ids.
    pub const fn can_be_id(self) -> bool {
        matches!(self, Self::Long)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Char => "char",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Date => "date",
            Self::Relation => "relation",
            Self::DateNano => "dateNano",
            Self::ByteVector => "byteVector",
            Self::StringVector => "stringVector",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Property flag bits as understood by the database engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PropertyFlags: u32 {
        const ID = 1;
        const NON_PRIMITIVE_TYPE = 1 << 1;
        const NOT_NULL = 1 << 2;
        const INDEXED = 1 << 3;
        const RESERVED = 1 << 4;
        const UNIQUE = 1 << 5;
        const ID_MONOTONIC_SEQUENCE = 1 << 6;
        const ID_SELF_ASSIGNABLE = 1 << 7;
        const INDEX_PARTIAL_SKIP_NULL = 1 << 8;
        const INDEX_PARTIAL_SKIP_ZERO = 1 << 9;
        const VIRTUAL = 1 << 10;
        const INDEX_HASH = 1 << 11;
        const INDEX_HASH64 = 1 << 12;
        const UNSIGNED = 1 << 13;
        const ID_COMPANION = 1 << 14;
    }
}

impl PropertyFlags {
    /// Bits carried by [`PropertyIndex`] instead of the plain flag set.
    pub const INDEX_BITS: Self = Self::INDEXED
        .union(Self::INDEX_HASH)
        .union(Self::INDEX_HASH64)
        .union(Self::UNIQUE);
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Index variant. `Implicit` leaves the choice to the engine and is what a
/// unique constraint without an explicit index type produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexKind {
    #[default]
    Implicit,
    Value,
    Hash,
    Hash64,
}

impl IndexKind {
    const fn flag(self) -> PropertyFlags {
        match self {
            Self::Implicit => PropertyFlags::empty(),
            Self::Value => PropertyFlags::INDEXED,
            Self::Hash => PropertyFlags::INDEX_HASH,
            Self::Hash64 => PropertyFlags::INDEX_HASH64,
        }
    }
}

/// Index attached to a property; owns its identifier in the root index scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyIndex {
    pub id: IdUid,
    pub kind: IndexKind,
    pub unique: bool,
}

impl PropertyIndex {
    fn flags(&self) -> PropertyFlags {
        let mut flags = self.kind.flag();
        if self.unique {
            flags |= PropertyFlags::UNIQUE;
        }
        flags
    }
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertyRecord", into = "PropertyRecord")]
pub struct Property {
    pub name: String,
    pub id: IdUid,
    pub property_type: PropertyType,
    /// Plain flags; never contains [`PropertyFlags::INDEX_BITS`].
    pub flags: PropertyFlags,
    pub index: Option<PropertyIndex>,
    /// Name of the target entity for `Relation` properties.
    pub relation_target: Option<String>,
}

impl Property {
    pub fn is_id(&self) -> bool {
        self.flags.contains(PropertyFlags::ID)
    }

    /// All flag bits as persisted, index bits included.
    pub fn persisted_flags(&self) -> PropertyFlags {
        let mut flags = self.flags - PropertyFlags::INDEX_BITS;
        if let Some(index) = &self.index {
            flags |= index.flags();
        }
        flags
    }
}

/// Persisted shape of a property.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyRecord {
    id: IdUid,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index_id: Option<IdUid>,
    #[serde(rename = "type")]
    property_type: u16,
    #[serde(default, skip_serializing_if = "is_zero")]
    flags: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relation_target: Option<String>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TryFrom<PropertyRecord> for Property {
    type Error = ModelError;

    fn try_from(record: PropertyRecord) -> Result<Self, Self::Error> {
        let describe = |reason: &str| ModelError::Format {
            input: format!("property {:?} ({})", record.name, record.id),
            reason: reason.to_string(),
        };

        let property_type = PropertyType::from_code(record.property_type)
            .ok_or_else(|| describe(&format!("unknown type code {}", record.property_type)))?;

        let all = PropertyFlags::from_bits_retain(record.flags);
        let index_kinds = [
            (PropertyFlags::INDEXED, IndexKind::Value),
            (PropertyFlags::INDEX_HASH, IndexKind::Hash),
            (PropertyFlags::INDEX_HASH64, IndexKind::Hash64),
        ];
        let mut kind = IndexKind::Implicit;
        for (flag, candidate) in index_kinds {
            if all.contains(flag) {
                if kind != IndexKind::Implicit {
                    return Err(describe("conflicting index type flags"));
                }
                kind = candidate;
            }
        }
        let unique = all.contains(PropertyFlags::UNIQUE);

        let index = match record.index_id {
            Some(id) => Some(PropertyIndex { id, kind, unique }),
            None if kind != IndexKind::Implicit || unique => {
                return Err(describe("index flags set but indexId is missing"));
            }
            None => None,
        };

        Ok(Self {
            name: record.name,
            id: record.id,
            property_type,
            flags: all - PropertyFlags::INDEX_BITS,
            index,
            relation_target: record.relation_target,
        })
    }
}

impl From<Property> for PropertyRecord {
    fn from(property: Property) -> Self {
        Self {
            id: property.id,
            name: property.name.clone(),
            index_id: property.index.map(|index| index.id),
            property_type: property.property_type.code(),
            flags: property.persisted_flags().bits(),
            relation_target: property.relation_target,
        }
    }
}

// ---------------------------------------------------------------------------
// Relation
// ---------------------------------------------------------------------------

/// Standalone (many-to-many) relation owned by an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: IdUid,
    pub name: String,
    /// Identifier of the target entity.
    pub target_id: IdUid,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: IdUid,
    /// Highest property identifier ever assigned in this entity, kept after
    /// that property is removed.
    #[serde(with = "crate::iduid::optional")]
    pub last_property_id: Option<IdUid>,
    pub name: String,
    pub properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
    /// Set while a reconciliation run has seen this entity in its sources.
    #[serde(skip)]
    pub currently_present: bool,
}

impl Entity {
    pub fn new(name: impl Into<String>, id: IdUid) -> Self {
        Self {
            id,
            last_property_id: None,
            name: name.into(),
            properties: Vec::new(),
            relations: Vec::new(),
            currently_present: false,
        }
    }

    pub fn find_property_by_name(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| names_match(&p.name, name))
    }

    pub fn find_relation_by_name(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| names_match(&r.name, name))
    }

    /// Id properties; a valid entity has exactly one.
    pub fn id_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_id())
    }

    pub fn id_property(&self) -> Option<&Property> {
        self.id_properties().next()
    }

    /// Every uid owned by this entity: its own, its properties', their
    /// indexes' and its relations'.
    pub fn owned_uids(&self) -> Vec<Uid> {
        let mut uids = vec![self.id.uid];
        for property in &self.properties {
            uids.push(property.id.uid);
            if let Some(index) = &property.index {
                uids.push(index.id.uid);
            }
        }
        uids.extend(self.relations.iter().map(|r| r.id.uid));
        uids
    }
}
