use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::iduid::{Id, Uid};

/// Kind of schema element an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Entity,
    Property,
    Relation,
    Index,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entity => "entity",
            Self::Property => "property",
            Self::Relation => "relation",
            Self::Index => "index",
        })
    }
}

/// Errors produced while loading, merging or finalizing a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid identifier {input:?}: {reason}")]
    Format { input: String, reason: String },

    #[error("can't decode model: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("ambiguous {kind} match for {name:?} (uids {uids:?}): {reason}; add an explicit uid annotation")]
    AmbiguousMatch {
        kind: ElementKind,
        name: String,
        uids: Vec<Uid>,
        reason: String,
    },

    #[error("uid {uid} requested by {requested_by} is already used by {owner}")]
    DuplicateUid {
        uid: Uid,
        requested_by: String,
        owner: String,
    },

    #[error("uid annotation on {element} is empty:\n    [rename] apply the current uid {current_uid}\n    [change/reset] apply a new uid {suggested}", current_uid = describe_current(.current))]
    UidRequestPending {
        element: String,
        current: Option<Uid>,
        suggested: Uid,
    },

    #[error("{kind} with uid {uid} is not in the model")]
    UnknownUid { kind: ElementKind, uid: Uid },

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Violations reported by the validator; each names the broken invariant
/// and the element carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("entity {entity:?} has no id property")]
    MissingIdProperty { entity: String },

    #[error("entity {entity:?} has more than one id property: {properties:?}")]
    MultipleIdProperties {
        entity: String,
        properties: Vec<String>,
    },

    #[error("id property {property:?} of entity {entity:?} must be of type long, found {found}")]
    InvalidIdPropertyType {
        entity: String,
        property: String,
        found: String,
    },

    #[error("{kind} id {id} is used by both {first} and {second}")]
    DuplicateIdentifier {
        kind: ElementKind,
        id: Id,
        first: String,
        second: String,
    },

    #[error("uid {uid} is used by both {first} and {second}")]
    DuplicateUid {
        uid: Uid,
        first: String,
        second: String,
    },

    #[error("uid {uid} of {element} has been retired and can't be used again")]
    RetiredUidInUse { uid: Uid, element: String },

    #[error("{element} has no assigned identifier")]
    UnassignedIdentifier { element: String },

    #[error("{element} refers to missing entity {target}")]
    OrphanRelationTarget { element: String, target: String },

    #[error("{counter} ({counter_id}) is lower than the id {id} of {element}")]
    CounterBehind {
        counter: String,
        counter_id: Id,
        id: Id,
        element: String,
    },

    #[error("duplicate {kind} name {name:?} in {scope}")]
    DuplicateName {
        kind: ElementKind,
        name: String,
        scope: String,
    },

    #[error("invalid {kind} name {name:?}")]
    InvalidName { kind: ElementKind, name: String },

    #[error("property {property:?} of entity {entity:?}: relation target and relation type must go together")]
    RelationTargetMismatch { entity: String, property: String },

    #[error("model requires parser version {required}, this build supports up to {supported}")]
    UnsupportedModelVersion { required: u32, supported: u32 },
}

fn describe_current(current: &Option<Uid>) -> String {
    current.map_or_else(|| "(none, element is new)".to_string(), |u| u.to_string())
}

pub type Result<T> = std::result::Result<T, ModelError>;
