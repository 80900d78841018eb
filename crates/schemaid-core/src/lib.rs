pub mod allocator;
pub mod candidate;
pub mod catalogs;
pub mod error;
pub mod iduid;
pub mod json;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod session;
pub mod types;
pub mod validator;

pub use allocator::{Scope, UidAllocator};
pub use candidate::{
    CandidateEntity, CandidateIndex, CandidateModel, CandidateProperty, CandidateRelation,
    UidRequest,
};
pub use catalogs::{MODEL_FILE_NAME, MODEL_VERSION};
pub use error::{ElementKind, InvariantViolation, ModelError, Result};
pub use iduid::{Id, IdUid, Uid};
pub use json::{check_to_json, reconcile_to_json};
pub use merge::{merge, MergeEvent, MergeReport};
pub use model::ModelInfo;
pub use session::{reconcile, ReconcileOptions, RunMode, RunReport};
pub use types::*;
pub use validator::{check, finalize, validate};
