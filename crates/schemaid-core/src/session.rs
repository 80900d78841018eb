//! A reconciliation run: every candidate source of one schema merged into
//! the same model, followed by removal of what no source declared.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::allocator::UidAllocator;
use crate::candidate::CandidateModel;
use crate::error::Result;
use crate::merge::{merge, MergeEvent, MergeReport};
use crate::model::ModelInfo;
use crate::types::Entity;
use crate::validator::finalize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    /// Only some of the schema's sources are given; entities they don't
    /// mention are kept.
    #[default]
    Partial,
    /// The sources describe the whole schema; entities none of them
    /// mention are removed.
    FullSchema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOptions {
    #[serde(default)]
    pub mode: RunMode,
    /// Raise the model version to the one this build writes.
    #[serde(default = "default_true")]
    pub upgrade_version: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Partial,
            upgrade_version: true,
        }
    }
}

impl ReconcileOptions {
    pub fn full_schema() -> Self {
        Self {
            mode: RunMode::FullSchema,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub merges: Vec<MergeReport>,
    /// Entities removed because no source declared them.
    pub removed: Vec<Entity>,
}

impl RunReport {
    pub fn warnings(&self) -> impl Iterator<Item = &MergeEvent> {
        self.merges.iter().flat_map(|m| m.warnings())
    }

    pub fn is_unchanged(&self) -> bool {
        self.removed.is_empty() && self.merges.iter().all(|m| m.is_empty())
    }
}

/// Reconcile `model` with `sources`, in order.
///
/// The model is validated before anything is merged and finalized after
/// each source. On error it may hold part of the run and must not be saved.
pub fn reconcile<R: RngCore>(
    model: &mut ModelInfo,
    sources: &[CandidateModel],
    options: &ReconcileOptions,
    alloc: &mut UidAllocator<R>,
) -> Result<RunReport> {
    finalize(model)?;
    model.clear_presence();

    let mut report = RunReport::default();
    for source in sources {
        let merged = merge(source, model, alloc)?;
        finalize(model)?;
        report.merges.push(merged);
    }

    if options.mode == RunMode::FullSchema {
        report.removed = model.remove_absent_entities();
        finalize(model)?;
    }
    if options.upgrade_version {
        model.upgrade_version();
    }

    info!(
        sources = sources.len(),
        removed = report.removed.len(),
        warnings = report.warnings().count(),
        "reconciliation finished"
    );
    Ok(report)
}
