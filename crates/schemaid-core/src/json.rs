//! JSON-in, JSON-out entry points for bindings.
//!
//! Every function takes strings and returns a JSON envelope
//! `{ "success": bool, "data"?: ..., "error"?: "..." }`, so callers never
//! have to deal with Rust types.

use serde::{Deserialize, Serialize};

use crate::allocator::UidAllocator;
use crate::candidate::CandidateModel;
use crate::model::ModelInfo;
use crate::session::{reconcile, ReconcileOptions, RunReport};
use crate::validator::{check, finalize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    /// Current model file content; a new model is started when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sources: Vec<CandidateModel>,
    #[serde(default)]
    pub options: ReconcileOptions,
    /// Seed for reproducible uids.
    #[serde(default)]
    pub seed: Option<u64>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct JsonResult<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    /// New model file content, ready to be written.
    pub model: String,
    pub report: RunReport,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub valid: bool,
    pub violations: Vec<String>,
}

fn respond<T: Serialize>(result: Result<T, String>) -> String {
    let envelope = match result {
        Ok(data) => JsonResult {
            success: true,
            data: Some(data),
            error: None,
        },
        Err(error) => JsonResult {
            success: false,
            data: None,
            error: Some(error),
        },
    };
    serde_json::to_string(&envelope).unwrap_or_else(|e| {
        format!(r#"{{"success":false,"error":"JSON serialization error: {e}"}}"#)
    })
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Reconcile candidate sources against a model.
///
/// Input: a [`ReconcileRequest`] as JSON
/// Output: the updated model file content and the run report
pub fn reconcile_to_json(request_json: &str) -> String {
    respond(run_reconcile(request_json))
}

fn run_reconcile(request_json: &str) -> Result<ReconcileResponse, String> {
    let request: ReconcileRequest =
        serde_json::from_str(request_json).map_err(|e| format!("Invalid request JSON: {e}"))?;
    let mut model = match &request.model {
        Some(json) => ModelInfo::from_json(json).map_err(|e| e.to_string())?,
        None => ModelInfo::new(),
    };
    let mut alloc = match request.seed {
        Some(seed) => UidAllocator::seeded(seed),
        None => UidAllocator::from_entropy(),
    };
    let report = reconcile(&mut model, &request.sources, &request.options, &mut alloc)
        .map_err(|e| e.to_string())?;
    let model = model.to_json().map_err(|e| e.to_string())?;
    Ok(ReconcileResponse { model, report })
}

/// Finalize a model and list every invariant it breaks.
///
/// Input: model file content
/// Output: validity flag and violation messages
pub fn check_to_json(model_json: &str) -> String {
    respond(run_check(model_json))
}

fn run_check(model_json: &str) -> Result<CheckResponse, String> {
    let mut model = ModelInfo::from_json(model_json).map_err(|e| e.to_string())?;
    let violations = match finalize(&mut model) {
        Ok(()) => Vec::new(),
        Err(_) => check(&model).iter().map(|v| v.to_string()).collect(),
    };
    Ok(CheckResponse {
        valid: violations.is_empty(),
        violations,
    })
}
