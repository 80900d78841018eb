use std::path::Path;

use anyhow::{bail, Result};

use schemaid_core::{check, finalize};

use crate::reader::load_model;

/// Returns the output and the number of violations found.
pub fn run_check(model_path: &Path, format: &str) -> Result<(String, usize)> {
    if !model_path.exists() {
        bail!("Model file does not exist: {}", model_path.display());
    }
    let mut model = load_model(model_path)?;
    let violations = match finalize(&mut model) {
        Ok(()) => Vec::new(),
        Err(e) => {
            let found = check(&model);
            if found.is_empty() {
                return Err(e.into());
            }
            found
        }
    };
    let count = violations.len();

    if format == "json" {
        let messages: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "model": model_path.to_string_lossy(),
            "valid": count == 0,
            "violations": messages,
        }))?;
        return Ok((json, count));
    }

    let mut lines: Vec<String> = violations
        .iter()
        .map(|v| format!("{}: error: {v}", model_path.display()))
        .collect();
    if count == 0 {
        lines.push(format!(
            "{} OK: {} entities.",
            model_path.display(),
            model.entities.len()
        ));
    } else {
        let word = if count == 1 { "violation" } else { "violations" };
        lines.push(format!("{count} {word} in {}.", model_path.display()));
    }

    Ok((lines.join("\n"), count))
}
