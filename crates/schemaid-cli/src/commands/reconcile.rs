use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::info;

use schemaid_core::{
    reconcile, ReconcileOptions, RunMode, RunReport, UidAllocator, MODEL_FILE_NAME,
};

use crate::reader::{load_model, read_input, write_model};

pub struct ReconcileArgs {
    pub path: String,
    pub model: Option<PathBuf>,
    pub seed: Option<u64>,
    pub dry_run: bool,
    pub partial: bool,
}

pub fn run_reconcile(args: &ReconcileArgs, format: &str) -> Result<String> {
    let input = read_input(&args.path)?;
    if input.files.is_empty() {
        bail!(
            "No schema files (*.schema.json, *.schema.yaml, *.schema.yml) found at: {}",
            args.path
        );
    }

    // Flags win over the config file.
    let model_path = match (&args.model, &input.config.model) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => input.base_dir.join(path),
        (None, None) => input.base_dir.join(MODEL_FILE_NAME),
    };
    let seed = args.seed.or(input.config.seed);
    let mode = if args.partial {
        RunMode::Partial
    } else {
        input.mode
    };

    let mut model = load_model(&model_path)?;
    let mut alloc = match seed {
        Some(seed) => UidAllocator::seeded(seed),
        None => UidAllocator::from_entropy(),
    };
    let options = ReconcileOptions {
        mode,
        ..ReconcileOptions::default()
    };
    let sources: Vec<_> = input.files.into_iter().map(|f| f.model).collect();
    let report = reconcile(&mut model, &sources, &options, &mut alloc)?;

    if args.dry_run {
        info!(model = %model_path.display(), "dry run, model file not written");
    } else {
        write_model(&model_path, &model)?;
        info!(model = %model_path.display(), "model file written");
    }

    let model_display = model_path.to_string_lossy().to_string();
    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "model": model_display,
                "mode": mode,
                "written": !args.dry_run,
                "report": report,
            }))?;
            Ok(json)
        }
        _ => Ok(human_report(&report, &model_display, args.dry_run)),
    }
}

fn human_report(report: &RunReport, model_path: &str, dry_run: bool) -> String {
    let mut lines: Vec<String> = Vec::new();

    for merge in &report.merges {
        for event in &merge.events {
            let severity = if event.is_warning() { "warning" } else { "info" };
            lines.push(format!("{}: {severity}: {event}", merge.source));
        }
    }
    for entity in &report.removed {
        lines.push(format!("removed entity {} ({})", entity.name, entity.id));
    }

    let file_count = report.merges.len();
    let warning_count = report.warnings().count();
    let file_word = if file_count == 1 { "file" } else { "files" };
    let warning_word = if warning_count == 1 {
        "warning"
    } else {
        "warnings"
    };
    let outcome = if report.is_unchanged() {
        "unchanged"
    } else if dry_run {
        "would be updated"
    } else {
        "updated"
    };
    lines.push(format!(
        "{model_path} {outcome}: {file_count} {file_word}, {warning_count} {warning_word}."
    ));

    lines.join("\n")
}
