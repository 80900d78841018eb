use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use schemaid_core::{CandidateModel, ModelInfo, RunMode};

pub const CONFIG_FILE_NAME: &str = "schemaid.config.yaml";

/// File name endings recognized as candidate schema files.
const SCHEMA_SUFFIXES: [&str; 3] = [".schema.json", ".schema.yaml", ".schema.yml"];

/// A candidate schema file and the model parsed from it.
pub struct CandidateFile {
    pub path: PathBuf,
    pub model: CandidateModel,
}

/// Project configuration from schemaid.config.yaml.
#[derive(Debug, Default, Deserialize)]
pub struct SchemaidConfig {
    /// Model file, relative to the config file.
    pub model: Option<PathBuf>,
    /// Glob patterns of candidate files, relative to the config file.
    pub sources: Option<Vec<String>>,
    pub seed: Option<u64>,
}

/// Everything a run reads before touching the model.
pub struct Input {
    pub files: Vec<CandidateFile>,
    pub mode: RunMode,
    /// Directory the sources were found in; default home of the model file.
    pub base_dir: PathBuf,
    pub config: SchemaidConfig,
}

/// Read candidate files from an input argument.
///
/// A single file is a partial run. A directory, a glob or a recursive
/// `dir/...` argument names the whole schema.
pub fn read_input(arg: &str) -> Result<Input> {
    if let Some(dir) = arg.strip_suffix("/...") {
        let base_dir = PathBuf::from(if dir.is_empty() { "." } else { dir });
        if !base_dir.is_dir() {
            bail!("Not a directory: {}", base_dir.display());
        }
        let config = read_config(&base_dir)?;
        let files = read_files(scan_directory(&base_dir, true)?)?;
        return Ok(Input {
            files,
            mode: RunMode::FullSchema,
            base_dir,
            config,
        });
    }

    if is_glob(arg) {
        let base_dir = glob_base(arg);
        let config = read_config(&base_dir)?;
        let files = read_files(expand_patterns(&[arg.to_string()], Path::new(""))?)?;
        return Ok(Input {
            files,
            mode: RunMode::FullSchema,
            base_dir,
            config,
        });
    }

    let input_path = Path::new(arg);
    if !input_path.exists() {
        bail!("Path does not exist: {}", input_path.display());
    }

    if input_path.is_file() {
        let base_dir = match input_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let config = read_config(&base_dir)?;
        return Ok(Input {
            files: vec![read_candidate_file(input_path)?],
            mode: RunMode::Partial,
            base_dir,
            config,
        });
    }

    if input_path.is_dir() {
        let base_dir = input_path.to_path_buf();
        let config = read_config(&base_dir)?;
        let paths = match &config.sources {
            Some(patterns) if !patterns.is_empty() => expand_patterns(patterns, &base_dir)?,
            _ => scan_directory(&base_dir, false)?,
        };
        return Ok(Input {
            files: read_files(paths)?,
            mode: RunMode::FullSchema,
            base_dir,
            config,
        });
    }

    bail!(
        "Path is neither a file nor a directory: {}",
        input_path.display()
    )
}

/// Read the project config of a directory, if it has one.
pub fn read_config(dir_path: &Path) -> Result<SchemaidConfig> {
    let config_path = dir_path.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return Ok(SchemaidConfig::default());
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid YAML config {}", config_path.display()))
}

/// Parse one candidate file, JSON or YAML by extension.
pub fn read_candidate_file(path: &Path) -> Result<CandidateFile> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let mut model: CandidateModel = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON schema file {}", path.display()))?,
        Some("yaml" | "yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML schema file {}", path.display()))?,
        _ => bail!(
            "Unsupported schema file {} (expected .json, .yaml or .yml)",
            path.display()
        ),
    };
    if model.source.is_empty() {
        model.source = path.to_string_lossy().to_string();
    }
    debug!(path = %path.display(), entities = model.entities.len(), "read schema file");

    Ok(CandidateFile {
        path: path.to_path_buf(),
        model,
    })
}

/// Load the model file, or start a new model when there is none yet.
pub fn load_model(path: &Path) -> Result<ModelInfo> {
    if !path.exists() {
        debug!(path = %path.display(), "no model file yet, starting a new model");
        return Ok(ModelInfo::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    ModelInfo::from_json(&content).with_context(|| format!("Can't load model {}", path.display()))
}

/// Write the model file through a temporary sibling, so a failed write never
/// leaves a truncated model behind.
pub fn write_model(path: &Path, model: &ModelInfo) -> Result<()> {
    let json = model.to_json()?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn read_files(paths: Vec<PathBuf>) -> Result<Vec<CandidateFile>> {
    paths.iter().map(|p| read_candidate_file(p)).collect()
}

fn is_schema_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    SCHEMA_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn is_glob(arg: &str) -> bool {
    arg.contains(['*', '?', '['])
}

/// Leading directories of a glob pattern that contain no wildcard.
fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let components: Vec<_> = Path::new(pattern).components().collect();
    for component in &components[..components.len().saturating_sub(1)] {
        if is_glob(&component.as_os_str().to_string_lossy()) {
            break;
        }
        base.push(component);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn scan_directory(dir_path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let prefix = if recursive { "**/*" } else { "*" };
    let patterns: Vec<String> = SCHEMA_SUFFIXES
        .iter()
        .map(|suffix| format!("{prefix}{suffix}"))
        .collect();

    let mut paths = expand_patterns(&patterns, dir_path)?;
    paths.sort();
    Ok(paths)
}

/// Expand glob patterns relative to `base_dir`, keeping pattern order and
/// dropping repeats.
fn expand_patterns(patterns: &[String], base_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for pattern in patterns {
        let full_pattern = base_dir.join(pattern);
        let pattern_str = full_pattern.to_string_lossy().replace('\\', "/");
        let entries = glob::glob(&pattern_str)
            .with_context(|| format!("Invalid glob pattern '{pattern}'"))?;

        let mut matched: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry.context("Glob error")?;
            if path.is_file() && is_schema_file(&path) && seen.insert(path.clone()) {
                matched.push(path);
            }
        }
        matched.sort();
        paths.extend(matched);
    }

    Ok(paths)
}
