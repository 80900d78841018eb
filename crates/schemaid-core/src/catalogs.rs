use std::sync::LazyLock;

use regex::Regex;

/// Model format revision written to `modelVersion`.
/// A model whose `modelVersionParserMinimum` is above this can't be processed.
pub const MODEL_VERSION: u32 = 5;

/// Layout revision of the persisted file (`version` key).
pub const FILE_FORMAT_VERSION: u32 = 1;

/// Default model file name, placed next to the schema sources.
pub const MODEL_FILE_NAME: &str = "schemaid-model.json";

/// Fixed notes written at the top of every model file.
pub const MODEL_NOTES: [&str; 3] = [
    "KEEP THIS FILE! Check it into a version control system (VCS) like git.",
    "Stable schema identifiers are managed here. Do not edit ids by hand.",
    "If you have VCS merge conflicts, resolve them without reusing any uid.",
];

/// Valid entity, property and relation names.
pub static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Names are matched case-insensitively.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}

pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || normalize_name(a) == normalize_name(b)
}
