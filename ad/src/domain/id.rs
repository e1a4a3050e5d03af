//! Identifier generation
//!
//! All IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `019430-finding-sql-injection-main-py`

/// Generate an ID from a kind and a human-readable hint
pub fn generate_id(kind: &str, hint: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(hint);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, kind)
    } else {
        format!("{}-{}-{}", hex_prefix, kind, slug)
    }
}

/// Slugify a hint for use in IDs
fn slugify(hint: &str) -> String {
    hint.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}
