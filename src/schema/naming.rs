//! Name derivation for schema descriptions
//!
//! Database identifiers arrive in snake_case. The analyser derives the
//! human-readable and member-facing names from them with these helpers; only
//! empty fields are ever filled, so explicit names in a description win.

use heck::{ToShoutySnakeCase, ToSnakeCase, ToTitleCase};

/// Pluralises an English word the way table and member names need it.
///
/// Covers the regular cases (s, es, ies). Irregular nouns should carry an
/// explicit plural in the schema description instead.
pub(crate) fn plural(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if before.is_some_and(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

/// Title-cased display form of a snake_case identifier.
pub(crate) fn literal(name: &str) -> String {
    name.to_title_case()
}

/// Member-facing form of an identifier, normalised to snake_case.
pub(crate) fn member(name: &str) -> String {
    name.to_snake_case()
}

/// UPPER_SNAKE constant name for a type-table entry.
pub(crate) fn constant(name: &str) -> String {
    name.to_shouty_snake_case()
}

/// Strips a suffix from an identifier, returning the identifier unchanged
/// when the suffix is absent or would leave nothing.
pub(crate) fn strip_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    match name.strip_suffix(suffix) {
        Some(stem) if !stem.is_empty() => stem,
        _ => name,
    }
}
