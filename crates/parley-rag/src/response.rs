//! Post-processing of generated answers.

use std::sync::LazyLock;

use regex::Regex;

/// `[1]`, `[2, 3]`, `[^4]` and any whitespace in front of them.
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[\^?\d+(?:\s*[,;-]\s*\^?\d+)*\]").unwrap());

/// Remove bracketed citation markers and trim the result.
pub fn strip_citations(text: &str) -> String {
    CITATION_RE.replace_all(text, "").trim().to_string()
}
