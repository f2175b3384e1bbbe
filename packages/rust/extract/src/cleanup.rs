//! Text cleanup passes applied to extracted content.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw extracted text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = strip_invisible(text);
    result = collapse_whitespace(&result);
    result
}

/// Drop zero-width characters and control characters other than whitespace.
fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}'))
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect()
}

/// Collapse every whitespace run (including non-breaking spaces) into one space and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\u{A0}]+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}
