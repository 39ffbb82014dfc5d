use once_cell::sync::Lazy;
use regex::Regex;

static REASONING_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<reasoning>.*?</reasoning>").expect("valid reasoning pattern"));

static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline pattern"));

/// Clean a raw model answer for the student.
///
/// Drops every `<reasoning>...</reasoning>` span (any case, across lines),
/// collapses runs of 3+ newlines to exactly 2, then trims.
pub fn clean_answer(raw: &str) -> String {
    let stripped = REASONING_BLOCK.replace_all(raw, "");
    let collapsed = EXCESS_NEWLINES.replace_all(&stripped, "\n\n");
    collapsed.trim().to_string()
}
