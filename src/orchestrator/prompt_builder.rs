//! Turn prompt assembly.
//!
//! The prompt is one flat text block, sections in fixed order: system
//! instructions, prior conversation (if any), retrieved course materials,
//! then the student's question.

use crate::models::internal::ContextChunk;

pub const BASE_SYSTEM_PREAMBLE: &str = "You are a helpful, patient course tutor. \
Use the provided course materials to answer accurately and concisely. \
If the materials do not cover the question or you are not certain, say so instead of guessing.";

pub const CONTEXT_SEPARATOR: &str = "\n---\n";
pub const CONTEXT_HEADER: &str = "Relevant course materials:";
pub const QUESTION_HEADER: &str = "Current question:";

/// First `max_chars` characters of `text`. Cuts mid-word when it has to.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Chunk texts joined by [`CONTEXT_SEPARATOR`], then cut to `max_chars`.
/// The budget applies to the joined string, not to each chunk.
pub fn join_context(chunks: &[ContextChunk], max_chars: usize) -> String {
    let joined = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    truncate_chars(&joined, max_chars).to_string()
}

pub fn assemble_prompt(system: &str, history: &str, context: &str, question: &str) -> String {
    let mut sections = Vec::with_capacity(4);
    sections.push(system.to_string());
    if !history.is_empty() {
        sections.push(history.to_string());
    }
    sections.push(format!("{}\n{}", CONTEXT_HEADER, context));
    sections.push(format!("{}\n{}", QUESTION_HEADER, question));
    sections.join("\n\n")
}
