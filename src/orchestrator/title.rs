use tracing::{debug, warn};

use crate::models::internal::ChatMessage;
use crate::orchestrator::postprocess::clean_answer;
use crate::services::model_client::ModelClient;

pub const PLACEHOLDER_TITLE: &str = "New Chat";
pub const MAX_TITLE_CHARS: usize = 30;

pub fn title_prompt(first_message: &str) -> String {
    format!(
        "Create a short title of 2-3 words for a tutoring conversation that begins with \
         the student message below.\n\
         Examples:\n\
         - \"How do Python lists work?\" -> Python Lists\n\
         - \"My recursive function never stops\" -> Recursion Debugging\n\
         - \"Quiz me on Big-O notation\" -> Big-O Practice\n\
         Reply with the title only, no quotes or punctuation.\n\n\
         Student message: {}",
        first_message
    )
}

/// Strip quotes and reasoning, keep the first line, cap at
/// [`MAX_TITLE_CHARS`] (ending in `...` when cut). `None` if nothing is left.
pub fn normalize_title(raw: &str) -> Option<String> {
    let cleaned = clean_answer(raw);
    let line = cleaned.lines().next().unwrap_or("");
    let unquoted: String = line
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'))
        .collect();
    let title = unquoted.trim();

    if title.is_empty() {
        return None;
    }

    if title.chars().count() > MAX_TITLE_CHARS {
        let kept: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        Some(format!("{}...", kept.trim_end()))
    } else {
        Some(title.to_string())
    }
}

/// Best-effort: any failure yields [`PLACEHOLDER_TITLE`].
pub async fn generate_title(model: &dyn ModelClient, first_message: &str) -> String {
    let messages = [ChatMessage::user(title_prompt(first_message))];

    match model.chat(&messages).await {
        Ok(reply) => match normalize_title(&reply.text) {
            Some(title) => {
                debug!("Generated session title '{}'", title);
                title
            }
            None => PLACEHOLDER_TITLE.to_string(),
        },
        Err(e) => {
            warn!("Title generation failed, using placeholder: {}", e);
            PLACEHOLDER_TITLE.to_string()
        }
    }
}
