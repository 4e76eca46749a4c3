use crate::models::{CompletionRequest, Mode};
use crate::services::llm_client::{ChatMessage, LlmClient};

/// System prompt for rewriting a selection in place
const TRANSFORM_SYSTEM_PROMPT: &str = r#"You are an editing assistant working inside a rich-text document editor. The user has selected a passage and gives an instruction (translate, summarize, rewrite, fix, ...).

## Rules
1. Apply the instruction to the selected text only
2. Return ONLY the resulting text, with no preamble or explanation
3. Use Markdown for formatting: **bold**, *italic*, # headings, - lists, `code`
4. NEVER output HTML tags
5. Do not escape your own Markdown (write **bold**, not \*\*bold\*\*)
6. Keep the original formatting unless the instruction asks to change it
7. NO emojis"#;

/// System prompt for writing new content at the cursor
const GENERATE_SYSTEM_PROMPT: &str = r#"You are a writing assistant working inside a rich-text document editor. Write new content for the document according to the user's request.

## Rules
1. Return ONLY the content to insert, with no preamble or explanation
2. Use Markdown for formatting: **bold**, *italic*, # headings, - lists, `code`
3. NEVER output HTML tags
4. Do not escape your own Markdown
5. NO emojis"#;

/// Shortcuts for the common toolbar actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickAction {
    Translate(String),
    Summarize,
    Rewrite,
    FixGrammar,
    Continue,
}

impl QuickAction {
    pub fn mode(&self) -> Mode {
        match self {
            QuickAction::Continue => Mode::Generate,
            _ => Mode::Transform,
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            QuickAction::Translate(language) => format!("Translate to {}", language),
            QuickAction::Summarize => "Summarize this text concisely".to_string(),
            QuickAction::Rewrite => "Rewrite this text to be clearer and more engaging".to_string(),
            QuickAction::FixGrammar => "Fix spelling and grammar without changing the meaning".to_string(),
            QuickAction::Continue => "Continue writing from here in the same style".to_string(),
        }
    }
}

impl std::str::FromStr for QuickAction {
    type Err = String;

    /// `translate:<language>`, `summarize`, `rewrite`, `fix` or `continue`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(language) = s.strip_prefix("translate:") {
            let language = language.trim();
            if language.is_empty() {
                return Err("translate needs a language, e.g. translate:French".to_string());
            }
            return Ok(QuickAction::Translate(language.to_string()));
        }
        match s.to_ascii_lowercase().as_str() {
            "summarize" => Ok(QuickAction::Summarize),
            "rewrite" => Ok(QuickAction::Rewrite),
            "fix" | "fix-grammar" => Ok(QuickAction::FixGrammar),
            "continue" => Ok(QuickAction::Continue),
            other => Err(format!("Unknown action '{}'", other)),
        }
    }
}

/// Build the chat messages for a text-mode request.
pub fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    match request.mode {
        Mode::Transform => {
            let selected = request.selected_text.as_deref().unwrap_or("");
            let user_prompt = format!(
                "## Selected Text\n{}\n\n## Instruction\n{}",
                selected, request.prompt
            );
            vec![
                LlmClient::system_message(TRANSFORM_SYSTEM_PROMPT),
                LlmClient::user_message(&user_prompt),
            ]
        }
        Mode::Generate | Mode::Image => vec![
            LlmClient::system_message(GENERATE_SYSTEM_PROMPT),
            LlmClient::user_message(&request.prompt),
        ],
    }
}
