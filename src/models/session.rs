use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SelectionRange;

/// What an AI interaction does with its frozen range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Rewrite the selected text (wire tag `process`).
    #[default]
    #[serde(rename = "process", alias = "transform")]
    Transform,
    /// Write new content at the cursor.
    Generate,
    /// Produce an image and insert a reference to it.
    Image,
}

impl Mode {
    pub fn wire_tag(&self) -> &'static str {
        match self {
            Mode::Transform => "process",
            Mode::Generate => "generate",
            Mode::Image => "image",
        }
    }

    pub fn needs_selection(&self) -> bool {
        matches!(self, Mode::Transform)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transform" | "process" => Ok(Mode::Transform),
            "generate" => Ok(Mode::Generate),
            "image" => Ok(Mode::Image),
            other => Err(format!("Unknown mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    /// Range frozen, waiting for the user's prompt.
    Collecting,
    Streaming,
    /// Output complete (or failed with partial output retained).
    Resolved,
}

/// User-facing failure attached to a resolved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub message: String,
    pub category: String,
}

/// Ephemeral state of one AI interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSession {
    pub prompt: String,
    pub mode: Mode,
    pub is_loading: bool,
    pub output_buffer: String,
    pub status: SessionStatus,
    pub error: Option<SessionError>,
    pub request_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PromptSession {
    /// Enter loading state for a fresh request; the previous output is discarded.
    pub fn begin_request(&mut self, prompt: &str) -> Uuid {
        let request_id = Uuid::new_v4();
        self.prompt = prompt.to_string();
        self.is_loading = true;
        self.output_buffer.clear();
        self.status = SessionStatus::Streaming;
        self.error = None;
        self.request_id = Some(request_id);
        self.started_at = Some(Utc::now());
        request_id
    }

    pub fn append_output(&mut self, text: &str) {
        self.output_buffer.push_str(text);
    }

    pub fn resolve(&mut self) {
        self.is_loading = false;
        self.status = SessionStatus::Resolved;
    }

    pub fn fail(&mut self, error: SessionError) {
        self.resolve();
        self.error = Some(error);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only view of the session handed to the UI shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub mode: Mode,
    pub prompt: String,
    pub is_loading: bool,
    pub output: String,
    pub error: Option<SessionError>,
    pub range: Option<SelectionRange>,
}

impl SessionSnapshot {
    pub fn from_session(session: &PromptSession, range: Option<SelectionRange>) -> Self {
        Self {
            status: session.status,
            mode: session.mode,
            prompt: session.prompt.clone(),
            is_loading: session.is_loading,
            output: session.output_buffer.clone(),
            error: session.error.clone(),
            range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_uses_process_wire_tag() {
        assert_eq!(serde_json::to_string(&Mode::Transform).unwrap(), "\"process\"");
        assert_eq!(serde_json::from_str::<Mode>("\"transform\"").unwrap(), Mode::Transform);
        assert_eq!("Image".parse::<Mode>().unwrap(), Mode::Image);
        assert!("video".parse::<Mode>().is_err());
    }

    #[test]
    fn begin_request_replaces_previous_output() {
        let mut session = PromptSession::default();
        session.begin_request("first");
        session.append_output("old text\n");
        session.resolve();

        session.begin_request("first");
        assert!(session.output_buffer.is_empty());
        assert!(session.is_loading);
        assert_eq!(session.status, SessionStatus::Streaming);
    }
}
