//! AI-assisted editing for rich-text documents: freeze a selection, stream a
//! model's response into a preview, and commit it back as one transaction.

pub mod commands;
pub mod document;
pub mod error;
pub mod models;
pub mod services;

pub use document::{shared, DocumentEvent, DocumentModel, MemoryDocument, SharedDocument, Transaction};
pub use error::{AssistError, DocumentError, ErrorCategory, Result};
pub use models::{Mode, SelectionRange, SessionSnapshot, SessionStatus};
pub use services::{
    AssistController, AssistEvent, CommitOutcome, CompletionService, LlmClient, QuickAction,
    RequestHandle, RequestOutcome,
};
