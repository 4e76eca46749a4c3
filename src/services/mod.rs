pub mod assist_service;
pub mod committer;
pub mod completion;
pub mod config_service;
pub mod llm_client;
pub mod prompts;
pub mod reconciler;
pub mod sanitizer;
pub mod selection_tracker;

pub use assist_service::{AssistController, AssistEvent, RequestHandle, RequestOutcome};
pub use committer::CommitOutcome;
pub use completion::{ChunkStream, CompletionService};
pub use llm_client::LlmClient;
pub use prompts::QuickAction;
pub use sanitizer::NormalizedContent;
