//! Run one AI editing interaction against a Markdown file.
//!
//! Usage:
//!   draftsmith notes.md --select "hello world" --prompt "translate to French"
//!   draftsmith notes.md --at 0 --prompt "write a haiku" --dry-run
//!   draftsmith notes.md --select "teh quick fox" --action fix

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};

use draftsmith_lib::document::{shared, DocumentModel, MemoryDocument};
use draftsmith_lib::models::{Mode, SessionStatus};
use draftsmith_lib::services::{
    AssistController, AssistEvent, CommitOutcome, LlmClient, QuickAction, RequestOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "draftsmith")]
#[command(about = "AI-assisted rewriting and generation for Markdown documents")]
struct Args {
    /// Markdown file to edit
    file: PathBuf,

    /// Instruction for the model
    #[arg(short, long)]
    prompt: Option<String>,

    /// Text to rewrite (first occurrence)
    #[arg(short, long, conflicts_with = "at")]
    select: Option<String>,

    /// Insert at this position instead of rewriting a selection
    #[arg(long)]
    at: Option<usize>,

    /// transform, generate or image
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Quick action: translate:<language>, summarize, rewrite, fix, continue
    #[arg(short, long, conflicts_with = "prompt")]
    action: Option<QuickAction>,

    /// Print the edited document instead of writing it back
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let original = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let mut document = MemoryDocument::from_markdown(&original);
    match (&args.select, args.at) {
        (Some(text), _) => {
            let range = document
                .find_text(text)
                .with_context(|| format!("'{}' not found in {}", text, args.file.display()))?;
            document.set_selection(range.from, range.to);
        }
        (None, Some(at)) => {
            if at > document.size() {
                bail!("position {} is past the end of the document ({})", at, document.size());
            }
            document.set_selection(at, at);
        }
        (None, None) => {
            let end = document.size();
            document.set_selection(end, end);
        }
    }

    let (mode, prompt) = match (args.action, args.prompt) {
        (Some(action), _) => (action.mode(), action.prompt()),
        (None, Some(prompt)) => {
            let default_mode = if args.select.is_some() {
                Mode::Transform
            } else {
                Mode::Generate
            };
            (args.mode.unwrap_or(default_mode), prompt)
        }
        (None, None) => bail!("either --prompt or --action is required"),
    };

    let client = LlmClient::from_config()?;
    let controller = AssistController::new(shared(document), client);
    let mut events = controller.subscribe();

    controller.trigger(mode)?;
    let handle = controller.submit(&prompt)?;
    tracing::info!(request_id = %handle.request_id(), mode = mode.wire_tag(), "request sent");

    let mut shown = 0usize;
    loop {
        match events.recv().await {
            Ok(AssistEvent::OutputUpdated { output }) => {
                if output.len() < shown {
                    shown = 0;
                }
                eprint!("{}", &output[shown..]);
                shown = output.len();
            }
            Ok(AssistEvent::Failed { message, category }) => {
                eprintln!();
                eprintln!("[{}] {}", category.as_str(), message);
            }
            Ok(AssistEvent::StatusChanged {
                status: SessionStatus::Resolved,
            }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event receiver lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    eprintln!();

    match handle.wait().await {
        RequestOutcome::Completed => {}
        RequestOutcome::Failed(e) => bail!(e.user_message()),
        RequestOutcome::Cancelled => bail!("request was cancelled"),
    }

    match controller.insert()? {
        CommitOutcome::Structured { range } => {
            tracing::info!(from = range.from, to = range.to, "document updated");
        }
        CommitOutcome::Degraded { warning, .. } => eprintln!("warning: {}", warning),
    }

    let edited = controller
        .document()
        .lock()
        .map_err(|_| anyhow::anyhow!("document lock poisoned"))?
        .to_markdown();

    if args.dry_run {
        println!("{}", edited);
    } else {
        std::fs::write(&args.file, edited)
            .with_context(|| format!("failed to write {}", args.file.display()))?;
        tracing::info!(path = %args.file.display(), "saved");
    }
    Ok(())
}
