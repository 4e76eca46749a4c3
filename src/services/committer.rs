use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::Serialize;

use super::sanitizer::NormalizedContent;
use crate::document::{DocumentModel, Transaction};
use crate::error::{AssistError, Result};
use crate::models::{Offset, SelectionRange};

/// How content ended up in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CommitOutcome {
    /// Replaced (or inserted at) the frozen range in one transaction.
    Structured { range: SelectionRange },
    /// Structured insert was refused; plain text went in at the cursor.
    Degraded { at: Offset, warning: String },
}

impl CommitOutcome {
    pub fn warning(&self) -> Option<&str> {
        match self {
            CommitOutcome::Structured { .. } => None,
            CommitOutcome::Degraded { warning, .. } => Some(warning),
        }
    }
}

/// Strip lightweight markup down to its text for degraded insertion.
pub fn to_plain_text(markup: &str) -> String {
    let mut text = String::new();
    for event in Parser::new(markup) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::BlockQuote(_)) => text.push_str("\n\n"),
            Event::End(TagEnd::Item) => text.push('\n'),
            Event::Start(Tag::Item) => text.push_str("- "),
            Event::Rule => text.push_str("\n\n"),
            _ => {}
        }
    }
    text.trim_end().to_string()
}

/// Write `content` over `target` as a single transaction, falling back to a
/// plain-text insert at the live cursor if the document refuses it.
///
/// `covered` is the text `frozen` spanned when it was captured. If the user
/// edited the document while the response streamed, the offsets are checked
/// against the document as it is now and must still cover that text.
pub fn commit(
    document: &mut dyn DocumentModel,
    frozen: SelectionRange,
    covered: &str,
    target: SelectionRange,
    content: &NormalizedContent,
) -> Result<CommitOutcome> {
    let structured = check_offsets(&*document, frozen, covered, target).and_then(|()| {
        document
            .apply(&Transaction::replace(target, content.as_str()))
            .map_err(AssistError::from)
    });

    let err = match structured {
        Ok(()) => {
            tracing::info!(from = target.from, to = target.to, len = content.as_str().len(), "committed output");
            return Ok(CommitOutcome::Structured { range: target });
        }
        Err(err) => err,
    };

    tracing::warn!(error = %err, "structured insert refused, falling back to plain text");
    let at = document.selection().head.min(document.size());
    document
        .insert_plain_text(at, &to_plain_text(content.as_str()))
        .map_err(|fallback| {
            tracing::error!(error = %fallback, "plain-text fallback failed");
            AssistError::Insertion(format!("{}; fallback: {}", err, fallback))
        })?;

    Ok(CommitOutcome::Degraded {
        at,
        warning: "Formatting could not be applied; the text was inserted as plain text.".to_string(),
    })
}

fn check_offsets(
    document: &dyn DocumentModel,
    frozen: SelectionRange,
    covered: &str,
    target: SelectionRange,
) -> Result<()> {
    let size = document.size();
    if !frozen.fits_within(size) || !target.fits_within(size) {
        return Err(AssistError::Insertion(format!(
            "range {}..{} no longer fits document of size {}",
            target.from, target.to, size
        )));
    }
    if document.text_between(frozen.from, frozen.to) != covered {
        return Err(AssistError::Insertion(format!(
            "text at {}..{} changed since it was selected",
            frozen.from, frozen.to
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentEvent, MemoryDocument};
    use crate::services::sanitizer::normalize;

    fn commit_over(doc: &mut MemoryDocument, range: SelectionRange, content: &str) -> Result<CommitOutcome> {
        let covered = doc.text_between(range.from, range.to);
        commit(doc, range, &covered, range, &normalize(content))
    }

    #[test]
    fn replaces_range_in_one_change() {
        let mut doc = MemoryDocument::from_markdown("say hello world now");
        let mut events = doc.subscribe();
        let range = SelectionRange::new(4, 15);

        let outcome = commit_over(&mut doc, range, "Bonjour le monde").unwrap();
        assert_eq!(outcome, CommitOutcome::Structured { range });
        assert_eq!(doc.to_markdown(), "say Bonjour le monde now");

        let changes: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, DocumentEvent::ContentChanged { .. }))
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn cursor_range_inserts_in_place() {
        let mut doc = MemoryDocument::from_markdown("ab");
        commit_over(&mut doc, SelectionRange::cursor(1), "XY").unwrap();
        assert_eq!(doc.to_markdown(), "aXYb");
    }

    #[test]
    fn stale_range_degrades_to_cursor_insert() {
        let mut doc = MemoryDocument::from_markdown("short");
        doc.set_selection(5, 5);

        let range = SelectionRange::new(10, 20);
        let outcome = commit(&mut doc, range, "", range, &normalize("**new** text")).unwrap();
        assert!(outcome.warning().is_some());
        assert_eq!(doc.to_markdown(), "shortnew text");
    }

    #[test]
    fn rejected_transaction_degrades_to_plain_text() {
        let mut doc = MemoryDocument::from_markdown("keep");
        doc.reject_transactions(true);
        doc.set_selection(0, 0);

        let outcome = commit_over(&mut doc, SelectionRange::new(0, 4), "# Title").unwrap();
        assert!(matches!(outcome, CommitOutcome::Degraded { at: 0, .. }));
        assert_eq!(doc.to_markdown(), "Titlekeep");
    }

    #[test]
    fn fails_only_when_fallback_fails() {
        let mut doc = MemoryDocument::from_markdown("keep");
        doc.set_read_only(true);
        let err = commit_over(&mut doc, SelectionRange::new(0, 4), "x").unwrap_err();
        assert!(matches!(err, AssistError::Insertion(_)));
        assert_eq!(doc.to_markdown(), "keep");
    }

    #[test]
    fn shifted_text_is_not_overwritten() {
        let mut doc = MemoryDocument::from_markdown("hello world");
        let frozen = SelectionRange::new(6, 11);
        doc.insert_text(0, "big ").unwrap();

        let outcome = commit(&mut doc, frozen, "world", frozen, &normalize("MONDE")).unwrap();
        assert!(matches!(outcome, CommitOutcome::Degraded { at: 4, .. }));
        assert_eq!(doc.to_markdown(), "big MONDEhello world");
    }

    #[test]
    fn cursor_target_checks_the_frozen_text() {
        let mut doc = MemoryDocument::from_markdown("hello world");
        let frozen = SelectionRange::new(0, 5);
        let outcome = commit(&mut doc, frozen, "hello", SelectionRange::cursor(5), &normalize("!")).unwrap();
        assert_eq!(outcome, CommitOutcome::Structured { range: SelectionRange::cursor(5) });
        assert_eq!(doc.to_markdown(), "hello! world");
    }

    #[test]
    fn plain_text_drops_markup() {
        assert_eq!(
            to_plain_text("# Title\n\nSome **bold** and `code`.\n\n- one\n- two"),
            "Title\n\nSome bold and code.\n\n- one\n- two"
        );
    }
}
