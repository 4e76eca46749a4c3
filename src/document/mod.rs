//! The document-model seam.
//!
//! The editor shell owns the document; AI editing only consumes the
//! capabilities below and never holds it across an await point.

mod memory;

pub use memory::{CellMetrics, MemoryDocument};

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DocumentError;
use crate::models::{LiveSelection, Offset, ScreenPoint, SelectionRange};

/// Non-text nodes that occupy a single position and cannot be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomKind {
    Image,
    Table,
}

impl AtomKind {
    pub fn describe(&self) -> &'static str {
        match self {
            AtomKind::Image => "an image",
            AtomKind::Table => "a table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Text,
    Atom(AtomKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Delete { from: Offset, to: Offset },
    /// `content` is lightweight markup.
    Insert { at: Offset, content: String },
}

/// Steps applied in order, each against the result of the previous one.
/// A model must apply all of them or none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    steps: Vec<Step>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(mut self, from: Offset, to: Offset) -> Self {
        self.steps.push(Step::Delete { from, to });
        self
    }

    pub fn insert(mut self, at: Offset, content: impl Into<String>) -> Self {
        self.steps.push(Step::Insert {
            at,
            content: content.into(),
        });
        self
    }

    /// Replace `range` with `content`; a cursor range becomes a plain insert.
    pub fn replace(range: SelectionRange, content: impl Into<String>) -> Self {
        let tx = Self::new();
        let tx = if range.is_cursor() {
            tx
        } else {
            tx.delete(range.from, range.to)
        };
        tx.insert(range.from, content)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    SelectionChanged(LiveSelection),
    ContentChanged { version: u64 },
}

pub trait DocumentModel: Send {
    fn selection(&self) -> LiveSelection;

    /// Number of positions in the document.
    fn size(&self) -> Offset;

    fn node_at(&self, pos: Offset) -> NodeKind;

    fn text_between(&self, from: Offset, to: Offset) -> String;

    /// Apply every step or none, with a single content-change notification.
    fn apply(&mut self, tx: &Transaction) -> Result<(), DocumentError>;

    /// Insert unformatted text; no markup is interpreted.
    fn insert_plain_text(&mut self, pos: Offset, text: &str) -> Result<(), DocumentError>;

    fn coords_at_pos(&self, pos: Offset) -> Option<ScreenPoint>;

    /// Visual highlight of a frozen range.
    fn set_highlight(&mut self, _range: Option<SelectionRange>) {}

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DocumentEvent>;
}

pub type SharedDocument<D> = Arc<Mutex<D>>;

pub fn shared<D: DocumentModel>(document: D) -> SharedDocument<D> {
    Arc::new(Mutex::new(document))
}
