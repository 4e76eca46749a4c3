use pulldown_cmark::{Event, Options, Parser, Tag};
use tokio::sync::mpsc;

use super::{AtomKind, DocumentEvent, DocumentModel, NodeKind, Step, Transaction};
use crate::error::DocumentError;
use crate::models::{LiveSelection, Offset, ScreenPoint, SelectionRange};

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Char(char),
    /// Keeps its Markdown source so the document round-trips.
    Atom { kind: AtomKind, source: String },
}

/// Fixed-cell layout used to map positions to screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetrics {
    pub cell_width: f32,
    pub line_height: f32,
    pub padding_left: f32,
    pub padding_top: f32,
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            cell_width: 8.0,
            line_height: 20.0,
            padding_left: 16.0,
            padding_top: 16.0,
        }
    }
}

/// In-memory document with a linear position space: one position per
/// character and one per atomic node (images, tables).
pub struct MemoryDocument {
    items: Vec<Item>,
    selection: LiveSelection,
    highlight: Option<SelectionRange>,
    version: u64,
    scroll_top: f32,
    metrics: CellMetrics,
    read_only: bool,
    reject_transactions: bool,
    listeners: Vec<mpsc::UnboundedSender<DocumentEvent>>,
}

/// Parse Markdown into items, collapsing images and tables into atoms.
fn items_from_markdown(text: &str) -> Vec<Item> {
    let mut atoms: Vec<(std::ops::Range<usize>, AtomKind)> = Vec::new();
    for (event, range) in Parser::new_ext(text, Options::ENABLE_TABLES).into_offset_iter() {
        let kind = match event {
            Event::Start(Tag::Image { .. }) => AtomKind::Image,
            Event::Start(Tag::Table(_)) => AtomKind::Table,
            _ => continue,
        };
        // Images inside a table belong to the table atom.
        if atoms.last().is_some_and(|(outer, _)| range.start < outer.end) {
            continue;
        }
        atoms.push((range, kind));
    }

    let mut items = Vec::with_capacity(text.len());
    let mut atoms = atoms.into_iter().peekable();
    let mut skip_until = 0;
    for (idx, ch) in text.char_indices() {
        if idx < skip_until {
            continue;
        }
        if let Some((range, kind)) = atoms.next_if(|(range, _)| range.start == idx) {
            items.push(Item::Atom {
                kind,
                source: text[range.clone()].to_string(),
            });
            skip_until = range.end;
            continue;
        }
        items.push(Item::Char(ch));
    }
    items
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            selection: LiveSelection::default(),
            highlight: None,
            version: 0,
            scroll_top: 0.0,
            metrics: CellMetrics::default(),
            read_only: false,
            reject_transactions: false,
            listeners: Vec::new(),
        }
    }

    pub fn from_markdown(text: &str) -> Self {
        let mut doc = Self::new();
        doc.items = items_from_markdown(text);
        doc
    }

    pub fn with_metrics(mut self, metrics: CellMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::with_capacity(self.items.len());
        for item in &self.items {
            match item {
                Item::Char(ch) => out.push(*ch),
                Item::Atom { source, .. } => out.push_str(source),
            }
        }
        out
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn highlight(&self) -> Option<SelectionRange> {
        self.highlight
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Refuse structured transactions while still accepting plain-text inserts.
    pub fn reject_transactions(&mut self, reject: bool) {
        self.reject_transactions = reject;
    }

    pub fn scroll_to(&mut self, scroll_top: f32) {
        self.scroll_top = scroll_top.max(0.0);
    }

    pub fn set_selection(&mut self, anchor: Offset, head: Offset) {
        let size = self.size();
        self.selection = LiveSelection::new(anchor.min(size), head.min(size));
        self.notify(DocumentEvent::SelectionChanged(self.selection));
    }

    /// First occurrence of `needle` in the text, as a range.
    pub fn find_text(&self, needle: &str) -> Option<SelectionRange> {
        let needle: Vec<char> = needle.chars().collect();
        if needle.is_empty() || needle.len() > self.items.len() {
            return None;
        }
        (0..=self.items.len() - needle.len())
            .find(|&start| {
                needle
                    .iter()
                    .enumerate()
                    .all(|(i, ch)| self.items[start + i] == Item::Char(*ch))
            })
            .map(|start| SelectionRange::new(start, start + needle.len()))
    }

    /// User typing: insert literal text and move the cursor after it.
    pub fn insert_text(&mut self, pos: Offset, text: &str) -> Result<(), DocumentError> {
        self.insert_plain_text(pos, text)?;
        let end = pos + text.chars().count();
        self.selection = LiveSelection::new(end, end);
        Ok(())
    }

    pub fn delete_range(&mut self, from: Offset, to: Offset) -> Result<(), DocumentError> {
        self.apply(&Transaction::new().delete(from, to))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.selection = LiveSelection::default();
        self.commit_change();
    }

    fn notify(&mut self, event: DocumentEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn commit_change(&mut self) {
        self.version += 1;
        let size = self.size();
        self.selection = LiveSelection::new(
            self.selection.anchor.min(size),
            self.selection.head.min(size),
        );
        self.notify(DocumentEvent::ContentChanged {
            version: self.version,
        });
    }

    fn check_writable(&self) -> Result<(), DocumentError> {
        if self.read_only {
            return Err(DocumentError::ReadOnly);
        }
        Ok(())
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentModel for MemoryDocument {
    fn selection(&self) -> LiveSelection {
        self.selection
    }

    fn size(&self) -> Offset {
        self.items.len()
    }

    fn node_at(&self, pos: Offset) -> NodeKind {
        match self.items.get(pos) {
            Some(Item::Atom { kind, .. }) => NodeKind::Atom(*kind),
            _ => NodeKind::Text,
        }
    }

    fn text_between(&self, from: Offset, to: Offset) -> String {
        let to = to.min(self.items.len());
        let from = from.min(to);
        let mut out = String::new();
        for item in &self.items[from..to] {
            match item {
                Item::Char(ch) => out.push(*ch),
                Item::Atom { source, .. } => out.push_str(source),
            }
        }
        out
    }

    fn apply(&mut self, tx: &Transaction) -> Result<(), DocumentError> {
        self.check_writable()?;
        if self.reject_transactions {
            return Err(DocumentError::Rejected("schema refused structured content".into()));
        }

        let mut items = self.items.clone();
        let mut cursor = None;
        for step in tx.steps() {
            match step {
                Step::Delete { from, to } => {
                    if from > to || *to > items.len() {
                        return Err(DocumentError::OutOfBounds {
                            pos: *to,
                            size: items.len(),
                        });
                    }
                    items.drain(*from..*to);
                    cursor = Some(*from);
                }
                Step::Insert { at, content } => {
                    if *at > items.len() {
                        return Err(DocumentError::OutOfBounds {
                            pos: *at,
                            size: items.len(),
                        });
                    }
                    let inserted = items_from_markdown(content);
                    let end = at + inserted.len();
                    items.splice(*at..*at, inserted);
                    cursor = Some(end);
                }
            }
        }

        self.items = items;
        if let Some(pos) = cursor {
            self.selection = LiveSelection::new(pos, pos);
        }
        self.commit_change();
        Ok(())
    }

    fn insert_plain_text(&mut self, pos: Offset, text: &str) -> Result<(), DocumentError> {
        self.check_writable()?;
        if pos > self.items.len() {
            return Err(DocumentError::OutOfBounds {
                pos,
                size: self.items.len(),
            });
        }
        self.items.splice(pos..pos, text.chars().map(Item::Char));
        self.commit_change();
        Ok(())
    }

    fn coords_at_pos(&self, pos: Offset) -> Option<ScreenPoint> {
        if pos > self.items.len() {
            return None;
        }
        let mut line = 0usize;
        let mut column = 0usize;
        for item in &self.items[..pos] {
            match item {
                Item::Char('\n') => {
                    line += 1;
                    column = 0;
                }
                _ => column += 1,
            }
        }
        Some(ScreenPoint {
            x: self.metrics.padding_left + column as f32 * self.metrics.cell_width,
            y: self.metrics.padding_top + line as f32 * self.metrics.line_height - self.scroll_top,
        })
    }

    fn set_highlight(&mut self, range: Option<SelectionRange>) {
        self.highlight = range;
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DocumentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }
}
