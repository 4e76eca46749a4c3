use crate::document::{DocumentModel, NodeKind};
use crate::error::{AssistError, Result};
use crate::models::{LiveSelection, ScreenPoint, SelectionRange, Viewport};

/// Holds the range an AI interaction targets.
///
/// The frozen copy is authoritative for the whole request; the live
/// selection is only consulted again as a cancellation signal.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    frozen: Option<SelectionRange>,
    /// Text under the frozen range when it was captured.
    covered: String,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the live selection, refusing ranges that cover an atomic node.
    pub fn freeze(&mut self, document: &mut dyn DocumentModel) -> Result<SelectionRange> {
        let live = document.selection();
        let size = document.size();
        let range = SelectionRange::new(live.from().min(size), live.to().min(size));

        if let Some(kind) = (range.from..range.to).find_map(|pos| match document.node_at(pos) {
            NodeKind::Atom(kind) => Some(kind),
            NodeKind::Text => None,
        }) {
            tracing::debug!(from = range.from, to = range.to, ?kind, "refusing to freeze atomic node");
            return Err(AssistError::InvalidTarget(kind.describe().to_string()));
        }

        document.set_highlight(Some(range));
        self.frozen = Some(range);
        self.covered = document.text_between(range.from, range.to);
        tracing::debug!(from = range.from, to = range.to, "froze selection");
        Ok(range)
    }

    /// Re-freeze a range kept from an earlier request.
    pub fn restore(&mut self, document: &mut dyn DocumentModel, range: SelectionRange, covered: String) {
        document.set_highlight(Some(range));
        self.frozen = Some(range);
        self.covered = covered;
    }

    pub fn frozen(&self) -> Option<SelectionRange> {
        self.frozen
    }

    pub fn covered(&self) -> &str {
        &self.covered
    }

    /// Anchor point for floating UI, kept inside the visible editing surface.
    pub fn recompute_position(
        document: &dyn DocumentModel,
        range: SelectionRange,
        viewport: &Viewport,
    ) -> ScreenPoint {
        let point = document
            .coords_at_pos(range.to.min(document.size()))
            .unwrap_or(ScreenPoint {
                x: viewport.left,
                y: viewport.top,
            });
        viewport.clamp(point)
    }

    pub fn release(&mut self, document: &mut dyn DocumentModel) {
        self.covered.clear();
        if self.frozen.take().is_some() {
            document.set_highlight(None);
        }
    }

    /// A non-empty frozen range loses its meaning once the live selection collapses.
    pub fn is_invalidated_by(&self, live: LiveSelection) -> bool {
        matches!(self.frozen, Some(range) if !range.is_cursor()) && live.is_empty()
    }
}
