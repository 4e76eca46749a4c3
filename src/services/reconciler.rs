//! Line-buffered reconciliation of a streamed completion.
//!
//! Chunks arrive with arbitrary boundaries. Only complete lines are released
//! so the preview never renders half a markup token; the remainder is
//! released when the stream ends.

#[derive(Debug, Default)]
pub struct StreamReconciler {
    pending: String,
    cancelled: bool,
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the newly completed lines (each ending in
    /// `\n`), or `None` if no line completed.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.cancelled {
            return None;
        }
        self.pending.push_str(chunk);
        let cut = self.pending.rfind('\n')? + 1;
        let rest = self.pending.split_off(cut);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// End of stream: release whatever is left, complete line or not.
    pub fn finish(&mut self) -> Option<String> {
        if self.cancelled || self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// Drop buffered data and ignore everything pushed afterwards.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.pending.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
