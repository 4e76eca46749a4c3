use serde::{Deserialize, Serialize};

/// Position in the document's linear position space.
pub type Offset = usize;

/// A frozen target range for one AI request/response cycle.
///
/// `from == to` denotes a cursor insertion point rather than a replace-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRange {
    pub from: Offset,
    pub to: Offset,
}

impl SelectionRange {
    /// Build a range from two ends in any order.
    pub fn new(a: Offset, b: Offset) -> Self {
        Self {
            from: a.min(b),
            to: a.max(b),
        }
    }

    pub fn cursor(at: Offset) -> Self {
        Self { from: at, to: at }
    }

    pub fn is_cursor(&self) -> bool {
        self.from == self.to
    }

    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.is_cursor()
    }

    pub fn fits_within(&self, size: Offset) -> bool {
        self.to <= size
    }
}

/// The editor's live selection as reported by the document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSelection {
    pub anchor: Offset,
    pub head: Offset,
}

impl LiveSelection {
    pub fn new(anchor: Offset, head: Offset) -> Self {
        Self { anchor, head }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.head
    }

    pub fn from(&self) -> Offset {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> Offset {
        self.anchor.max(self.head)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

/// Visible bounds of the editing surface in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn clamp(&self, point: ScreenPoint) -> ScreenPoint {
        ScreenPoint {
            x: point.x.clamp(self.left, self.left + self.width),
            y: point.y.clamp(self.top, self.top + self.height),
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 800.0, 600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_orders_backwards_ends() {
        let range = SelectionRange::new(9, 3);
        assert_eq!(range.from, 3);
        assert_eq!(range.to, 9);
        assert_eq!(range.len(), 6);
        assert!(!range.is_cursor());
    }

    #[test]
    fn viewport_clamps_both_axes() {
        let viewport = Viewport::new(10.0, 20.0, 100.0, 50.0);
        let clamped = viewport.clamp(ScreenPoint { x: 500.0, y: -4.0 });
        assert_eq!(clamped, ScreenPoint { x: 110.0, y: 20.0 });
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&LiveSelection::new(1, 4)).unwrap();
        assert_eq!(json, r#"{"anchor":1,"head":4}"#);
    }
}
