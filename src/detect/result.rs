use serde::{Deserialize, Serialize};

/// Pixel-space bounding box, corners `(x1, y1)` and `(x2, y2)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// One candidate item reported by a detector for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Lowercased class label, matched against catalog keys.
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into().trim().to_lowercase(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    /// Detection with a placeholder box, for scripted backends.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self::new(label, 1.0, BoundingBox::default())
    }
}
