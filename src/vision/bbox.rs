//! Axis-aligned boxes and the overlap measures used by detection and hit-testing

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixels (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Create a new bounding box
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Create from top-left and bottom-right corners
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Box area in pixels (zero for degenerate boxes)
    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    /// Center point
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Whether a point lies inside the box
    pub fn contains_point(&self, px: i32, py: i32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Area shared by the two boxes
    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0;
        }

        (x2 - x1) as i64 * (y2 - y1) as i64
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;

        if union <= 0 {
            return 0.0;
        }

        intersection as f32 / union as f32
    }

    /// Fraction of `inner` covered by this box (intersection / inner area)
    pub fn overlap_ratio(&self, inner: &BoundingBox) -> f32 {
        let inner_area = inner.area();
        if inner_area == 0 {
            return 0.0;
        }

        self.intersection_area(inner) as f32 / inner_area as f32
    }

    /// Squared distance between the two box centers
    pub fn center_distance_sq(&self, other: &BoundingBox) -> i64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        let dx = (ax - bx) as i64;
        let dy = (ay - by) as i64;
        dx * dx + dy * dy
    }

    /// Height divided by width (0.0 for a zero-width box)
    pub fn aspect_ratio(&self) -> f32 {
        if self.width <= 0 {
            return 0.0;
        }
        self.height as f32 / self.width as f32
    }

    /// Clip the box to a `width` x `height` frame, `None` if nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x1 = self.x.clamp(0, width as i32);
        let y1 = self.y.clamp(0, height as i32);
        let x2 = self.right().clamp(0, width as i32);
        let y2 = self.bottom().clamp(0, height as i32);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(BoundingBox::from_corners(x1, y1, x2, y2))
    }
}
