//! Screen Capture Layer
//!
//! Frames are pulled from a `FrameSource` restricted to the game window region.
//! Capture is read-only; nothing is ever sent to the game.

pub mod frame;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use frame::CapturedFrame;

/// Screen rectangle in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with a `width` x `height` surface at the origin
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Region> {
        let x1 = self.x.clamp(0, width as i32);
        let y1 = self.y.clamp(0, height as i32);
        let x2 = (self.x + self.width as i32).clamp(0, width as i32);
        let y2 = (self.y + self.height as i32).clamp(0, height as i32);

        (x2 > x1 && y2 > y1).then(|| Region::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// Source of frames for the scan loop
pub trait FrameSource {
    /// Restrict capture to a screen region
    fn set_region(&mut self, region: Region);

    /// Grab the current region. `None` before a region is set or when capture fails.
    fn capture(&mut self) -> Option<CapturedFrame>;
}

/// Frame source over a fixed screen image, used offline and in tests
pub struct ImageFrameSource {
    screen: RgbaImage,
    region: Option<Region>,
}

impl ImageFrameSource {
    pub fn new(screen: RgbaImage) -> Self {
        Self { screen, region: None }
    }
}

impl FrameSource for ImageFrameSource {
    fn set_region(&mut self, region: Region) {
        self.region = Some(region);
    }

    fn capture(&mut self) -> Option<CapturedFrame> {
        let region = self
            .region?
            .clamp_to(self.screen.width(), self.screen.height())?;

        let view = image::imageops::crop_imm(
            &self.screen,
            region.x as u32,
            region.y as u32,
            region.width,
            region.height,
        );
        Some(CapturedFrame::from_rgba(view.to_image()))
    }
}
