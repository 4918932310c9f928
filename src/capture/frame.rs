//! Frame data structures for captured screen content

use image::{RgbImage, RgbaImage};
use std::time::Instant;

use crate::vision::BoundingBox;

/// A captured frame from the game window
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl CapturedFrame {
    /// Create a new captured frame
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an RGBA image
    pub fn from_rgba(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGB crop of a box, clamped to the frame. `None` if nothing is left.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let clamped = bbox.clamp_to(self.width, self.height)?;
        let (x0, y0) = (clamped.x as u32, clamped.y as u32);
        let (w, h) = (clamped.width as u32, clamped.height as u32);

        let stride = self.width as usize * 4;
        let mut out = RgbImage::new(w, h);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let idx = (y0 + y) as usize * stride + (x0 + x) as usize * 4;
            if let Some(px) = self.data.get(idx..idx + 3) {
                *pixel = image::Rgb([px[0], px[1], px[2]]);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> CapturedFrame {
        let image = RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, 7, 255]));
        CapturedFrame::from_rgba(image)
    }

    #[test]
    fn test_crop_inside_frame() {
        let frame = gradient(50, 40);
        let crop = frame.crop(&BoundingBox::new(10, 5, 20, 10)).unwrap();

        assert_eq!(crop.dimensions(), (20, 10));
        assert_eq!(crop.get_pixel(0, 0), &image::Rgb([10, 5, 7]));
        assert_eq!(crop.get_pixel(19, 9), &image::Rgb([29, 14, 7]));
    }

    #[test]
    fn test_crop_is_clamped() {
        let frame = gradient(50, 40);
        let crop = frame.crop(&BoundingBox::new(40, -5, 30, 20)).unwrap();
        assert_eq!(crop.dimensions(), (10, 15));
        assert_eq!(crop.get_pixel(0, 0), &image::Rgb([40, 0, 7]));
    }

    #[test]
    fn test_crop_outside_frame_is_none() {
        let frame = gradient(50, 40);
        assert!(frame.crop(&BoundingBox::new(60, 60, 10, 10)).is_none());
    }
}
