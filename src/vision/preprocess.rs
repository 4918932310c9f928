//! Image preprocessing for the YOLO detector
//!
//! Handles letterbox resizing, normalization, and tensor conversion.

use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;

/// Gray used to pad the letterbox border
pub const LETTERBOX_FILL: u8 = 114;

/// Geometry of a letterbox transform, used to map model boxes back to the source frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Uniform scale applied to the source image
    pub ratio: f32,
    /// Horizontal padding (left) in model pixels
    pub pad_x: u32,
    /// Vertical padding (top) in model pixels
    pub pad_y: u32,
    /// Source image dimensions
    pub source_width: u32,
    pub source_height: u32,
    /// Scaled image dimensions inside the padded canvas
    pub scaled_width: u32,
    pub scaled_height: u32,
}

impl Letterbox {
    /// Compute the transform that fits `src` into a `target` canvas without distortion
    pub fn compute(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> Self {
        let (target_width, target_height) = (target_width.max(1), target_height.max(1));
        let ratio = (target_width as f32 / src_width.max(1) as f32)
            .min(target_height as f32 / src_height.max(1) as f32);

        let scaled_width = ((src_width as f32 * ratio).round() as u32).clamp(1, target_width);
        let scaled_height = ((src_height as f32 * ratio).round() as u32).clamp(1, target_height);

        Self {
            ratio,
            pad_x: (target_width - scaled_width) / 2,
            pad_y: (target_height - scaled_height) / 2,
            source_width: src_width,
            source_height: src_height,
            scaled_width,
            scaled_height,
        }
    }

    /// Map a point in model space back to source-frame pixels
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.ratio,
            (y - self.pad_y as f32) / self.ratio,
        )
    }
}

/// Convert RGBA capture data to an RGB image
/// Note: CapturedFrame stores data as RGBA
pub fn rgba_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let mut rgb = RgbImage::new(width, height);

    for (i, pixel) in rgb.pixels_mut().enumerate() {
        let idx = i * 4;
        if idx + 2 < data.len() {
            *pixel = Rgb([data[idx], data[idx + 1], data[idx + 2]]);
        }
    }

    rgb
}

/// Scale-preserving resize onto a gray `target_width` x `target_height` canvas
pub fn letterbox(image: &RgbImage, target_width: u32, target_height: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let geometry = Letterbox::compute(width, height, target_width, target_height);

    let mut canvas = RgbImage::from_pixel(
        target_width,
        target_height,
        Rgb([LETTERBOX_FILL, LETTERBOX_FILL, LETTERBOX_FILL]),
    );

    if (geometry.scaled_width, geometry.scaled_height) == (width, height) {
        image::imageops::replace(&mut canvas, image, geometry.pad_x as i64, geometry.pad_y as i64);
    } else {
        let resized = image::imageops::resize(
            image,
            geometry.scaled_width,
            geometry.scaled_height,
            FilterType::Triangle,
        );
        image::imageops::replace(&mut canvas, &resized, geometry.pad_x as i64, geometry.pad_y as i64);
    }

    (canvas, geometry)
}

/// Convert an RGB image to an NCHW tensor (batch size 1) normalized to [0, 1]
pub fn to_input_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_geometry_wide_frame() {
        let lb = Letterbox::compute(1280, 720, 640, 640);
        assert!((lb.ratio - 0.5).abs() < 1e-6);
        assert_eq!((lb.scaled_width, lb.scaled_height), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 140));
    }

    #[test]
    fn test_letterbox_zero_target_does_not_panic() {
        let lb = Letterbox::compute(1280, 720, 0, 0);
        assert_eq!((lb.scaled_width, lb.scaled_height), (1, 1));
    }

    #[test]
    fn test_letterbox_inverse_mapping() {
        let lb = Letterbox::compute(1280, 720, 640, 640);
        let (x, y) = lb.to_source(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_pads_with_gray() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (canvas, lb) = letterbox(&image, 64, 64);

        assert_eq!(canvas.dimensions(), (64, 64));
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([LETTERBOX_FILL; 3]));
        let center = canvas.get_pixel(32, lb.pad_y + lb.scaled_height / 2);
        assert!(center[0] > 200 && center[1] < 50);
    }

    #[test]
    fn test_rgba_to_rgb_drops_alpha() {
        let data = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let rgb = rgba_to_rgb(&data, 2, 1);
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([40, 50, 60]));
    }

    #[test]
    fn test_input_tensor_is_normalized_nchw() {
        let image = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
        let tensor = to_input_tensor(&image);

        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert!((tensor[[0, 0, 1, 3]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }
}
