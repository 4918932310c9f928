//! ORB-style binary features
//!
//! FAST-9 corners on a small image pyramid, oriented by intensity centroid,
//! described by 256 rotated intensity comparisons on a smoothed patch.

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// 256-bit binary descriptor
pub type Descriptor = [u8; 32];

/// Number of bit tests per descriptor
const DESCRIPTOR_BITS: usize = 256;
/// Side of the square patch the bit tests and orientation are computed on
pub const PATCH_SIZE: i32 = 31;
/// Sampling pattern half-width
const PATCH_HALF: i32 = PATCH_SIZE / 2;
/// Radius of the orientation disc
const ORIENTATION_RADIUS: i32 = PATCH_SIZE / 2;
/// Keypoints closer than this to the border cannot be described
pub const EDGE_THRESHOLD: u32 = 31;
/// Smoothing applied before the bit tests
const BLUR_SIGMA: f32 = 2.0;

/// Hamming distance between two descriptors
#[inline]
pub fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Extractor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Feature budget across all pyramid levels
    pub nfeatures: usize,
    /// Downscale factor between pyramid levels
    pub scale_factor: f32,
    /// Number of pyramid levels
    pub nlevels: usize,
    /// FAST intensity threshold
    pub fast_threshold: u8,
    /// Non-maximum suppression radius for corners
    pub nms_radius: u32,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            nfeatures: 500,
            scale_factor: 1.2,
            nlevels: 8,
            fast_threshold: 20,
            nms_radius: 3,
        }
    }
}

impl OrbParams {
    /// Stable textual form, part of the cache fingerprint
    pub fn signature(&self) -> String {
        format!(
            "orb:n={};s={:.3};l={};t={};r={};bits={};patch={};edge={}",
            self.nfeatures,
            self.scale_factor,
            self.nlevels,
            self.fast_threshold,
            self.nms_radius,
            DESCRIPTOR_BITS,
            PATCH_SIZE,
            EDGE_THRESHOLD
        )
    }
}

/// An oriented keypoint in level-0 pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians
    pub angle: f32,
    /// FAST score
    pub response: f32,
    /// Pyramid level the keypoint was found on
    pub octave: u8,
}

/// Keypoints with their descriptors, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Sampling pairs (x1, y1, x2, y2), generated once from a fixed seed
fn sampling_pattern() -> &'static [[i8; 4]; DESCRIPTOR_BITS] {
    static PATTERN: OnceLock<[[i8; 4]; DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state: u32 = 0x9E37_79B9;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            ((state % (2 * PATCH_HALF as u32 + 1)) as i32 - PATCH_HALF) as i8
        };

        let mut pattern = [[0i8; 4]; DESCRIPTOR_BITS];
        for pair in pattern.iter_mut() {
            loop {
                *pair = [next(), next(), next(), next()];
                if pair[0..2] != pair[2..4] {
                    break;
                }
            }
        }
        pattern
    })
}

/// Deterministic ORB-style feature extractor
#[derive(Debug, Clone, Default)]
pub struct OrbExtractor {
    params: OrbParams,
}

impl OrbExtractor {
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OrbParams {
        &self.params
    }

    /// Extract features from any decoded image
    pub fn extract_dynamic(&self, image: &DynamicImage) -> FeatureSet {
        self.extract_gray(&image.to_luma8())
    }

    /// Extract features from an RGB image
    pub fn extract_rgb(&self, image: &RgbImage) -> FeatureSet {
        self.extract_gray(&image::imageops::grayscale(image))
    }

    /// Extract features from a grayscale image
    pub fn extract_gray(&self, gray: &GrayImage) -> FeatureSet {
        let mut features = FeatureSet::default();
        let min_side = 2 * EDGE_THRESHOLD + 1;

        let levels = self.params.nlevels.max(1);
        let budgets = self.level_budgets(levels);
        let mut scale = 1.0f32;

        for (octave, budget) in budgets.into_iter().enumerate() {
            let width = (gray.width() as f32 / scale).round() as u32;
            let height = (gray.height() as f32 / scale).round() as u32;
            if width < min_side || height < min_side {
                break;
            }

            let level = if octave == 0 {
                gray.clone()
            } else {
                image::imageops::resize(gray, width, height, image::imageops::FilterType::Triangle)
            };

            self.extract_level(&level, octave as u8, scale, budget, &mut features);
            scale *= self.params.scale_factor;
        }

        features
    }

    /// Split the feature budget across levels, geometrically decreasing
    fn level_budgets(&self, levels: usize) -> Vec<usize> {
        let factor = 1.0 / self.params.scale_factor.max(1.0001);
        let first = self.params.nfeatures as f32 * (1.0 - factor) / (1.0 - factor.powi(levels as i32));

        let mut budgets = Vec::with_capacity(levels);
        let mut assigned = 0;
        let mut per_level = first;
        for _ in 0..levels.saturating_sub(1) {
            let n = (per_level.round() as usize).min(self.params.nfeatures - assigned);
            budgets.push(n);
            assigned += n;
            per_level *= factor;
        }
        budgets.push(self.params.nfeatures - assigned);
        budgets
    }

    fn extract_level(
        &self,
        level: &GrayImage,
        octave: u8,
        scale: f32,
        budget: usize,
        out: &mut FeatureSet,
    ) {
        if budget == 0 {
            return;
        }

        let (width, height) = level.dimensions();
        let corners: Vec<Corner> = corners_fast9(level, self.params.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= EDGE_THRESHOLD
                    && c.y >= EDGE_THRESHOLD
                    && c.x < width - EDGE_THRESHOLD
                    && c.y < height - EDGE_THRESHOLD
            })
            .collect();

        let mut corners = suppress_non_maxima(corners, width, height, self.params.nms_radius);
        corners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        corners.truncate(budget);

        if corners.is_empty() {
            return;
        }

        let smoothed = gaussian_blur_f32(level, BLUR_SIGMA);

        for corner in corners {
            let angle = intensity_centroid_angle(level, corner.x as i32, corner.y as i32);
            let descriptor = describe(&smoothed, corner.x as i32, corner.y as i32, angle);

            out.keypoints.push(Keypoint {
                x: corner.x as f32 * scale,
                y: corner.y as f32 * scale,
                angle,
                response: corner.score,
                octave,
            });
            out.descriptors.push(descriptor);
        }
    }
}

/// Keep corners that are the strongest within `radius`; ties go to the earlier pixel
fn suppress_non_maxima(corners: Vec<Corner>, width: u32, height: u32, radius: u32) -> Vec<Corner> {
    if radius == 0 || corners.is_empty() {
        return corners;
    }

    let mut grid = vec![f32::NEG_INFINITY; (width * height) as usize];
    for c in &corners {
        grid[(c.y * width + c.x) as usize] = c.score;
    }

    let r = radius as i64;
    corners
        .into_iter()
        .filter(|c| {
            let (cx, cy) = (c.x as i64, c.y as i64);
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (cx + dx, cy + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let other = grid[(ny * width as i64 + nx) as usize];
                    let earlier = (ny, nx) < (cy, cx);
                    if other > c.score || (other == c.score && earlier) {
                        return false;
                    }
                }
            }
            true
        })
        .collect()
}

fn intensity_centroid_angle(image: &GrayImage, cx: i32, cy: i32) -> f32 {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
    let (mut m01, mut m10) = (0.0f32, 0.0f32);

    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x < 0 || y < 0 || x >= width || y >= height {
                continue;
            }
            let value = image.get_pixel(x as u32, y as u32)[0] as f32;
            m10 += dx as f32 * value;
            m01 += dy as f32 * value;
        }
    }

    m01.atan2(m10)
}

fn describe(smoothed: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let (max_x, max_y) = (smoothed.width() as i32 - 1, smoothed.height() as i32 - 1);

    let sample = |px: i8, py: i8| -> u8 {
        let (px, py) = (px as f32, py as f32);
        let x = cx + (px * cos - py * sin).round() as i32;
        let y = cy + (px * sin + py * cos).round() as i32;
        smoothed.get_pixel(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)[0]
    };

    let mut descriptor = [0u8; 32];
    for (bit, pair) in sampling_pattern().iter().enumerate() {
        if sample(pair[0], pair[1]) < sample(pair[2], pair[3]) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}
