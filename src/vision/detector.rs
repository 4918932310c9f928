//! YOLO frame detector
//!
//! Letterboxes a captured frame, runs the detector network, and turns the raw
//! output rows into class-agnostic NMS'd detections in source-frame pixels.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::bbox::BoundingBox;
use super::error::DetectorError;
use super::models::{InferenceBackend, ModelOutput, OnnxSession};
use super::preprocess::{letterbox, rgba_to_rgb, to_input_tensor, Letterbox};
use super::{Detection, DetectionClass};
use crate::capture::frame::CapturedFrame;

/// Number of box coordinates preceding the class scores in each output row
const BOX_ATTRS: usize = 4;

/// Detector tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Minimum class confidence for a candidate (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// IoU at or above which the weaker of two boxes is suppressed
    pub iou_threshold: f32,
    /// Maximum detections kept per frame
    pub max_detections: usize,
    /// Model input size used when the model declares dynamic dimensions
    pub input_size: u32,
    /// Try hardware execution providers before CPU
    pub use_gpu: bool,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 100,
            input_size: 640,
            use_gpu: true,
            intra_threads: 4,
        }
    }
}

/// Per-stage timing of one detection run
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub preprocess: Duration,
    pub inference: Duration,
    pub postprocess: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.preprocess + self.inference + self.postprocess
    }
}

/// Detections plus timing diagnostics
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    pub timings: StageTimings,
}

/// Per-frame detection as used by the scan loop
pub trait ObjectDetector {
    /// Detect objects in a frame. Transient failures yield an empty list.
    fn detect_stream(&mut self, frame: &CapturedFrame) -> Vec<Detection>;
}

/// YOLO detector over an inference backend
pub struct FrameDetector {
    backend: Box<dyn InferenceBackend>,
    params: DetectorParams,
}

impl FrameDetector {
    /// Load the ONNX model. Failure here is fatal for detection.
    pub fn load(model_path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        let session = OnnxSession::new(
            model_path,
            params.use_gpu,
            params.intra_threads,
            (params.input_size, params.input_size),
        )?;

        Ok(Self::with_backend(Box::new(session), params))
    }

    /// Create a detector over an existing backend
    pub fn with_backend(backend: Box<dyn InferenceBackend>, params: DetectorParams) -> Self {
        Self { backend, params }
    }

    /// Current parameters
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Full pipeline with per-stage timings, for diagnostics
    pub fn detect(&mut self, frame: &CapturedFrame) -> DetectionReport {
        let mut timings = StageTimings::default();

        let detections = match self.run_pipeline(frame, Some(&mut timings)) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection failed: {}", e);
                Vec::new()
            }
        };

        info!(
            "Detection: {} objects in {:?} (pre {:?}, infer {:?}, post {:?})",
            detections.len(),
            timings.total(),
            timings.preprocess,
            timings.inference,
            timings.postprocess
        );

        DetectionReport { detections, timings }
    }

    fn run_pipeline(
        &mut self,
        frame: &CapturedFrame,
        mut timings: Option<&mut StageTimings>,
    ) -> Result<Vec<Detection>, DetectorError> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let (target_w, target_h) = self.backend.input_size();
        let rgb = rgba_to_rgb(&frame.data, frame.width, frame.height);
        let (canvas, geometry) = letterbox(&rgb, target_w, target_h);
        let input = to_input_tensor(&canvas);
        if let Some(t) = timings.as_deref_mut() {
            t.preprocess = start.elapsed();
        }

        let start = Instant::now();
        let output = self.backend.run(input)?;
        if let Some(t) = timings.as_deref_mut() {
            t.inference = start.elapsed();
        }

        let start = Instant::now();
        let candidates = decode_output(&output, &geometry, self.params.confidence_threshold)?;
        let detections = non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        );
        if let Some(t) = timings.as_deref_mut() {
            t.postprocess = start.elapsed();
        }

        Ok(detections)
    }
}

impl ObjectDetector for FrameDetector {
    fn detect_stream(&mut self, frame: &CapturedFrame) -> Vec<Detection> {
        match self.run_pipeline(frame, None) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Inference failed for frame, skipping: {}", e);
                Vec::new()
            }
        }
    }
}

/// Decode raw YOLO rows into thresholded detections in source-frame pixels.
///
/// Accepts both `[1, 4 + C, N]` and `[1, N, 4 + C]` layouts.
pub fn decode_output(
    output: &ModelOutput,
    geometry: &Letterbox,
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    // Only the leading batch dimension is dropped; a single candidate row stays 2-D
    let (a, b) = match output.shape.as_slice() {
        [1, a, b] | [a, b] => ((*a).max(0) as usize, (*b).max(0) as usize),
        [] => return Ok(Vec::new()),
        _ => return Err(DetectorError::OutputShape(output.shape.clone())),
    };

    if a * b == 0 {
        return Ok(Vec::new());
    }
    if output.data.len() < a * b {
        return Err(DetectorError::OutputShape(output.shape.clone()));
    }

    // Prefer the dimension matching the known row width, else the smaller one is attributes
    let row_width = BOX_ATTRS + DetectionClass::ALL.len();
    let attrs_major = if a == row_width {
        true
    } else if b == row_width {
        false
    } else {
        a <= b
    };
    let (num_attrs, num_rows) = if attrs_major { (a, b) } else { (b, a) };
    if num_attrs <= BOX_ATTRS {
        return Err(DetectorError::OutputShape(output.shape.clone()));
    }

    let value = |row: usize, attr: usize| -> f32 {
        if attrs_major {
            output.data[attr * num_rows + row]
        } else {
            output.data[row * num_attrs + attr]
        }
    };

    let mut detections = Vec::new();

    for row in 0..num_rows {
        let mut best_score = f32::MIN;
        let mut best_class = 0usize;
        for c in BOX_ATTRS..num_attrs {
            let score = value(row, c);
            if score > best_score {
                best_score = score;
                best_class = c - BOX_ATTRS;
            }
        }

        let confidence = best_score.min(1.0);
        if confidence < confidence_threshold {
            continue;
        }

        let Some(class) = DetectionClass::from_id(best_class) else {
            continue;
        };

        let (cx, cy, w, h) = (value(row, 0), value(row, 1), value(row, 2), value(row, 3));
        let (x1, y1) = geometry.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = geometry.to_source(cx + w / 2.0, cy + h / 2.0);

        let max_x = geometry.source_width as f32;
        let max_y = geometry.source_height as f32;
        let bbox = BoundingBox::from_corners(
            x1.clamp(0.0, max_x).round() as i32,
            y1.clamp(0.0, max_y).round() as i32,
            x2.clamp(0.0, max_x).round() as i32,
            y2.clamp(0.0, max_y).round() as i32,
        );

        if bbox.area() == 0 {
            continue;
        }

        detections.push(Detection::new(class, confidence, bbox));
    }

    debug!("Decoded {} candidates from {} rows", detections.len(), num_rows);
    Ok(detections)
}

/// Class-agnostic non-maximum suppression, highest confidence first
pub fn non_max_suppression(
    mut detections: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.len() >= max_detections {
            break;
        }
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) < iou_threshold) {
            kept.push(det);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    const NUM_CLASSES: usize = 10;

    /// Backend returning a fixed attribute-major output
    struct StubBackend {
        rows: Vec<[f32; BOX_ATTRS + NUM_CLASSES]>,
        fail: bool,
    }

    impl InferenceBackend for StubBackend {
        fn input_size(&self) -> (u32, u32) {
            (640, 640)
        }

        fn run(&mut self, input: Array4<f32>) -> Result<ModelOutput, DetectorError> {
            assert_eq!(input.shape(), &[1, 3, 640, 640]);
            if self.fail {
                return Err(DetectorError::OutputShape(vec![0]));
            }
            let attrs = BOX_ATTRS + NUM_CLASSES;
            let n = self.rows.len();
            let mut data = vec![0.0; attrs * n];
            for (i, row) in self.rows.iter().enumerate() {
                for (a, v) in row.iter().enumerate() {
                    data[a * n + i] = *v;
                }
            }
            Ok(ModelOutput {
                shape: vec![1, attrs as i64, n as i64],
                data,
            })
        }
    }

    fn row(cx: f32, cy: f32, w: f32, h: f32, class: usize, score: f32) -> [f32; BOX_ATTRS + NUM_CLASSES] {
        let mut r = [0.0; BOX_ATTRS + NUM_CLASSES];
        r[0] = cx;
        r[1] = cy;
        r[2] = w;
        r[3] = h;
        r[BOX_ATTRS + class] = score;
        r
    }

    fn frame(width: u32, height: u32) -> CapturedFrame {
        CapturedFrame::new(vec![0; (width * height * 4) as usize], width, height)
    }

    fn detector(rows: Vec<[f32; BOX_ATTRS + NUM_CLASSES]>) -> FrameDetector {
        FrameDetector::with_backend(Box::new(StubBackend { rows, fail: false }), DetectorParams::default())
    }

    #[test]
    fn test_single_item_detection() {
        let mut det = detector(vec![row(320.0, 320.0, 100.0, 200.0, 3, 0.95)]);
        let result = det.detect_stream(&frame(640, 640));

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class, DetectionClass::Item);
        assert_eq!(result[0].bbox, BoundingBox::new(270, 220, 100, 200));
        assert!(!result[0].is_monster_event);
    }

    #[test]
    fn test_boxes_are_mapped_back_through_letterbox() {
        // 1280x720 frame: ratio 0.5, 140px top padding
        let mut det = detector(vec![row(320.0, 320.0, 100.0, 100.0, 8, 0.9)]);
        let result = det.detect_stream(&frame(1280, 720));

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bbox, BoundingBox::new(540, 260, 200, 200));
    }

    #[test]
    fn test_low_confidence_rows_are_dropped() {
        let mut det = detector(vec![
            row(100.0, 100.0, 50.0, 50.0, 3, 0.2),
            row(300.0, 300.0, 50.0, 50.0, 3, 0.49),
        ]);
        assert!(det.detect_stream(&frame(640, 640)).is_empty());
    }

    #[test]
    fn test_empty_output_is_not_an_error() {
        let mut det = detector(vec![]);
        assert!(det.detect_stream(&frame(640, 640)).is_empty());
    }

    #[test]
    fn test_inference_failure_yields_empty() {
        let mut det = FrameDetector::with_backend(
            Box::new(StubBackend { rows: vec![], fail: true }),
            DetectorParams::default(),
        );
        assert!(det.detect_stream(&frame(640, 640)).is_empty());
        assert!(det.detect(&frame(640, 640)).detections.is_empty());
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let mut det = detector(vec![
            row(200.0, 200.0, 100.0, 100.0, 3, 0.7),
            row(205.0, 205.0, 100.0, 100.0, 8, 0.9),
            row(500.0, 500.0, 80.0, 80.0, 2, 0.6),
        ]);
        let result = det.detect(&frame(640, 640)).detections;

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].class, DetectionClass::Skill);
        assert_eq!(result[1].class, DetectionClass::Event);
    }

    #[test]
    fn test_stream_output_respects_thresholds() {
        // Deterministic spread of overlapping and isolated candidates
        let mut rows = Vec::new();
        let mut seed = 17u32;
        for _ in 0..60 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let cx = 50.0 + (seed % 540) as f32;
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let cy = 50.0 + (seed % 540) as f32;
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let score = (seed % 100) as f32 / 100.0;
            rows.push(row(cx, cy, 80.0, 80.0, (seed % 10) as usize, score));
        }

        let params = DetectorParams::default();
        let mut det = detector(rows);
        let result = det.detect_stream(&frame(640, 640));

        for (i, a) in result.iter().enumerate() {
            assert!(a.confidence >= params.confidence_threshold);
            for b in &result[i + 1..] {
                assert!(a.bbox.iou(&b.bbox) < params.iou_threshold);
            }
        }

        // NMS is idempotent
        let again = non_max_suppression(result.clone(), params.iou_threshold, params.max_detections);
        assert_eq!(again, result);
    }

    #[test]
    fn test_row_major_layout_is_accepted() {
        let attrs = BOX_ATTRS + NUM_CLASSES;
        let r = row(320.0, 320.0, 64.0, 64.0, 4, 0.8);
        let output = ModelOutput {
            shape: vec![1, 20, attrs as i64],
            data: r.iter().copied().chain(std::iter::repeat(0.0).take(19 * attrs)).collect(),
        };
        let geometry = Letterbox::compute(640, 640, 640, 640);

        let result = decode_output(&output, &geometry, 0.5).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class, DetectionClass::MonsterIcon);
    }

    #[test]
    fn test_single_candidate_row_is_decoded() {
        let r = row(320.0, 320.0, 64.0, 64.0, 3, 0.8);
        let output = ModelOutput {
            shape: vec![1, 1, (BOX_ATTRS + NUM_CLASSES) as i64],
            data: r.to_vec(),
        };
        let geometry = Letterbox::compute(640, 640, 640, 640);

        let result = decode_output(&output, &geometry, 0.5).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class, DetectionClass::Item);
        assert_eq!(result[0].bbox, BoundingBox::new(288, 288, 64, 64));
    }

    #[test]
    fn test_threshold_applies_to_clamped_confidence() {
        let r = row(320.0, 320.0, 64.0, 64.0, 3, 1.7);
        let output = ModelOutput {
            shape: vec![1, (BOX_ATTRS + NUM_CLASSES) as i64, 1],
            data: r.to_vec(),
        };
        let geometry = Letterbox::compute(640, 640, 640, 640);

        assert!(decode_output(&output, &geometry, 1.5).unwrap().is_empty());
        let kept = decode_output(&output, &geometry, 1.0).unwrap();
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bad_shape_is_an_error() {
        let output = ModelOutput {
            shape: vec![1, 3, 2],
            data: vec![0.0; 6],
        };
        let geometry = Letterbox::compute(640, 640, 640, 640);
        assert!(decode_output(&output, &geometry, 0.5).is_err());
    }
}
