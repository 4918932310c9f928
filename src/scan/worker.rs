//! One iteration of the scan loop
//!
//! `ScanWorker::step` runs a single pass of the state machine and returns how
//! long to wait before the next one. It takes the current time as an argument
//! so dwell and reload timing can be driven from tests.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::hit_test::{hit_test, mark_monster_events};
use super::hover::HoverTracker;
use super::ScanFactory;
use crate::capture::frame::CapturedFrame;
use crate::capture::FrameSource;
use crate::catalog::CatalogKind;
use crate::config::{load_config, AppConfig, SharedConfig};
use crate::platform::{InputPoller, WindowProvider};
use crate::shared::{EventEmitter, Recognition, ScanControl, ScanEvent};
use crate::vision::{Detection, DetectionClass, MatchResult, ObjectDetector, Recognizer, SizeCategory};

pub const STATUS_PAUSED: &str = "Paused";
pub const STATUS_WAITING: &str = "Waiting for game window";
pub const STATUS_BACKGROUND: &str = "Paused (background)";
pub const STATUS_INITIALIZING: &str = "Initializing...";
pub const STATUS_SCANNING: &str = "Scanning";

const IDLE_SLEEP: Duration = Duration::from_millis(500);
const WINDOW_BACKOFF_MIN: Duration = Duration::from_millis(500);
const WINDOW_BACKOFF_MAX: Duration = Duration::from_secs(5);
const INIT_BACKOFF: Duration = Duration::from_secs(1);
const CAPTURE_RETRY: Duration = Duration::from_millis(100);

struct Platform {
    window: Box<dyn WindowProvider>,
    input: Box<dyn InputPoller>,
}

struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Box<dyn ObjectDetector>,
    recognizer: Box<dyn Recognizer>,
}

/// Worker-thread state of the scan loop
pub struct ScanWorker<F: ScanFactory> {
    factory: F,
    shared_config: SharedConfig,
    config_path: Option<PathBuf>,
    control: Arc<ScanControl>,
    emitter: EventEmitter,
    config: AppConfig,
    last_reload: Option<Instant>,
    platform: Option<Platform>,
    pipeline: Option<Pipeline>,
    hover: HoverTracker,
    window_backoff: Duration,
}

impl<F: ScanFactory> ScanWorker<F> {
    pub fn new(
        factory: F,
        shared_config: SharedConfig,
        config_path: Option<PathBuf>,
        control: Arc<ScanControl>,
        emitter: EventEmitter,
    ) -> Self {
        let config = shared_config.read().clone();
        Self {
            factory,
            shared_config,
            config_path,
            control,
            emitter,
            config,
            last_reload: None,
            platform: None,
            pipeline: None,
            hover: HoverTracker::new(),
            window_backoff: WINDOW_BACKOFF_MIN,
        }
    }

    /// Run one iteration; the result is the pause before the next one
    pub fn step(&mut self, now: Instant) -> Result<Duration> {
        self.reload_config(now);

        if !self.config.scan.auto_scan_enabled || self.control.is_paused() {
            self.emitter.status(false, STATUS_PAUSED);
            return Ok(IDLE_SLEEP);
        }

        if self.platform.is_none() {
            self.platform = Some(Platform {
                window: self.factory.window_provider()?,
                input: self.factory.input_poller()?,
            });
        }
        let Some(platform) = self.platform.as_ref() else {
            return Ok(IDLE_SLEEP);
        };

        let title = self.config.general.game_window_title.as_str();
        let Some(rect) = platform.window.window_rect(title) else {
            self.emitter.status(false, STATUS_WAITING);
            let pause = self.window_backoff;
            self.window_backoff = (self.window_backoff * 2).min(WINDOW_BACKOFF_MAX);
            return Ok(pause);
        };
        self.window_backoff = WINDOW_BACKOFF_MIN;

        if !platform.window.is_focus_valid(title) {
            self.emitter.status(false, STATUS_BACKGROUND);
            if self.hover.reset() {
                self.emitter.emit(ScanEvent::HideDetail);
            }
            return Ok(IDLE_SLEEP);
        }

        if self.pipeline.is_none() {
            match Self::init_pipeline(&mut self.factory, &self.config) {
                Ok(pipeline) => {
                    info!("Scan pipeline initialized");
                    self.pipeline = Some(pipeline);
                }
                Err(e) => {
                    warn!("Pipeline initialization failed, retrying: {:#}", e);
                    self.emitter.status(false, STATUS_INITIALIZING);
                    return Ok(INIT_BACKOFF);
                }
            }
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(INIT_BACKOFF);
        };

        pipeline.source.set_region(rect);
        let Some(frame) = pipeline.source.capture() else {
            debug!("Capture returned no frame");
            return Ok(CAPTURE_RETRY);
        };

        let mut detections = pipeline.detector.detect_stream(&frame);
        mark_monster_events(&mut detections);
        let count = detections.len();
        self.control.update_stats(|s| {
            s.frames_processed += 1;
            s.last_detection_count = count;
            s.clear_error();
        });
        self.emitter.emit(ScanEvent::ScanResultsUpdated {
            detections: detections.clone(),
        });
        self.emitter.status(true, STATUS_SCANNING);

        let (mx, my) = platform.window.mouse_pos_relative(rect.x, rect.y);
        let hit = hit_test(&detections, mx, my).cloned();

        let Some(hit) = hit else {
            if self.hover.reset() {
                self.emitter.emit(ScanEvent::HideDetail);
            }
            return Ok(self.config.scan.frame_interval());
        };

        self.hover.track(&hit, now, self.config.scan.jitter_px);

        if self.hover.is_due(now, self.config.scan.dwell()) {
            let recognition = self.recognize(&frame, &hit);
            self.hover.record(recognition.clone());

            if let Some(recognition) = recognition {
                self.emitter.emit(ScanEvent::pre_detected(&recognition));
                if self.config.scan.show_on_hover {
                    self.emitter.emit(ScanEvent::show(&recognition));
                    self.hover.mark_shown();
                }
            }
        }

        let hotkey_pressed = match (&self.config.scan.detail_hotkey, self.platform.as_ref()) {
            (Some(hotkey), Some(platform)) => platform.input.is_pressed(hotkey),
            _ => false,
        };

        if hotkey_pressed {
            // A failed attempt for this object is final until the cursor moves on
            let attempted = self
                .hover
                .state()
                .filter(|state| state.recognized)
                .map(|state| state.cached.clone());
            let recognition = match attempted {
                Some(cached) => cached,
                None => {
                    let fresh = self.recognize(&frame, &hit);
                    self.hover.record(fresh.clone());
                    fresh
                }
            };

            if let Some(recognition) = recognition {
                self.emitter.emit(ScanEvent::force_show(&recognition));
                self.hover.mark_shown();
                return Ok(self.config.scan.hotkey_debounce());
            }
        }

        Ok(self.config.scan.frame_interval())
    }

    fn reload_config(&mut self, now: Instant) {
        let due = self
            .last_reload
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.scan.config_reload());
        if !due {
            return;
        }
        self.last_reload = Some(now);

        if let Some(path) = &self.config_path {
            if path.exists() {
                match load_config(path) {
                    Ok(config) => *self.shared_config.write() = config,
                    Err(e) => warn!("Keeping previous configuration: {:#}", e),
                }
            }
        }

        self.config = self.shared_config.read().clone();
    }

    fn init_pipeline(factory: &mut F, config: &AppConfig) -> Result<Pipeline> {
        Ok(Pipeline {
            source: factory.frame_source()?,
            detector: factory.detector(config)?,
            recognizer: factory.recognizer(config)?,
        })
    }

    /// Crop the hit and run the matcher that fits its class
    fn recognize(&self, frame: &CapturedFrame, hit: &Detection) -> Option<Recognition> {
        let pipeline = self.pipeline.as_ref()?;
        let recognizer = pipeline.recognizer.as_ref();
        self.control.update_stats(|s| s.recognition_attempts += 1);

        let Some(crop) = frame.crop(&hit.bbox) else {
            debug!("Hit box {:?} lies outside the frame", hit.bbox);
            return None;
        };

        let (kind, results) = if hit.is_monster_event {
            (CatalogKind::Monster, recognizer.match_monster_character(&crop))
        } else {
            let kind = if hit.class == DetectionClass::Skill {
                CatalogKind::Skill
            } else {
                CatalogKind::Item
            };
            (kind, match_with_fallback(recognizer, &crop, SizeCategory::infer(&hit.bbox)))
        };

        let best = results.into_iter().next()?;
        let name = recognizer
            .name_of(&best.id)
            .unwrap_or_else(|| kind.fallback_label().to_string());

        info!("Recognized {} {} ({}) score {:.3}", kind, best.id, name, best.score);
        Some(Recognition {
            kind,
            id: best.id,
            name,
        })
    }
}

/// Inferred bucket first, then the buckets its shape is easily confused with
fn match_with_fallback(recognizer: &dyn Recognizer, crop: &image::RgbImage, size: SizeCategory) -> Vec<MatchResult> {
    let results = recognizer.match_item(crop, size);
    if !results.is_empty() {
        return results;
    }

    for neighbour in size.neighbours() {
        let results = recognizer.match_item(crop, *neighbour);
        if !results.is_empty() {
            debug!("Matched in {} bucket after {} had no candidate", neighbour, size);
            return results;
        }
    }

    Vec::new()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::capture::{ImageFrameSource, Region};
    use crate::hotkey::DetailHotkey;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Knobs shared between a test and the fakes it hands to the worker
    #[derive(Default)]
    pub struct Scene {
        pub window: Mutex<Option<Region>>,
        pub background: AtomicBool,
        pub cursor: Mutex<(i32, i32)>,
        pub hotkey_down: AtomicBool,
        pub detections: Mutex<Vec<Detection>>,
        pub item_answer: Mutex<Vec<MatchResult>>,
        pub monster_answer: Mutex<Vec<MatchResult>>,
        pub item_calls: Mutex<Vec<SizeCategory>>,
        pub monster_calls: AtomicUsize,
        pub fail_init: AtomicBool,
        pub fail_window: AtomicBool,
    }

    impl Scene {
        pub fn new() -> Arc<Self> {
            let scene = Self::default();
            *scene.window.lock() = Some(Region::new(100, 100, 800, 600));
            Arc::new(scene)
        }
    }

    struct FakeWindow(Arc<Scene>);

    impl WindowProvider for FakeWindow {
        fn window_rect(&self, _title: &str) -> Option<Region> {
            *self.0.window.lock()
        }

        fn mouse_pos_relative(&self, win_x: i32, win_y: i32) -> (i32, i32) {
            let (x, y) = *self.0.cursor.lock();
            (x - win_x, y - win_y)
        }

        fn is_focus_valid(&self, _title: &str) -> bool {
            !self.0.background.load(Ordering::SeqCst)
        }
    }

    struct FakeInput(Arc<Scene>);

    impl InputPoller for FakeInput {
        fn is_pressed(&self, _hotkey: &DetailHotkey) -> bool {
            self.0.hotkey_down.load(Ordering::SeqCst)
        }
    }

    struct FakeDetector(Arc<Scene>);

    impl ObjectDetector for FakeDetector {
        fn detect_stream(&mut self, _frame: &CapturedFrame) -> Vec<Detection> {
            self.0.detections.lock().clone()
        }
    }

    struct FakeRecognizer(Arc<Scene>);

    impl Recognizer for FakeRecognizer {
        fn match_item(&self, _crop: &image::RgbImage, size: SizeCategory) -> Vec<MatchResult> {
            self.0.item_calls.lock().push(size);
            self.0.item_answer.lock().clone()
        }

        fn match_monster_character(&self, _crop: &image::RgbImage) -> Vec<MatchResult> {
            self.0.monster_calls.fetch_add(1, Ordering::SeqCst);
            self.0.monster_answer.lock().clone()
        }

        fn name_of(&self, id: &str) -> Option<String> {
            (id != "nameless").then(|| id.to_uppercase())
        }
    }

    pub struct FakeFactory(pub Arc<Scene>);

    impl ScanFactory for FakeFactory {
        fn window_provider(&mut self) -> Result<Box<dyn WindowProvider>> {
            if self.0.fail_window.load(Ordering::SeqCst) {
                anyhow::bail!("window system unavailable");
            }
            Ok(Box::new(FakeWindow(self.0.clone())))
        }

        fn input_poller(&mut self) -> Result<Box<dyn InputPoller>> {
            Ok(Box::new(FakeInput(self.0.clone())))
        }

        fn frame_source(&mut self) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(ImageFrameSource::new(image::RgbaImage::new(1920, 1080))))
        }

        fn detector(&mut self, _config: &AppConfig) -> Result<Box<dyn ObjectDetector>> {
            if self.0.fail_init.load(Ordering::SeqCst) {
                anyhow::bail!("model missing");
            }
            Ok(Box::new(FakeDetector(self.0.clone())))
        }

        fn recognizer(&mut self, _config: &AppConfig) -> Result<Box<dyn Recognizer>> {
            Ok(Box::new(FakeRecognizer(self.0.clone())))
        }
    }
}
