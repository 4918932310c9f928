//! Scan Coordinator
//!
//! Runs the capture → detect → hover → match → emit loop on a dedicated thread
//! and publishes `ScanEvent`s over a channel.

pub mod hit_test;
pub mod hover;
pub mod worker;

pub use hit_test::{hit_test, mark_monster_events, MONSTER_OVERLAP_MIN};
pub use hover::{HoverState, HoverTracker};
pub use worker::ScanWorker;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::capture::FrameSource;
use crate::config::{AppConfig, SharedConfig};
use crate::platform::{InputPoller, WindowProvider};
use crate::shared::{EventEmitter, RuntimeStats, ScanControl, ScanEvent};
use crate::vision::{FeatureMatcher, FrameDetector, ObjectDetector, Recognizer};

/// Pause after an iteration fails
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Longest single sleep between `running` checks
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Creates the worker's resources on the worker thread
pub trait ScanFactory: Send + 'static {
    fn window_provider(&mut self) -> Result<Box<dyn WindowProvider>>;

    fn input_poller(&mut self) -> Result<Box<dyn InputPoller>>;

    fn frame_source(&mut self) -> Result<Box<dyn FrameSource>>;

    fn detector(&mut self, config: &AppConfig) -> Result<Box<dyn ObjectDetector>>;

    fn recognizer(&mut self, config: &AppConfig) -> Result<Box<dyn Recognizer>>;
}

/// Load the YOLO detector described by `config`
pub fn load_detector(config: &AppConfig) -> Result<FrameDetector> {
    let path = config.model_path();
    FrameDetector::load(&path, config.detector.params.clone())
        .with_context(|| format!("Failed to load detector model {:?}", path))
}

/// Open the feature matcher described by `config`
pub fn open_matcher(config: &AppConfig) -> Result<FeatureMatcher> {
    FeatureMatcher::open(config.library_paths(), config.matcher.clone())
        .context("Failed to open feature library")
}

/// Handle to the running scan worker
pub struct ScanCoordinator {
    control: Arc<ScanControl>,
    events: Receiver<ScanEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ScanCoordinator {
    /// Spawn the worker. With `config_path` set, the file is re-read on every reload tick.
    pub fn start<F: ScanFactory>(factory: F, config: SharedConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let control = Arc::new(ScanControl::new());
        control.set_running(true);

        let worker_control = control.clone();
        let handle = std::thread::Builder::new()
            .name("scan-worker".to_string())
            .spawn(move || {
                let worker = ScanWorker::new(factory, config, config_path, worker_control.clone(), EventEmitter::new(tx));
                run_loop(worker, &worker_control);
            })
            .context("Failed to spawn scan worker")?;

        info!("Scan coordinator started");

        Ok(Self {
            control,
            events: rx,
            handle: Some(handle),
        })
    }

    /// Event stream for the presentation layer
    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.control.stats()
    }

    /// Stop the worker and wait for it. An in-flight iteration finishes first.
    pub fn stop(&mut self) {
        self.control.set_running(false);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Scan worker panicked");
            }
            info!("Scan coordinator stopped");
        }
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<F: ScanFactory>(mut worker: ScanWorker<F>, control: &ScanControl) {
    while control.is_running() {
        let pause = match worker.step(Instant::now()) {
            Ok(pause) => pause,
            Err(e) => {
                error!("Scan iteration failed: {:#}", e);
                control.update_stats(|s| s.set_error(format!("{:#}", e)));
                ERROR_BACKOFF
            }
        };
        sleep_while_running(control, pause);
    }
}

fn sleep_while_running(control: &ScanControl, duration: Duration) {
    let deadline = Instant::now() + duration;
    while control.is_running() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
