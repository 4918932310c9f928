//! State shared between the scan worker and its owner

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use super::messages::ScanEvent;

/// Control handle for the scan worker
#[derive(Debug, Default)]
pub struct ScanControl {
    running: AtomicBool,
    paused: Mutex<bool>,
    stats: Mutex<RuntimeStats>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub fn set_paused(&self, paused: bool) {
        *self.paused.lock() = paused;
    }

    /// Snapshot of the runtime counters
    pub fn stats(&self) -> RuntimeStats {
        self.stats.lock().clone()
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut RuntimeStats)) {
        f(&mut self.stats.lock());
    }
}

/// Counters kept by the worker (not persisted)
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    /// Frames run through the detector
    pub frames_processed: u64,
    /// Recognition attempts (hover and hotkey)
    pub recognition_attempts: u64,
    /// Detections in the latest frame
    pub last_detection_count: usize,
    /// Last iteration error (if any)
    pub last_error: Option<String>,
}

impl RuntimeStats {
    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}

/// Event sender that drops repeated status updates
pub struct EventEmitter {
    tx: Sender<ScanEvent>,
    last_status: Option<(bool, String)>,
}

impl EventEmitter {
    pub fn new(tx: Sender<ScanEvent>) -> Self {
        Self { tx, last_status: None }
    }

    pub fn emit(&self, event: ScanEvent) {
        debug!("Event: {}", event.name());
        if self.tx.send(event).is_err() {
            debug!("No event consumer connected");
        }
    }

    /// Emit `status_changed` unless it repeats the previous status
    pub fn status(&mut self, active: bool, message: &str) {
        if let Some((last_active, last_message)) = &self.last_status {
            if *last_active == active && last_message == message {
                return;
            }
        }

        info!("Status: {} ({})", message, if active { "active" } else { "inactive" });
        self.last_status = Some((active, message.to_string()));
        self.emit(ScanEvent::StatusChanged {
            active,
            message: message.to_string(),
        });
    }
}
