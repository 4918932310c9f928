//! Shared state and messaging between the scan worker and its consumers
//!
//! This module provides the thread-safe control handle and the event types
//! the worker publishes.

pub mod messages;
pub mod state;

pub use messages::{Recognition, ScanEvent};
pub use state::{EventEmitter, RuntimeStats, ScanControl};
