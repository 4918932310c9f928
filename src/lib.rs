//! Bazaar Assistant - real-time item and monster recognition for The Bazaar
//!
//! A read-only screen parsing pipeline: capture the game window, detect UI
//! objects with a YOLO model, identify the hovered card with ORB descriptor
//! matching and publish events for an overlay to render.

pub mod capture;
pub mod catalog;
pub mod config;
pub mod hotkey;
pub mod platform;
pub mod scan;
pub mod shared;
pub mod storage;
pub mod vision;
