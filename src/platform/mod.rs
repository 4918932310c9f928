//! Platform capabilities consumed by the scan loop
//!
//! Window lookup, cursor position and input polling are traits so the loop can
//! run against any desktop backend (or none, in tests). Reference adapters
//! built on `xcap` and `device_query` live in `desktop` behind the `desktop`
//! cargo feature.

#[cfg(feature = "desktop")]
pub mod desktop;

pub use crate::hotkey::InputPoller;

use crate::capture::Region;

/// Game window lookup
pub trait WindowProvider {
    /// Screen rectangle of the window whose title contains `title`
    fn window_rect(&self, title: &str) -> Option<Region>;

    /// Cursor position relative to a window origin
    fn mouse_pos_relative(&self, win_x: i32, win_y: i32) -> (i32, i32);

    /// Whether the window is in a state worth scanning
    fn is_focus_valid(&self, title: &str) -> bool;
}
