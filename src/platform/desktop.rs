//! Desktop adapters: `xcap` for windows and screen capture, `device_query`
//! for cursor, keyboard and mouse polling.

use anyhow::Result;
use device_query::{DeviceQuery, DeviceState};
use tracing::{debug, warn};
use xcap::{Monitor, Window};

use super::WindowProvider;
use crate::capture::frame::CapturedFrame;
use crate::capture::{FrameSource, Region};
use crate::config::AppConfig;
use crate::hotkey::{DetailHotkey, InputPoller, Key, MouseButton};
use crate::scan::{load_detector, open_matcher, ScanFactory};
use crate::vision::{ObjectDetector, Recognizer};

/// Our own windows must never be mistaken for the game
const EXCLUDED_TITLES: [&str; 2] = ["bazaar assistant", "bazaar-assistant"];

fn find_window(title: &str) -> Option<Window> {
    let needle = title.to_lowercase();
    let windows = match Window::all() {
        Ok(windows) => windows,
        Err(e) => {
            debug!("Window enumeration failed: {}", e);
            return None;
        }
    };

    windows
        .into_iter()
        .find(|w| is_game_window(w.title(), w.app_name(), &needle))
}

/// `needle` is lowercase
fn is_game_window(title: &str, app_name: &str, needle: &str) -> bool {
    let title = title.to_lowercase();
    let app_name = app_name.to_lowercase();
    let excluded = EXCLUDED_TITLES
        .iter()
        .any(|ex| title.contains(ex) || app_name.contains(ex));
    !excluded && (title.contains(needle) || app_name.contains(needle))
}

/// Title of the window that currently has keyboard focus
#[cfg(windows)]
fn foreground_title() -> Option<String> {
    use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW};

    let mut buffer = [0u16; 512];
    // SAFETY: both calls only read window manager state; the buffer outlives the call
    let len = unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.0.is_null() {
            return None;
        }
        GetWindowTextW(hwnd, &mut buffer)
    };

    (len > 0).then(|| String::from_utf16_lossy(&buffer[..len as usize]))
}

/// Window lookup by title through `xcap`
pub struct XcapWindowProvider {
    device: DeviceState,
}

impl XcapWindowProvider {
    pub fn new() -> Self {
        Self {
            device: DeviceState::new(),
        }
    }
}

impl Default for XcapWindowProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowProvider for XcapWindowProvider {
    fn window_rect(&self, title: &str) -> Option<Region> {
        let window = find_window(title)?;
        if window.is_minimized() {
            return None;
        }
        Some(Region::new(window.x(), window.y(), window.width(), window.height()))
    }

    fn mouse_pos_relative(&self, win_x: i32, win_y: i32) -> (i32, i32) {
        let (x, y) = self.device.get_mouse().coords;
        (x - win_x, y - win_y)
    }

    /// On Windows the game must own the foreground. Elsewhere a visible,
    /// non-minimized window counts as focused.
    fn is_focus_valid(&self, title: &str) -> bool {
        #[cfg(windows)]
        {
            let needle = title.to_lowercase();
            foreground_title().is_some_and(|fg| is_game_window(&fg, "", &needle))
        }

        #[cfg(not(windows))]
        {
            find_window(title).is_some_and(|w| !w.is_minimized())
        }
    }
}

/// Monitor capture cropped to the window region
#[derive(Default)]
pub struct XcapFrameSource {
    region: Option<Region>,
}

impl XcapFrameSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for XcapFrameSource {
    fn set_region(&mut self, region: Region) {
        self.region = Some(region);
    }

    fn capture(&mut self) -> Option<CapturedFrame> {
        let region = self.region.filter(|r| !r.is_empty())?;
        let (cx, cy) = (
            region.x + region.width as i32 / 2,
            region.y + region.height as i32 / 2,
        );

        let monitors = match Monitor::all() {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("Monitor enumeration failed: {}", e);
                return None;
            }
        };

        let monitor = monitors.into_iter().find(|m| {
            cx >= m.x() && cx < m.x() + m.width() as i32 && cy >= m.y() && cy < m.y() + m.height() as i32
        })?;

        let screen = match monitor.capture_image() {
            Ok(image) => image,
            Err(e) => {
                warn!("Screen capture failed: {}", e);
                return None;
            }
        };

        let local = Region::new(region.x - monitor.x(), region.y - monitor.y(), region.width, region.height)
            .clamp_to(screen.width(), screen.height())?;

        let view = image::imageops::crop_imm(&screen, local.x as u32, local.y as u32, local.width, local.height);
        Some(CapturedFrame::from_rgba(view.to_image()))
    }
}

/// Keyboard and mouse polling through `device_query`
pub struct DeviceInputPoller {
    device: DeviceState,
}

impl DeviceInputPoller {
    pub fn new() -> Self {
        Self {
            device: DeviceState::new(),
        }
    }
}

impl Default for DeviceInputPoller {
    fn default() -> Self {
        Self::new()
    }
}

/// `device_query` keycode names that satisfy a key
fn keycode_names(key: &Key) -> Vec<String> {
    let names: &[&str] = match key {
        Key::Function(n) => return vec![format!("F{}", n)],
        Key::Char(c) if c.is_ascii_digit() => return vec![format!("Key{}", c)],
        Key::Char(c) => return vec![c.to_string()],
        Key::Numpad(n) => return vec![format!("Numpad{}", n)],
        Key::Space => &["Space"],
        Key::Enter => &["Enter", "NumpadEnter"],
        Key::Tab => &["Tab"],
        Key::Escape => &["Escape"],
        Key::Backspace => &["Backspace"],
        Key::Delete => &["Delete"],
        Key::Insert => &["Insert"],
        Key::Home => &["Home"],
        Key::End => &["End"],
        Key::PageUp => &["PageUp"],
        Key::PageDown => &["PageDown"],
        Key::Up => &["Up"],
        Key::Down => &["Down"],
        Key::Left => &["Left"],
        Key::Right => &["Right"],
        Key::Shift => &["LShift", "RShift"],
        Key::Control => &["LControl", "RControl"],
        Key::Alt => &["LAlt", "RAlt", "LOption", "ROption"],
        Key::Meta => &["Meta", "LMeta", "RMeta", "Command", "RCommand"],
        Key::Backquote => &["Grave"],
    };
    names.iter().map(|n| n.to_string()).collect()
}

/// Index into `MouseState::button_pressed`
fn button_index(button: MouseButton) -> usize {
    match button {
        MouseButton::Left => 1,
        MouseButton::Right => 2,
        MouseButton::Middle => 3,
        MouseButton::X1 => 4,
        MouseButton::X2 => 5,
    }
}

impl InputPoller for DeviceInputPoller {
    fn is_pressed(&self, hotkey: &DetailHotkey) -> bool {
        match hotkey {
            DetailHotkey::Mouse(button) => {
                let mouse = self.device.get_mouse();
                mouse
                    .button_pressed
                    .get(button_index(*button))
                    .copied()
                    .unwrap_or(false)
            }
            DetailHotkey::Keyboard(keys) => {
                let held: Vec<String> = self.device.get_keys().iter().map(|k| format!("{:?}", k)).collect();
                keys.iter()
                    .all(|key| keycode_names(key).iter().any(|name| held.contains(name)))
            }
        }
    }
}

/// Factory wiring the desktop adapters with the ONNX detector and ORB matcher
#[derive(Default)]
pub struct DesktopFactory;

impl ScanFactory for DesktopFactory {
    fn window_provider(&mut self) -> Result<Box<dyn WindowProvider>> {
        Ok(Box::new(XcapWindowProvider::new()))
    }

    fn input_poller(&mut self) -> Result<Box<dyn InputPoller>> {
        Ok(Box::new(DeviceInputPoller::new()))
    }

    fn frame_source(&mut self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(XcapFrameSource::new()))
    }

    fn detector(&mut self, config: &AppConfig) -> Result<Box<dyn ObjectDetector>> {
        Ok(Box::new(load_detector(config)?))
    }

    fn recognizer(&mut self, config: &AppConfig) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(open_matcher(config)?))
    }
}
