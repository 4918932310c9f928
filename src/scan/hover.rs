//! Hover / dwell tracking for the object under the cursor

use std::time::{Duration, Instant};

use crate::shared::Recognition;
use crate::vision::Detection;

/// The object currently hovered
#[derive(Debug, Clone)]
pub struct HoverState {
    pub tracked: Detection,
    pub dwell_start: Instant,
    /// A recognition attempt was made for this object
    pub recognized: bool,
    pub cached: Option<Recognition>,
}

#[derive(Debug, Default)]
pub struct HoverTracker {
    state: Option<HoverState>,
    detail_shown: bool,
}

impl HoverTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `hit`. A centre shift under `jitter_px` keeps the dwell running.
    pub fn track(&mut self, hit: &Detection, now: Instant, jitter_px: u32) -> &HoverState {
        let jitter_sq = i64::from(jitter_px) * i64::from(jitter_px);

        let same = self
            .state
            .as_ref()
            .is_some_and(|s| s.tracked.bbox.center_distance_sq(&hit.bbox) < jitter_sq);

        if !same {
            self.state = None;
        }

        let state = self.state.get_or_insert_with(|| HoverState {
            tracked: hit.clone(),
            dwell_start: now,
            recognized: false,
            cached: None,
        });
        state.tracked = hit.clone();
        state
    }

    /// Dwell elapsed and no attempt made yet
    pub fn is_due(&self, now: Instant, dwell: Duration) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| !s.recognized && now.saturating_duration_since(s.dwell_start) >= dwell)
    }

    /// Store the outcome of a recognition attempt
    pub fn record(&mut self, recognition: Option<Recognition>) {
        if let Some(state) = &mut self.state {
            state.recognized = true;
            state.cached = recognition;
        }
    }

    pub fn cached(&self) -> Option<&Recognition> {
        self.state.as_ref().and_then(|s| s.cached.as_ref())
    }

    pub fn state(&self) -> Option<&HoverState> {
        self.state.as_ref()
    }

    pub fn mark_shown(&mut self) {
        self.detail_shown = true;
    }

    pub fn detail_shown(&self) -> bool {
        self.detail_shown
    }

    /// Forget the hovered object. Returns true if a detail view needs hiding.
    pub fn reset(&mut self) -> bool {
        self.state = None;
        std::mem::take(&mut self.detail_shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogKind;
    use crate::vision::{BoundingBox, DetectionClass};

    fn item_at(x: i32, y: i32) -> Detection {
        Detection::new(DetectionClass::Item, 0.9, BoundingBox::new(x, y, 100, 100))
    }

    #[test]
    fn test_dwell_fires_after_threshold() {
        let t0 = Instant::now();
        let dwell = Duration::from_millis(200);
        let mut tracker = HoverTracker::new();

        tracker.track(&item_at(0, 0), t0, 50);
        assert!(!tracker.is_due(t0 + Duration::from_millis(199), dwell));
        assert!(tracker.is_due(t0 + Duration::from_millis(200), dwell));

        tracker.record(None);
        assert!(!tracker.is_due(t0 + Duration::from_millis(500), dwell));
    }

    #[test]
    fn test_jitter_keeps_dwell() {
        let t0 = Instant::now();
        let mut tracker = HoverTracker::new();

        tracker.track(&item_at(0, 0), t0, 50);
        let state = tracker.track(&item_at(30, 30), t0 + Duration::from_millis(100), 50);
        assert_eq!(state.dwell_start, t0);
        assert_eq!(state.tracked.bbox.x, 30);

        // 50px straight move is outside a 50px jitter
        let state = tracker.track(&item_at(80, 30), t0 + Duration::from_millis(150), 50);
        assert_eq!(state.dwell_start, t0 + Duration::from_millis(150));
    }

    #[test]
    fn test_new_object_clears_cache() {
        let t0 = Instant::now();
        let mut tracker = HoverTracker::new();

        tracker.track(&item_at(0, 0), t0, 50);
        tracker.record(Some(Recognition {
            kind: CatalogKind::Item,
            id: "a".to_string(),
            name: "A".to_string(),
        }));
        assert!(tracker.cached().is_some());

        tracker.track(&item_at(400, 400), t0, 50);
        assert!(tracker.cached().is_none());
    }

    #[test]
    fn test_reset_reports_shown_detail_once() {
        let mut tracker = HoverTracker::new();
        tracker.track(&item_at(0, 0), Instant::now(), 50);
        tracker.mark_shown();

        assert!(tracker.reset());
        assert!(!tracker.reset());
        assert!(tracker.state().is_none());
    }
}
