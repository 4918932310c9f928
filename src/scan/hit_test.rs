//! Geometric reasoning over one frame's detections

use crate::vision::{Detection, DetectionClass};

/// Share of a monster icon that must lie inside an EVENT box
pub const MONSTER_OVERLAP_MIN: f32 = 0.8;

/// Flag EVENT boxes that contain a MONSTER_ICON box
pub fn mark_monster_events(detections: &mut [Detection]) {
    let icons: Vec<_> = detections
        .iter()
        .filter(|d| d.class == DetectionClass::MonsterIcon)
        .map(|d| d.bbox)
        .collect();

    for det in detections.iter_mut().filter(|d| d.class == DetectionClass::Event) {
        det.is_monster_event = icons
            .iter()
            .any(|icon| det.bbox.overlap_ratio(icon) >= MONSTER_OVERLAP_MIN);
    }
}

/// Box under the cursor: monster events first, then items and skills, in detection order
pub fn hit_test(detections: &[Detection], x: i32, y: i32) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| d.is_monster_event)
        .find(|d| d.bbox.contains_point(x, y))
        .or_else(|| {
            detections
                .iter()
                .filter(|d| matches!(d.class, DetectionClass::Item | DetectionClass::Skill))
                .find(|d| d.bbox.contains_point(x, y))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn det(class: DetectionClass, x: i32, y: i32, w: i32, h: i32) -> Detection {
        Detection::new(class, 0.9, BoundingBox::new(x, y, w, h))
    }

    #[test]
    fn test_event_with_icon_is_monster_event() {
        let mut dets = vec![
            det(DetectionClass::Event, 0, 0, 200, 200),
            det(DetectionClass::MonsterIcon, 10, 10, 150, 150),
        ];
        mark_monster_events(&mut dets);

        assert!(dets[0].is_monster_event);
        assert!(!dets[1].is_monster_event);
        assert_eq!(hit_test(&dets, 50, 50), Some(&dets[0]));
    }

    #[test]
    fn test_partially_covered_icon_is_not_enough() {
        // Only 70% of the icon lies inside the event
        let mut dets = vec![
            det(DetectionClass::Event, 0, 0, 100, 100),
            det(DetectionClass::MonsterIcon, 70, 0, 100, 100),
        ];
        mark_monster_events(&mut dets);
        assert!(!dets[0].is_monster_event);
        assert_eq!(hit_test(&dets, 50, 50), None);
    }

    #[test]
    fn test_monster_events_win_over_items() {
        let mut dets = vec![
            det(DetectionClass::Item, 0, 0, 300, 300),
            det(DetectionClass::Event, 50, 50, 100, 100),
            det(DetectionClass::MonsterIcon, 60, 60, 50, 50),
        ];
        mark_monster_events(&mut dets);

        assert_eq!(hit_test(&dets, 70, 70).unwrap().class, DetectionClass::Event);
        assert_eq!(hit_test(&dets, 10, 10).unwrap().class, DetectionClass::Item);
    }

    #[test]
    fn test_first_item_in_order_wins() {
        let dets = vec![
            det(DetectionClass::Day, 0, 0, 500, 500),
            det(DetectionClass::Skill, 0, 0, 100, 100),
            det(DetectionClass::Item, 0, 0, 100, 100),
        ];
        assert_eq!(hit_test(&dets, 5, 5).unwrap().class, DetectionClass::Skill);
        assert_eq!(hit_test(&dets, 200, 200), None);
    }
}
