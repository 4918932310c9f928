//! Events published by the scan loop to the presentation layer

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogKind;
use crate::vision::Detection;

/// A recognized object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub kind: CatalogKind,
    pub id: String,
    pub name: String,
}

/// Events sent from the scan worker to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    /// Show the detail view for an object
    ShowDetail { kind: CatalogKind, id: String },
    /// Hide the detail view
    HideDetail,
    /// Scanner status changed
    StatusChanged { active: bool, message: String },
    /// Detections of the latest frame
    ScanResultsUpdated { detections: Vec<Detection> },
    /// Detail requested through the hotkey
    ForceShowDetail { kind: CatalogKind, id: String },
    /// A hovered object was recognized
    ItemPreDetected { kind: CatalogKind, id: String, name: String },
}

impl ScanEvent {
    /// Wire name as used by the GUI bridge
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::ShowDetail { .. } => "show_detail",
            ScanEvent::HideDetail => "hide_detail",
            ScanEvent::StatusChanged { .. } => "status_changed",
            ScanEvent::ScanResultsUpdated { .. } => "scan_results_updated",
            ScanEvent::ForceShowDetail { .. } => "force_show_detail",
            ScanEvent::ItemPreDetected { .. } => "item_pre_detected",
        }
    }

    pub(crate) fn show(recognition: &Recognition) -> Self {
        ScanEvent::ShowDetail {
            kind: recognition.kind,
            id: recognition.id.clone(),
        }
    }

    pub(crate) fn force_show(recognition: &Recognition) -> Self {
        ScanEvent::ForceShowDetail {
            kind: recognition.kind,
            id: recognition.id.clone(),
        }
    }

    pub(crate) fn pre_detected(recognition: &Recognition) -> Self {
        ScanEvent::ItemPreDetected {
            kind: recognition.kind,
            id: recognition.id.clone(),
            name: recognition.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ScanEvent::ItemPreDetected {
            kind: CatalogKind::Monster,
            id: "boss".to_string(),
            name: "Boss".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "item_pre_detected");
        assert_eq!(json["kind"], "monster");
        assert_eq!(json["id"], "boss");
        assert_eq!(event.name(), "item_pre_detected");
    }

    #[test]
    fn test_names_match_serde_tags() {
        let events = [
            ScanEvent::HideDetail,
            ScanEvent::StatusChanged { active: true, message: "Scanning".to_string() },
            ScanEvent::ScanResultsUpdated { detections: vec![] },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }
}
