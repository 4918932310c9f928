//! Vision Layer
//!
//! Turns captured frames into typed detections (YOLO via ONNX Runtime) and
//! classifies cropped regions against the ORB descriptor library.

pub mod bbox;
pub mod detector;
pub mod error;
pub mod features;
pub mod library;
pub mod matcher;
pub mod models;
pub mod preprocess;

pub use bbox::BoundingBox;
pub use detector::{DetectionReport, DetectorParams, FrameDetector, ObjectDetector, StageTimings};
pub use error::{DetectorError, LibraryError};
pub use features::{Descriptor, FeatureSet, Keypoint, OrbExtractor, OrbParams};
pub use library::{DescriptorEntry, FeatureLibrary, LibraryPaths, MonsterLibrary, UserMemoryLibrary};
pub use matcher::{FeatureMatcher, MatchResult, MatcherParams, Recognizer};
pub use models::{ExecutionBackend, InferenceBackend, OnnxSession};

use serde::{Deserialize, Serialize};

/// Object classes produced by the game UI detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionClass {
    Day,
    Detail,
    Event,
    Item,
    MonsterIcon,
    Next,
    RandomIcon,
    ShopIcon,
    Skill,
    Store,
}

impl DetectionClass {
    /// All classes in model output order
    pub const ALL: [DetectionClass; 10] = [
        DetectionClass::Day,
        DetectionClass::Detail,
        DetectionClass::Event,
        DetectionClass::Item,
        DetectionClass::MonsterIcon,
        DetectionClass::Next,
        DetectionClass::RandomIcon,
        DetectionClass::ShopIcon,
        DetectionClass::Skill,
        DetectionClass::Store,
    ];

    /// Map a model class index to a class, `None` outside [0, 9]
    pub fn from_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    /// Model class index
    pub fn id(&self) -> usize {
        *self as usize
    }

    /// Label as used in the training set
    pub fn label(&self) -> &'static str {
        match self {
            DetectionClass::Day => "day",
            DetectionClass::Detail => "detail",
            DetectionClass::Event => "event",
            DetectionClass::Item => "item",
            DetectionClass::MonsterIcon => "monster_icon",
            DetectionClass::Next => "next",
            DetectionClass::RandomIcon => "random_icon",
            DetectionClass::ShopIcon => "shop_icon",
            DetectionClass::Skill => "skill",
            DetectionClass::Store => "store",
        }
    }
}

/// A single detected object in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detected class
    pub class: DetectionClass,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Bounding box in source-frame pixels
    pub bbox: BoundingBox,
    /// EVENT box that contains a monster icon
    pub is_monster_event: bool,
}

impl Detection {
    /// Create a new detection
    pub fn new(class: DetectionClass, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class,
            confidence,
            bbox,
            is_monster_event: false,
        }
    }
}

/// Item size buckets of the descriptor library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
}

/// Height/width ratio above which a box is a small (tall) item
const SMALL_ASPECT_MIN: f32 = 1.2;
/// Height/width ratio below which a box is a large (wide) item
const LARGE_ASPECT_MAX: f32 = 0.85;
/// Square-ish boxes under this area are small items
const SMALL_AREA_MAX: i64 = 20_000;

impl SizeCategory {
    pub const ALL: [SizeCategory; 3] = [SizeCategory::Large, SizeCategory::Medium, SizeCategory::Small];

    /// Cache key / display name
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCategory::Small => "Small",
            SizeCategory::Medium => "Medium",
            SizeCategory::Large => "Large",
        }
    }

    /// Parse a bucket name exactly as used by callers ("Large", "Medium", "Small")
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Small" => Some(SizeCategory::Small),
            "Medium" => Some(SizeCategory::Medium),
            "Large" => Some(SizeCategory::Large),
            _ => None,
        }
    }

    /// Parse the catalog `size` field, which may be "Small", "small", "Small / 小型" etc.
    pub fn from_catalog(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        let first = lower.split(['/', '|']).next().unwrap_or("").trim();

        match first {
            "small" | "s" | "小" | "小型" => Some(SizeCategory::Small),
            "medium" | "m" | "中" | "中型" => Some(SizeCategory::Medium),
            "large" | "l" | "大" | "大型" => Some(SizeCategory::Large),
            _ => None,
        }
    }

    /// Guess the bucket from a detection box shape
    pub fn infer(bbox: &BoundingBox) -> Self {
        let ratio = bbox.aspect_ratio();
        if ratio > SMALL_ASPECT_MIN {
            SizeCategory::Small
        } else if ratio < LARGE_ASPECT_MAX {
            SizeCategory::Large
        } else if bbox.area() < SMALL_AREA_MAX {
            SizeCategory::Small
        } else {
            SizeCategory::Medium
        }
    }

    /// Guess the bucket from image dimensions (aspect only, catalog art has no fixed scale)
    pub fn infer_from_dimensions(width: u32, height: u32) -> Self {
        if width == 0 {
            return SizeCategory::Medium;
        }
        let ratio = height as f32 / width as f32;
        if ratio > SMALL_ASPECT_MIN {
            SizeCategory::Small
        } else if ratio < LARGE_ASPECT_MAX {
            SizeCategory::Large
        } else {
            SizeCategory::Medium
        }
    }

    /// Buckets that are easily confused with this one by shape
    pub fn neighbours(&self) -> &'static [SizeCategory] {
        match self {
            SizeCategory::Small => &[SizeCategory::Medium],
            SizeCategory::Medium => &[SizeCategory::Small, SizeCategory::Large],
            SizeCategory::Large => &[SizeCategory::Medium],
        }
    }
}

impl std::fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
