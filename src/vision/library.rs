//! Descriptor library and its on-disk cache
//!
//! Item/skill descriptors are bucketed by size, monster descriptors are flat,
//! and user corrections live in a separate memory library. Every cache file is
//! a bincode envelope tagged with a schema version and a fingerprint of the
//! catalog plus extractor settings; anything that doesn't line up is rebuilt.

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::error::LibraryError;
use super::features::{Descriptor, FeatureSet, OrbExtractor, OrbParams};
use super::SizeCategory;
use crate::catalog::{Catalog, CatalogEntry};

/// Bumped whenever the payload layout or the extractor output changes
pub const CACHE_VERSION: u32 = 2;

pub const ITEM_CACHE_FILE: &str = "item_features.bin";
pub const MONSTER_CACHE_FILE: &str = "monster_features.bin";
pub const USER_MEMORY_FILE: &str = "user_memory.bin";

/// Descriptors of one reference image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub descriptors: Vec<Descriptor>,
    pub keypoint_count: usize,
}

impl From<FeatureSet> for DescriptorEntry {
    fn from(features: FeatureSet) -> Self {
        Self {
            keypoint_count: features.keypoints.len(),
            descriptors: features.descriptors,
        }
    }
}

/// Where catalogs are read from and caches are written to
#[derive(Debug, Clone)]
pub struct LibraryPaths {
    pub resources_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl LibraryPaths {
    pub fn new(resources_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            resources_dir: resources_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn item_cache(&self) -> PathBuf {
        self.cache_dir.join(ITEM_CACHE_FILE)
    }

    pub fn monster_cache(&self) -> PathBuf {
        self.cache_dir.join(MONSTER_CACHE_FILE)
    }

    pub fn user_memory(&self) -> PathBuf {
        self.cache_dir.join(USER_MEMORY_FILE)
    }
}

/// Fingerprint of everything a static library is derived from
pub fn library_fingerprint(catalog: &Catalog, params: &OrbParams) -> String {
    let mut hasher = Sha256::new();
    hasher.update(catalog.fingerprint().as_bytes());
    hasher.update(params.signature().as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Serialize, Deserialize)]
struct EnvelopeHeader {
    version: u32,
    fingerprint: String,
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope<T> {
    version: u32,
    fingerprint: String,
    payload: T,
}

/// Read a cache payload, `None` (with a log line) when it must be rebuilt
fn read_envelope<T: DeserializeOwned>(path: &Path, fingerprint: &str) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No cache at {:?}", path);
            return None;
        }
        Err(e) => {
            warn!("Failed to read cache {:?}: {}", path, e);
            return None;
        }
    };

    let header: EnvelopeHeader = match bincode::deserialize(&bytes) {
        Ok(header) => header,
        Err(e) => {
            warn!("Cache {:?} is unreadable ({}), rebuilding", path, e);
            return None;
        }
    };

    if header.version != CACHE_VERSION {
        info!(
            "Cache {:?} has schema version {} (expected {}), rebuilding",
            path, header.version, CACHE_VERSION
        );
        return None;
    }

    if header.fingerprint != fingerprint {
        info!("Cache {:?} was built from different sources, rebuilding", path);
        return None;
    }

    match bincode::deserialize::<CacheEnvelope<T>>(&bytes) {
        Ok(envelope) => Some(envelope.payload),
        Err(e) => {
            warn!("Cache {:?} payload is corrupted ({}), rebuilding", path, e);
            None
        }
    }
}

/// Write a cache file, replacing any existing one
fn write_envelope<T: Serialize>(path: &Path, fingerprint: &str, payload: &T) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LibraryError::io(parent, e))?;
    }

    let envelope = CacheEnvelope {
        version: CACHE_VERSION,
        fingerprint: fingerprint.to_string(),
        payload,
    };
    let encoded = bincode::serialize(&envelope)?;

    let tmp = path.with_extension("bin.tmp");
    std::fs::write(&tmp, &encoded).map_err(|e| LibraryError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| LibraryError::io(path, e))?;

    debug!("Wrote {} bytes to {:?}", encoded.len(), path);
    Ok(())
}

/// Decode and describe one catalog image, `None` when it can't be used
fn describe_entry(entry: &CatalogEntry, extractor: &OrbExtractor) -> Option<(String, (u32, u32), DescriptorEntry)> {
    let path = entry.image.as_ref()?;
    match image::open(path) {
        Ok(img) => {
            let dims = (img.width(), img.height());
            let features = extractor.extract_dynamic(&img);
            Some((entry.id.clone(), dims, DescriptorEntry::from(features)))
        }
        Err(e) => {
            warn!("Skipping {} ({:?}): {}", entry.id, path, e);
            None
        }
    }
}

type Buckets = BTreeMap<String, BTreeMap<String, DescriptorEntry>>;

/// Item and skill descriptors bucketed by size
#[derive(Debug, Clone, Default)]
pub struct FeatureLibrary {
    buckets: BTreeMap<SizeCategory, BTreeMap<String, DescriptorEntry>>,
}

impl FeatureLibrary {
    /// Library from prepared buckets; absent sizes become empty buckets
    pub fn from_buckets(mut buckets: BTreeMap<SizeCategory, BTreeMap<String, DescriptorEntry>>) -> Self {
        for size in SizeCategory::ALL {
            buckets.entry(size).or_default();
        }
        Self { buckets }
    }

    /// Describe every catalog item/skill image. The catalog size wins over shape inference.
    pub fn build(catalog: &Catalog, extractor: &OrbExtractor) -> Self {
        let start = Instant::now();
        let entries: Vec<&CatalogEntry> = catalog.sized_entries().filter(|e| e.image.is_some()).collect();
        info!("Building item descriptor library from {} images", entries.len());

        let described: Vec<(SizeCategory, String, DescriptorEntry)> = entries
            .par_iter()
            .filter_map(|entry| {
                let (id, (w, h), descriptors) = describe_entry(entry, extractor)?;
                let size = entry
                    .size
                    .unwrap_or_else(|| SizeCategory::infer_from_dimensions(w, h));
                Some((size, id, descriptors))
            })
            .collect();

        let mut library = Self::default();
        for size in SizeCategory::ALL {
            library.buckets.insert(size, BTreeMap::new());
        }
        for (size, id, entry) in described {
            library.buckets.entry(size).or_default().insert(id, entry);
        }

        info!(
            "Item library built: {} entries in {:?}",
            library.len(),
            start.elapsed()
        );
        library
    }

    /// Load from cache; `None` if absent, stale, corrupted or missing a bucket
    pub fn load(path: &Path, fingerprint: &str) -> Option<Self> {
        let payload: Buckets = read_envelope(path, fingerprint)?;

        let mut buckets = BTreeMap::new();
        for size in SizeCategory::ALL {
            match payload.get(size.as_str()) {
                Some(bucket) => {
                    buckets.insert(size, bucket.clone());
                }
                None => {
                    info!("Cache {:?} lacks the {} bucket, rebuilding", path, size);
                    return None;
                }
            }
        }

        Some(Self { buckets })
    }

    pub fn save(&self, path: &Path, fingerprint: &str) -> Result<(), LibraryError> {
        let payload: Buckets = self
            .buckets
            .iter()
            .map(|(size, bucket)| (size.as_str().to_string(), bucket.clone()))
            .collect();
        write_envelope(path, fingerprint, &payload)
    }

    /// Cached library, or a fresh build that is persisted immediately
    pub fn load_or_build(
        path: &Path,
        fingerprint: &str,
        catalog: &Catalog,
        extractor: &OrbExtractor,
    ) -> Result<Self, LibraryError> {
        if let Some(library) = Self::load(path, fingerprint) {
            info!("Loaded {} item descriptor entries from {:?}", library.len(), path);
            return Ok(library);
        }

        let library = Self::build(catalog, extractor);
        library.save(path, fingerprint)?;
        Ok(library)
    }

    pub fn bucket(&self, size: SizeCategory) -> Option<&BTreeMap<String, DescriptorEntry>> {
        self.buckets.get(&size)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flat monster portrait descriptors
#[derive(Debug, Clone, Default)]
pub struct MonsterLibrary {
    entries: BTreeMap<String, DescriptorEntry>,
}

impl MonsterLibrary {
    pub fn from_entries(entries: BTreeMap<String, DescriptorEntry>) -> Self {
        Self { entries }
    }

    pub fn build(catalog: &Catalog, extractor: &OrbExtractor) -> Self {
        let start = Instant::now();
        let entries: Vec<&CatalogEntry> = catalog.monsters().iter().filter(|e| e.image.is_some()).collect();
        info!("Building monster descriptor library from {} images", entries.len());

        let entries: BTreeMap<String, DescriptorEntry> = entries
            .par_iter()
            .filter_map(|entry| describe_entry(entry, extractor).map(|(id, _, d)| (id, d)))
            .collect();

        info!("Monster library built: {} entries in {:?}", entries.len(), start.elapsed());
        Self { entries }
    }

    pub fn load(path: &Path, fingerprint: &str) -> Option<Self> {
        read_envelope(path, fingerprint).map(|entries| Self { entries })
    }

    pub fn save(&self, path: &Path, fingerprint: &str) -> Result<(), LibraryError> {
        write_envelope(path, fingerprint, &self.entries)
    }

    pub fn load_or_build(
        path: &Path,
        fingerprint: &str,
        catalog: &Catalog,
        extractor: &OrbExtractor,
    ) -> Result<Self, LibraryError> {
        if let Some(library) = Self::load(path, fingerprint) {
            info!("Loaded {} monster descriptor entries from {:?}", library.len(), path);
            return Ok(library);
        }

        let library = Self::build(catalog, extractor);
        library.save(path, fingerprint)?;
        Ok(library)
    }

    pub fn entries(&self) -> &BTreeMap<String, DescriptorEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// User-taught descriptor entries, several per catalog id
#[derive(Debug, Clone, Default)]
pub struct UserMemoryLibrary {
    entries: BTreeMap<String, Vec<DescriptorEntry>>,
}

impl UserMemoryLibrary {
    /// Load user memory. Only the extractor settings invalidate it, never the catalog.
    pub fn load(path: &Path, params: &OrbParams) -> Self {
        let entries = read_envelope(path, &params.signature()).unwrap_or_default();
        let library = Self { entries };
        if !library.is_empty() {
            info!("Loaded {} user memory entries", library.len());
        }
        library
    }

    pub fn save(&self, path: &Path, params: &OrbParams) -> Result<(), LibraryError> {
        write_envelope(path, &params.signature(), &self.entries)
    }

    pub fn add(&mut self, id: &str, entry: DescriptorEntry) {
        self.entries.entry(id.to_string()).or_default().push(entry);
    }

    /// Entries for an id, empty if none
    pub fn entries_for(&self, id: &str) -> &[DescriptorEntry] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids that have user entries
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::{GrayImage, Luma};
    use std::path::Path;

    /// Blocky pseudo-random texture, distinct per seed
    pub fn textured_image(width: u32, height: u32, seed: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        let cols = width / 8 + 1;
        let cells: Vec<u8> = (0..(cols * (height / 8 + 1)))
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                if state % 2 == 0 { 25 } else { 230 }
            })
            .collect();

        GrayImage::from_fn(width, height, |x, y| Luma([cells[((y / 8) * cols + x / 8) as usize]]))
    }

    /// Resources dir with three items (one per size) and one monster
    pub fn write_resources(dir: &Path) {
        let images = dir.join("images");
        std::fs::create_dir_all(&images).unwrap();

        textured_image(160, 96, 1).save(images.join("wide.png")).unwrap();
        textured_image(120, 120, 2).save(images.join("square.png")).unwrap();
        textured_image(80, 140, 3).save(images.join("tall.png")).unwrap();
        textured_image(128, 128, 4).save(images.join("boss.png")).unwrap();
        std::fs::write(images.join("broken.png"), b"not an image").unwrap();

        std::fs::write(
            dir.join(crate::catalog::ITEMS_FILE),
            r#"[
                {"id": "wide", "name_en": "Wide", "size": "Large"},
                {"id": "square", "name_en": "Square", "size": "Medium"},
                {"id": "tall", "name_en": "Tall"},
                {"id": "broken", "name_en": "Broken", "size": "Small"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.join(crate::catalog::MONSTERS_FILE),
            r#"{"boss": {"name_zh": "首领"}}"#,
        )
        .unwrap();
    }
}
