//! Feature matching against the descriptor library
//!
//! k=2 Hamming nearest neighbours from query to library entry, Lowe ratio
//! test, and a score normalized by the smaller keypoint count.

use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

use super::error::LibraryError;
use super::features::{hamming, Descriptor, OrbExtractor, OrbParams};
use super::library::{
    library_fingerprint, DescriptorEntry, FeatureLibrary, LibraryPaths, MonsterLibrary, UserMemoryLibrary,
};
use super::SizeCategory;
use crate::catalog::{Catalog, CatalogKind};

/// Matching parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// A match is good when best < ratio × second best
    pub ratio: f32,
    /// Minimum score for a candidate
    pub match_threshold: f32,
    /// Results returned per query
    pub max_results: usize,
    /// Extractor settings, shared by library and queries
    pub orb: OrbParams,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            match_threshold: 0.05,
            max_results: 1,
            orb: OrbParams::default(),
        }
    }
}

/// A recognized catalog id and its score in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: String,
    pub score: f32,
}

/// Classification of cropped regions, as used by the scan loop
pub trait Recognizer {
    /// Best item/skill match within a size bucket
    fn match_item(&self, crop: &RgbImage, size: SizeCategory) -> Vec<MatchResult>;

    /// Best monster portrait match
    fn match_monster_character(&self, crop: &RgbImage) -> Vec<MatchResult>;

    /// Display name for a recognized id
    fn name_of(&self, id: &str) -> Option<String>;
}

/// Good-match count of `query` against one entry, normalized to [0, 1]
pub fn score_entry(query: &[Descriptor], entry: &DescriptorEntry, ratio: f32) -> f32 {
    if query.is_empty() || entry.descriptors.len() < 2 {
        return 0.0;
    }

    let good = query
        .iter()
        .filter(|q| {
            let (mut best, mut second) = (u32::MAX, u32::MAX);
            for d in &entry.descriptors {
                let dist = hamming(q, d);
                if dist < best {
                    second = best;
                    best = dist;
                } else if dist < second {
                    second = dist;
                }
            }
            (best as f32) < ratio * second as f32
        })
        .count();

    let denominator = query.len().min(entry.keypoint_count).max(1);
    (good as f32 / denominator as f32).min(1.0)
}

/// Matcher over the item, monster and user-memory libraries
pub struct FeatureMatcher {
    paths: LibraryPaths,
    params: MatcherParams,
    extractor: OrbExtractor,
    catalog: Catalog,
    items: FeatureLibrary,
    monsters: MonsterLibrary,
    memory: UserMemoryLibrary,
}

impl FeatureMatcher {
    /// Load catalogs and libraries, rebuilding stale caches
    pub fn open(paths: LibraryPaths, params: MatcherParams) -> Result<Self, LibraryError> {
        Self::assemble(paths, params, false)
    }

    /// Load catalogs and rebuild both caches unconditionally
    pub fn open_rebuilt(paths: LibraryPaths, params: MatcherParams) -> Result<Self, LibraryError> {
        Self::assemble(paths, params, true)
    }

    fn assemble(paths: LibraryPaths, params: MatcherParams, force_rebuild: bool) -> Result<Self, LibraryError> {
        let catalog = Catalog::load(&paths.resources_dir)?;
        let extractor = OrbExtractor::new(params.orb.clone());
        let fingerprint = library_fingerprint(&catalog, extractor.params());

        let (items, monsters) = if force_rebuild {
            let items = FeatureLibrary::build(&catalog, &extractor);
            items.save(&paths.item_cache(), &fingerprint)?;
            let monsters = MonsterLibrary::build(&catalog, &extractor);
            monsters.save(&paths.monster_cache(), &fingerprint)?;
            (items, monsters)
        } else {
            (
                FeatureLibrary::load_or_build(&paths.item_cache(), &fingerprint, &catalog, &extractor)?,
                MonsterLibrary::load_or_build(&paths.monster_cache(), &fingerprint, &catalog, &extractor)?,
            )
        };
        let memory = UserMemoryLibrary::load(&paths.user_memory(), extractor.params());

        info!(
            "Feature matcher ready: {} items, {} monsters, {} user entries",
            items.len(),
            monsters.len(),
            memory.len()
        );

        Ok(Self {
            paths,
            params,
            extractor,
            catalog,
            items,
            monsters,
            memory,
        })
    }

    /// Matcher over libraries that are already in memory
    pub fn from_parts(
        paths: LibraryPaths,
        params: MatcherParams,
        catalog: Catalog,
        items: FeatureLibrary,
        monsters: MonsterLibrary,
        memory: UserMemoryLibrary,
    ) -> Self {
        Self {
            extractor: OrbExtractor::new(params.orb.clone()),
            paths,
            params,
            catalog,
            items,
            monsters,
            memory,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn monster_count(&self) -> usize {
        self.monsters.len()
    }

    fn describe(&self, crop: &RgbImage) -> Vec<Descriptor> {
        self.extractor.extract_rgb(crop).descriptors
    }

    /// Match a crop within a size bucket given by name
    pub fn match_item_named(&self, crop: &RgbImage, size_category: &str) -> Vec<MatchResult> {
        match SizeCategory::from_name(size_category) {
            Some(size) => self.match_item(crop, size),
            None => {
                error!("Invalid size category: {}", size_category);
                Vec::new()
            }
        }
    }

    /// Match a crop within a size bucket
    pub fn match_item(&self, crop: &RgbImage, size: SizeCategory) -> Vec<MatchResult> {
        let query = self.describe(crop);
        if query.is_empty() {
            debug!("No features in {}x{} crop", crop.width(), crop.height());
            return Vec::new();
        }
        self.match_descriptors(&query, size)
    }

    /// Match a crop against monster portraits
    pub fn match_monster_character(&self, crop: &RgbImage) -> Vec<MatchResult> {
        let query = self.describe(crop);
        if query.is_empty() {
            debug!("No features in {}x{} monster crop", crop.width(), crop.height());
            return Vec::new();
        }
        self.match_monster_descriptors(&query)
    }

    /// Rank precomputed descriptors within a size bucket
    pub fn match_descriptors(&self, query: &[Descriptor], size: SizeCategory) -> Vec<MatchResult> {
        self.rank(query, self.items.bucket(size), |id| self.memory_in_bucket(id, size))
    }

    /// A remembered item belongs to the bucket holding its catalog art. Items
    /// without library art fall back to their catalog size, or any bucket when
    /// that is unknown too.
    fn memory_in_bucket(&self, id: &str, size: SizeCategory) -> bool {
        let Some(entry) = self.catalog.get(id) else {
            return false;
        };
        if entry.kind == CatalogKind::Monster {
            return false;
        }

        let home = SizeCategory::ALL
            .into_iter()
            .find(|s| self.items.bucket(*s).is_some_and(|b| b.contains_key(id)));

        match (home, entry.size) {
            (Some(home), _) => home == size,
            (None, Some(catalog_size)) => catalog_size == size,
            (None, None) => true,
        }
    }

    /// Rank precomputed descriptors against monster portraits
    pub fn match_monster_descriptors(&self, query: &[Descriptor]) -> Vec<MatchResult> {
        let catalog = &self.catalog;
        self.rank(query, Some(self.monsters.entries()), |id| {
            matches!(catalog.get(id).map(|e| e.kind), Some(CatalogKind::Monster))
        })
    }

    /// Score every base id plus eligible user-memory ids, keep the best
    fn rank<F>(
        &self,
        query: &[Descriptor],
        base: Option<&BTreeMap<String, DescriptorEntry>>,
        memory_filter: F,
    ) -> Vec<MatchResult>
    where
        F: Fn(&str) -> bool,
    {
        if query.is_empty() {
            return Vec::new();
        }

        let mut ids: BTreeSet<&str> = base.map(|b| b.keys().map(String::as_str).collect()).unwrap_or_default();
        ids.extend(self.memory.ids().filter(|id| memory_filter(id)));
        let ids: Vec<&str> = ids.into_iter().collect();

        let ratio = self.params.ratio;
        let threshold = self.params.match_threshold;

        let mut results: Vec<MatchResult> = ids
            .par_iter()
            .filter_map(|&id| {
                let base_score = base
                    .and_then(|b| b.get(id))
                    .map(|entry| score_entry(query, entry, ratio))
                    .unwrap_or(0.0);

                let score = self
                    .memory
                    .entries_for(id)
                    .iter()
                    .map(|entry| score_entry(query, entry, ratio))
                    .fold(base_score, f32::max);

                (score >= threshold).then(|| MatchResult {
                    id: id.to_string(),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(self.params.max_results);

        if let Some(best) = results.first() {
            debug!("Best match {} ({:.3}) among {} candidates", best.id, best.score, ids.len());
        }

        results
    }

    /// Full rebuild of the item library from the catalog
    pub fn rebuild_static_library(&mut self) -> Result<usize, LibraryError> {
        let fingerprint = library_fingerprint(&self.catalog, self.extractor.params());
        let items = FeatureLibrary::build(&self.catalog, &self.extractor);
        items.save(&self.paths.item_cache(), &fingerprint)?;
        self.items = items;
        Ok(self.items.len())
    }

    /// Full rebuild of the monster library from the catalog
    pub fn rebuild_monster_library(&mut self) -> Result<usize, LibraryError> {
        let fingerprint = library_fingerprint(&self.catalog, self.extractor.params());
        let monsters = MonsterLibrary::build(&self.catalog, &self.extractor);
        monsters.save(&self.paths.monster_cache(), &fingerprint)?;
        self.monsters = monsters;
        Ok(self.monsters.len())
    }

    /// Teach the matcher that `crop` shows `id`, persisted immediately
    pub fn remember(&mut self, id: &str, crop: &RgbImage) -> Result<(), LibraryError> {
        if self.catalog.get(id).is_none() {
            return Err(LibraryError::UnknownId(id.to_string()));
        }

        let entry = DescriptorEntry::from(self.extractor.extract_rgb(crop));
        if entry.descriptors.len() < 2 {
            return Err(LibraryError::NoFeatures);
        }

        self.memory.add(id, entry);
        self.memory.save(&self.paths.user_memory(), self.extractor.params())?;
        info!("Remembered new appearance for {} ({} total)", id, self.memory.entries_for(id).len());
        Ok(())
    }
}

impl Recognizer for FeatureMatcher {
    fn match_item(&self, crop: &RgbImage, size: SizeCategory) -> Vec<MatchResult> {
        FeatureMatcher::match_item(self, crop, size)
    }

    fn match_monster_character(&self, crop: &RgbImage) -> Vec<MatchResult> {
        FeatureMatcher::match_monster_character(self, crop)
    }

    fn name_of(&self, id: &str) -> Option<String> {
        self.catalog.name_of(id).map(str::to_string)
    }
}
