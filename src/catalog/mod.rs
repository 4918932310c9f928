//! Static game databases
//!
//! Loads the item, skill and monster JSON catalogs, resolves each record's
//! reference image and provides id → display name lookup.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::vision::SizeCategory;

pub const ITEMS_FILE: &str = "items_db.json";
pub const SKILLS_FILE: &str = "skills_db.json";
pub const MONSTERS_FILE: &str = "monsters_db.json";

/// Directories searched for `{id}.{ext}` when a record has no usable `image`
const IMAGE_DIRS: [&str; 2] = ["images", "images_monster"];
const IMAGE_EXTENSIONS: [&str; 3] = ["webp", "png", "jpg"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What a catalog record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Item,
    Skill,
    Monster,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Item => "item",
            CatalogKind::Skill => "skill",
            CatalogKind::Monster => "monster",
        }
    }

    /// Label used when an id has no catalog name
    pub fn fallback_label(&self) -> &'static str {
        match self {
            CatalogKind::Item => "Unknown item",
            CatalogKind::Skill => "Unknown skill",
            CatalogKind::Monster => "Unknown monster",
        }
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record as found in any of the JSON databases
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: Option<String>,
    name_cn: Option<String>,
    name_zh: Option<String>,
    name: Option<String>,
    name_en: Option<String>,
    size: Option<String>,
    image: Option<String>,
}

impl RawRecord {
    fn display_name(&self, fallback: &str) -> String {
        [&self.name_cn, &self.name_zh, &self.name, &self.name_en]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MonsterFile {
    List(Vec<RawRecord>),
    Map(BTreeMap<String, RawRecord>),
}

/// One resolved catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub kind: CatalogKind,
    /// Authoritative size bucket, items only
    pub size: Option<SizeCategory>,
    /// Reference image, present only if the file exists
    pub image: Option<PathBuf>,
}

/// All loaded catalogs
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<CatalogEntry>,
    skills: Vec<CatalogEntry>,
    monsters: Vec<CatalogEntry>,
    index: HashMap<String, (CatalogKind, usize)>,
    fingerprint: String,
}

impl Catalog {
    /// Load the catalogs from a resources directory. Missing files load as empty.
    pub fn load(resources_dir: &Path) -> Result<Self, CatalogError> {
        let mut hasher = Sha256::new();

        let items = match read_optional(&resources_dir.join(ITEMS_FILE), &mut hasher)? {
            Some((path, text)) => {
                let records: Vec<RawRecord> = parse(&path, &text)?;
                resolve_records(resources_dir, records, CatalogKind::Item)
            }
            None => {
                warn!("{} not found in {:?}, item catalog is empty", ITEMS_FILE, resources_dir);
                Vec::new()
            }
        };

        let skills = match read_optional(&resources_dir.join(SKILLS_FILE), &mut hasher)? {
            Some((path, text)) => {
                let records: Vec<RawRecord> = parse(&path, &text)?;
                resolve_records(resources_dir, records, CatalogKind::Skill)
            }
            None => Vec::new(),
        };

        let monsters = match read_optional(&resources_dir.join(MONSTERS_FILE), &mut hasher)? {
            Some((path, text)) => match parse::<MonsterFile>(&path, &text)? {
                MonsterFile::List(records) => resolve_records(resources_dir, records, CatalogKind::Monster),
                MonsterFile::Map(map) => map
                    .into_iter()
                    .map(|(key, record)| {
                        let id = record.id.clone().unwrap_or_else(|| key.clone());
                        resolve_record(resources_dir, id, &record, CatalogKind::Monster)
                    })
                    .collect(),
            },
            None => {
                warn!("{} not found in {:?}, monster catalog is empty", MONSTERS_FILE, resources_dir);
                Vec::new()
            }
        };

        let fingerprint = hex(&hasher.finalize());
        let catalog = Self::from_entries(items, skills, monsters, fingerprint);

        info!(
            "Catalog loaded: {} items, {} skills, {} monsters",
            catalog.items.len(),
            catalog.skills.len(),
            catalog.monsters.len()
        );

        Ok(catalog)
    }

    /// Build a catalog from already resolved entries
    pub fn from_entries(
        items: Vec<CatalogEntry>,
        skills: Vec<CatalogEntry>,
        monsters: Vec<CatalogEntry>,
        fingerprint: String,
    ) -> Self {
        let mut index = HashMap::new();
        for (kind, list) in [
            (CatalogKind::Monster, &monsters),
            (CatalogKind::Skill, &skills),
            (CatalogKind::Item, &items),
        ] {
            for (i, entry) in list.iter().enumerate() {
                index.insert(entry.id.clone(), (kind, i));
            }
        }

        Self {
            items,
            skills,
            monsters,
            index,
            fingerprint,
        }
    }

    /// Items and skills, the records matched by size bucket
    pub fn sized_entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.items.iter().chain(self.skills.iter())
    }

    pub fn monsters(&self) -> &[CatalogEntry] {
        &self.monsters
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        let (kind, i) = self.index.get(id)?;
        match kind {
            CatalogKind::Item => self.items.get(*i),
            CatalogKind::Skill => self.skills.get(*i),
            CatalogKind::Monster => self.monsters.get(*i),
        }
    }

    /// Display name for an id, if the catalog knows it
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|e| e.name.as_str())
    }

    /// Digest of the raw catalog files
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn read_optional(path: &Path, hasher: &mut Sha256) -> Result<Option<(PathBuf, String)>, CatalogError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            hasher.update(path.file_name().map(|n| n.as_encoded_bytes()).unwrap_or_default());
            hasher.update(text.as_bytes());
            Ok(Some((path.to_path_buf(), text)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CatalogError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T, CatalogError> {
    serde_json::from_str(text).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_records(resources_dir: &Path, records: Vec<RawRecord>, kind: CatalogKind) -> Vec<CatalogEntry> {
    records
        .into_iter()
        .filter_map(|record| match record.id.clone() {
            Some(id) if !id.is_empty() => Some(resolve_record(resources_dir, id, &record, kind)),
            _ => {
                debug!("Skipping {} record without id", kind);
                None
            }
        })
        .collect()
}

fn resolve_record(resources_dir: &Path, id: String, record: &RawRecord, kind: CatalogKind) -> CatalogEntry {
    let size = match kind {
        CatalogKind::Monster => None,
        _ => record.size.as_deref().and_then(SizeCategory::from_catalog),
    };

    let image = resolve_image(resources_dir, &id, record.image.as_deref());
    if image.is_none() {
        debug!("No image found for {} {}", kind, id);
    }

    CatalogEntry {
        name: record.display_name(&id),
        id,
        kind,
        size,
        image,
    }
}

/// Declared image relative to the resources dir, else `{dir}/{id}.{ext}`
fn resolve_image(resources_dir: &Path, id: &str, declared: Option<&str>) -> Option<PathBuf> {
    if let Some(declared) = declared.filter(|d| !d.is_empty()) {
        let path = resources_dir.join(declared);
        if path.is_file() {
            return Some(path);
        }
    }

    IMAGE_DIRS
        .iter()
        .flat_map(|dir| {
            IMAGE_EXTENSIONS
                .iter()
                .map(move |ext| resources_dir.join(dir).join(format!("{}.{}", id, ext)))
        })
        .find(|path| path.is_file())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_items_and_monster_map() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            ITEMS_FILE,
            r#"[
                {"id": "sword", "name_cn": "长剑", "name_en": "Sword", "size": "Medium", "image": "art/sword.png"},
                {"id": "dagger", "name_en": "Dagger", "size": "Small / 小型"},
                {"name_en": "No id"}
            ]"#,
        );
        write(
            dir.path(),
            MONSTERS_FILE,
            r#"{"Banannibal": {"name_zh": "香蕉食人族", "image": "m/banannibal.jpg"}}"#,
        );
        write(dir.path(), "art/sword.png", "x");
        write(dir.path(), "images/dagger.webp", "x");

        let catalog = Catalog::load(dir.path()).unwrap();

        assert_eq!(catalog.sized_entries().count(), 2);
        let sword = catalog.get("sword").unwrap();
        assert_eq!(sword.name, "长剑");
        assert_eq!(sword.size, Some(SizeCategory::Medium));
        assert_eq!(sword.image, Some(dir.path().join("art/sword.png")));

        let dagger = catalog.get("dagger").unwrap();
        assert_eq!(dagger.name, "Dagger");
        assert_eq!(dagger.size, Some(SizeCategory::Small));
        assert_eq!(dagger.image, Some(dir.path().join("images/dagger.webp")));

        let monster = catalog.get("Banannibal").unwrap();
        assert_eq!(monster.kind, CatalogKind::Monster);
        assert_eq!(monster.name, "香蕉食人族");
        assert_eq!(monster.image, None);
    }

    #[test]
    fn test_monster_list_and_skills() {
        let dir = tempdir().unwrap();
        write(dir.path(), ITEMS_FILE, "[]");
        write(dir.path(), SKILLS_FILE, r#"[{"id": "s1", "name": "Hot Hands"}]"#);
        write(dir.path(), MONSTERS_FILE, r#"[{"id": "m1", "name": "Boss"}]"#);

        let catalog = Catalog::load(dir.path()).unwrap();
        assert_eq!(catalog.name_of("s1"), Some("Hot Hands"));
        assert_eq!(catalog.get("s1").unwrap().kind, CatalogKind::Skill);
        assert_eq!(catalog.monsters().len(), 1);
        assert_eq!(catalog.name_of("missing"), None);
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::load(dir.path()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        write(dir.path(), ITEMS_FILE, "{ not json");
        assert!(matches!(Catalog::load(dir.path()), Err(CatalogError::Parse { .. })));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let dir = tempdir().unwrap();
        write(dir.path(), ITEMS_FILE, r#"[{"id": "a"}]"#);
        let first = Catalog::load(dir.path()).unwrap().fingerprint().to_string();
        assert_eq!(first, Catalog::load(dir.path()).unwrap().fingerprint());

        write(dir.path(), ITEMS_FILE, r#"[{"id": "b"}]"#);
        assert_ne!(first, Catalog::load(dir.path()).unwrap().fingerprint());
    }
}
