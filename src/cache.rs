// Layout: `<root>/<key>/metadata.json` plus one `<DisplayName>.wav` per stem.
// metadata.json is written last and acts as the commit marker.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{RemixError, Result},
    io::crypto::cache_key,
    stem::StemKind,
    types::{CacheKey, InputFile, StemFile},
};

const METADATA_FILE: &str = "metadata.json";
const STEM_EXT: &str = "wav";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub original_path: String,
    pub file_size: u64,
    pub modification_date: DateTime<Utc>,
    pub stem_names: Vec<String>,
    pub sample_rate: u32,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key(&self, input: &InputFile) -> CacheKey {
        cache_key(input)
    }

    /// Read the identity of `path` and derive its key.
    pub fn key_for_path<P: AsRef<Path>>(&self, path: P) -> Result<CacheKey> {
        Ok(cache_key(&InputFile::from_path(path)?))
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn stem_path(&self, key: &CacheKey, name: &str) -> PathBuf {
        self.entry_dir(key).join(format!("{name}.{STEM_EXT}"))
    }

    pub fn load_metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
        let path = self.entry_dir(key).join(METADATA_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                log::warn!("ignoring unreadable cache metadata {:?}: {e}", path);
                None
            }
        }
    }

    /// True iff the metadata parses, names at least one known stem, and every
    /// known stem it names is on disk.
    pub fn has_valid_cache(&self, key: &CacheKey) -> bool {
        self.load_stem_paths(key).is_some()
    }

    /// Stem files of a valid entry in canonical order.
    ///
    /// Stored names go through [`StemKind::resolve`], so entries written
    /// under older names still load. Names that resolve to no stem are
    /// skipped and never touch the filesystem. Any missing file voids the
    /// entry.
    pub fn load_stem_paths(&self, key: &CacheKey) -> Option<Vec<StemFile>> {
        let meta = self.load_metadata(key)?;
        let mut files = Vec::with_capacity(meta.stem_names.len());
        for name in &meta.stem_names {
            let Some(kind) = StemKind::resolve(name) else {
                log::warn!("cache {key}: unknown stem name {name:?}, skipped");
                continue;
            };
            let path = self.stem_path(key, name.trim());
            if !is_readable_file(&path) {
                log::debug!("cache {key}: stem file {:?} missing", path);
                return None;
            }
            files.push(StemFile { kind, path });
        }
        files.sort_by_key(|f| f.kind);
        files.dedup_by_key(|f| f.kind);
        (!files.is_empty()).then_some(files)
    }

    /// Copy `stems` into the entry for `key`, then commit the metadata.
    ///
    /// Returns `false` (leaving no valid entry behind) if anything fails.
    pub fn save(
        &self,
        key: &CacheKey,
        input: &InputFile,
        stems: &[StemFile],
        sample_rate: u32,
        duration: f64,
    ) -> bool {
        match self.try_save(key, input, stems, sample_rate, duration) {
            Ok(()) => {
                log::info!("cached {} stems under {key}", stems.len());
                true
            }
            Err(e) => {
                log::warn!("failed to cache stems under {key}: {e}");
                self.clear(key);
                false
            }
        }
    }

    fn try_save(
        &self,
        key: &CacheKey,
        input: &InputFile,
        stems: &[StemFile],
        sample_rate: u32,
        duration: f64,
    ) -> Result<()> {
        if stems.is_empty() {
            return Err(RemixError::NoStemsProduced);
        }
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).map_err(|e| RemixError::io_at(&dir, e))?;

        // An older commit marker must not vouch for files being replaced.
        let meta_path = dir.join(METADATA_FILE);
        if meta_path.exists() {
            fs::remove_file(&meta_path).map_err(|e| RemixError::io_at(&meta_path, e))?;
        }

        let mut ordered: Vec<&StemFile> = stems.iter().collect();
        ordered.sort_by_key(|s| s.kind);
        ordered.dedup_by_key(|s| s.kind);

        let mut names = Vec::with_capacity(ordered.len());
        for stem in ordered {
            let name = stem.kind.display_name();
            let dest = self.stem_path(key, name);
            fs::copy(&stem.path, &dest).map_err(|e| RemixError::io_at(&stem.path, e))?;
            names.push(name.to_string());
        }

        let meta = CacheMetadata {
            original_path: input.path.to_string_lossy().into_owned(),
            file_size: input.size,
            modification_date: DateTime::<Utc>::from(input.modified),
            stem_names: names,
            sample_rate,
            duration,
            created_at: Utc::now(),
        };
        let tmp = dir.join(format!("{METADATA_FILE}.part"));
        fs::write(&tmp, serde_json::to_vec_pretty(&meta)?)
            .map_err(|e| RemixError::io_at(&tmp, e))?;
        fs::rename(&tmp, &meta_path).map_err(|e| RemixError::io_at(&meta_path, e))?;
        Ok(())
    }

    /// Remove one entry. Failures are logged, never returned.
    pub fn clear(&self, key: &CacheKey) {
        let dir = self.entry_dir(key);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                log::warn!("failed to clear cache entry {:?}: {e}", dir);
            }
        }
    }

    pub fn clear_all(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let res = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = res {
                log::warn!("failed to remove {:?}: {e}", path);
            }
        }
    }

    /// Valid entries currently on disk, sorted by creation time.
    pub fn entries(&self) -> Vec<(CacheKey, CacheMetadata)> {
        let Ok(dirs) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut out: Vec<_> = dirs
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let key = CacheKey::new(e.file_name().to_string_lossy().into_owned());
                if !self.has_valid_cache(&key) {
                    return None;
                }
                self.load_metadata(&key).map(|meta| (key, meta))
            })
            .collect();
        out.sort_by_key(|(_, meta)| meta.created_at);
        out
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}
