use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{RemixError, Result},
    stem::StemKind,
    types::StemFile,
};

/// Result object the engine prints on stdout.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineManifest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    pub stems: BTreeMap<String, PathBuf>,
}

/// Parse the engine's stdout. Log noise around the JSON object is tolerated.
pub fn parse_manifest(stdout: &str) -> Result<EngineManifest> {
    let trimmed = stdout.trim();
    if let Ok(m) = serde_json::from_str::<EngineManifest>(trimmed) {
        return Ok(m);
    }
    let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(RemixError::ManifestParse {
            reason: "no JSON object in engine output".into(),
            raw: stdout.to_string(),
        });
    };
    if close < open {
        return Err(RemixError::ManifestParse {
            reason: "no JSON object in engine output".into(),
            raw: stdout.to_string(),
        });
    }
    serde_json::from_str(&trimmed[open..=close]).map_err(|e| RemixError::ManifestParse {
        reason: e.to_string(),
        raw: stdout.to_string(),
    })
}

/// Canonical stems named by the manifest whose files exist.
///
/// Unknown keys and missing files are dropped; nothing left is an error.
pub fn collect_stems(manifest: &EngineManifest) -> Result<Vec<StemFile>> {
    let mut stems = Vec::with_capacity(manifest.stems.len());
    for (key, path) in &manifest.stems {
        let Some(kind) = StemKind::from_key(key) else {
            log::warn!("engine produced unknown stem {key:?}, ignored");
            continue;
        };
        if !path.is_file() {
            log::warn!("engine listed {key} at {:?} but the file is missing", path);
            continue;
        }
        stems.push(StemFile {
            kind,
            path: path.clone(),
        });
    }
    if stems.is_empty() {
        return Err(RemixError::NoStemsProduced);
    }
    stems.sort_by_key(|s| s.kind);
    stems.dedup_by_key(|s| s.kind);
    Ok(stems)
}
