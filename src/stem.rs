use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    core::audio::read_audio,
    error::Result,
    types::{AudioData, StemFile},
};

/// One of the instrument stems the separation engine produces.
///
/// Variant order is the canonical display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StemKind {
    Drums,
    Bass,
    Guitar,
    Piano,
    Vocals,
    Other,
}

/// Names used by older caches and engines, mapped to their current kind.
const LEGACY_ALIASES: &[(&str, StemKind)] = &[
    ("vocals", StemKind::Vocals),
    ("vocal", StemKind::Vocals),
    ("voices", StemKind::Vocals),
    ("piano", StemKind::Piano),
    ("keyboards", StemKind::Piano),
    ("accompaniment", StemKind::Other),
];

impl StemKind {
    pub const ALL: [StemKind; 6] = [
        StemKind::Drums,
        StemKind::Bass,
        StemKind::Guitar,
        StemKind::Piano,
        StemKind::Vocals,
        StemKind::Other,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            StemKind::Drums => "drums",
            StemKind::Bass => "bass",
            StemKind::Guitar => "guitar",
            StemKind::Piano => "piano",
            StemKind::Vocals => "vocals",
            StemKind::Other => "other",
        }
    }

    /// Name shown to the user and used for cached file names.
    pub fn display_name(&self) -> &'static str {
        match self {
            StemKind::Drums => "Drums",
            StemKind::Bass => "Bass",
            StemKind::Guitar => "Guitar",
            StemKind::Piano => "Keys",
            StemKind::Vocals => "Voice",
            StemKind::Other => "Other",
        }
    }

    pub fn from_key(key: &str) -> Option<StemKind> {
        let key = key.trim();
        StemKind::ALL
            .into_iter()
            .find(|k| k.key().eq_ignore_ascii_case(key))
    }

    /// Resolve any name we may meet on disk: current display names, engine
    /// keys, then the legacy alias table.
    pub fn resolve(name: &str) -> Option<StemKind> {
        let name = name.trim();
        StemKind::ALL
            .into_iter()
            .find(|k| k.display_name().eq_ignore_ascii_case(name))
            .or_else(|| StemKind::from_key(name))
            .or_else(|| {
                LEGACY_ALIASES
                    .iter()
                    .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
                    .map(|(_, kind)| *kind)
            })
    }
}

#[derive(Clone, Debug)]
pub struct Stem {
    pub kind: StemKind,
    pub audio: AudioData,
}

/// Decoded stems in canonical order. Replaced wholesale, never edited in place.
#[derive(Clone, Debug, Default)]
pub struct StemSet {
    stems: Vec<Stem>,
}

impl StemSet {
    /// Build a set, sorting into canonical order. A kind that appears twice
    /// keeps its first occurrence.
    pub fn new(mut stems: Vec<Stem>) -> Self {
        stems.sort_by_key(|s| s.kind);
        stems.dedup_by_key(|s| s.kind);
        Self { stems }
    }

    pub fn load(files: &[StemFile]) -> Result<Self> {
        let stems = files
            .par_iter()
            .map(|f| {
                read_audio(&f.path).map(|audio| Stem {
                    kind: f.kind,
                    audio,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(stems))
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn stems(&self) -> &[Stem] {
        &self.stems
    }

    pub fn get(&self, index: usize) -> Option<&Stem> {
        self.stems.get(index)
    }

    pub fn kinds(&self) -> Vec<StemKind> {
        self.stems.iter().map(|s| s.kind).collect()
    }

    pub fn display_names(&self) -> Vec<String> {
        self.stems
            .iter()
            .map(|s| s.kind.display_name().to_string())
            .collect()
    }

    pub fn sample_rate(&self) -> u32 {
        self.stems.first().map(|s| s.audio.sample_rate).unwrap_or(0)
    }

    /// Longest stem duration; stems may differ by a few frames after decode.
    pub fn duration(&self) -> f64 {
        self.stems
            .iter()
            .map(|s| s.audio.duration_secs())
            .fold(0.0, f64::max)
    }

    pub fn max_channels(&self) -> u16 {
        self.stems.iter().map(|s| s.audio.channels).max().unwrap_or(0)
    }
}
