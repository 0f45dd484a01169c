use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{RemixError, Result},
    stem::StemKind,
};

#[derive(Clone, Debug, PartialEq)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` for output channel `ch`. Channels the buffer does not
    /// have fall back to its first channel, so mono material feeds every output.
    #[inline]
    pub fn sample(&self, frame: usize, ch: usize) -> f32 {
        let channels = self.channels as usize;
        if channels == 0 {
            return 0.0;
        }
        let ch = if ch < channels { ch } else { 0 };
        self.samples
            .get(frame * channels + ch)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Identity of an input file on disk: absolute path, byte size, mtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl InputFile {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let abs = fs::canonicalize(path).map_err(|e| RemixError::io_at(path, e))?;
        let meta = fs::metadata(&abs).map_err(|e| RemixError::io_at(&abs, e))?;
        let modified = meta.modified().map_err(|e| RemixError::io_at(&abs, e))?;
        Ok(Self {
            path: abs,
            size: meta.len(),
            modified,
        })
    }

    /// Modification time as nanoseconds since the Unix epoch (negative before it).
    pub fn modified_nanos(&self) -> i128 {
        match self.modified.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i128,
            Err(e) => -(e.duration().as_nanos() as i128),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(hex: impl Into<String>) -> Self {
        CacheKey(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey(s.to_string())
    }
}

/// Loop region in seconds. A region with `end <= start` means "no region".
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

impl LoopRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn is_active(&self) -> bool {
        self.end > self.start
    }

    pub fn len(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    /// Clamp into `[0, duration]`; `None` when nothing playable remains.
    pub fn clamped(&self, duration: f64) -> Option<LoopRegion> {
        let start = self.start.max(0.0);
        let end = self.end.min(duration);
        let r = LoopRegion { start, end };
        r.is_active().then_some(r)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StemFile {
    pub kind: StemKind,
    pub path: PathBuf,
}
