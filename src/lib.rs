//! # remix-core
//!
//! Session, cache and mixing engine for stem separation: runs an external
//! separation engine, caches its stems by input-file identity, plays them
//! back through a per-stem mixer with loop regions, and renders mixdowns.

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod separation;
pub mod session;
pub mod stem;
pub mod types;

pub use crate::{
    cache::{CacheMetadata, CacheStore},
    config::{EngineCommand, RemixConfig},
    core::{
        audio::{read_audio, write_audio},
        graph::{GraphRenderer, PlaybackGraph, Segment},
        mixdown::{MixdownBuffer, MixdownExporter},
        mixer::{ChannelSettings, MixerState},
        transport::{
            Clock, ManualClock, PlaybackState, SystemClock, TransportController, TransportState,
        },
    },
    error::{RemixError, Result},
    io::{
        convert::{FormatConverter, SymphoniaConverter},
        settings::{JsonFileStore, MemoryStore, PersistentStore},
    },
    separation::{JobHandle, JobStatus, SeparationJobRunner, TimeEstimator},
    session::{Session, SessionEvent, SessionState},
    stem::{Stem, StemKind, StemSet},
    types::{AudioData, CacheKey, InputFile, LoopRegion, StemFile},
};

#[cfg(feature = "playback")]
pub use crate::core::device::{AudioOutput, OutputFormat};
