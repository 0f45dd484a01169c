pub mod audio;
#[cfg(feature = "playback")]
pub mod device;
pub mod dsp;
pub mod graph;
pub mod mixdown;
pub mod mixer;
pub mod transport;
