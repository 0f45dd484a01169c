use std::{fs::File, io::Read, path::Path};

use crate::core::audio::{decode_bytes, encode_wav_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioContainer {
    Wav,
    Mp3,
    Unknown,
}

/// Sniff the container from the first bytes of a file.
pub fn detect_container(header: &[u8]) -> AudioContainer {
    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE" {
        return AudioContainer::Wav;
    }
    if header.len() >= 3 && &header[0..3] == b"ID3" {
        return AudioContainer::Mp3;
    }
    if header.len() >= 2 && header[0] == 0xFF && (header[1] & 0xE0) == 0xE0 {
        return AudioContainer::Mp3;
    }
    AudioContainer::Unknown
}

/// Container of the file at `path`; unreadable files count as `Unknown`.
pub fn detect_file_container(path: &Path) -> AudioContainer {
    let mut header = [0u8; 12];
    let read = File::open(path).and_then(|mut f| {
        let mut n = 0;
        while n < header.len() {
            match f.read(&mut header[n..])? {
                0 => break,
                k => n += k,
            }
        }
        Ok(n)
    });
    match read {
        Ok(n) => detect_container(&header[..n]),
        Err(_) => AudioContainer::Unknown,
    }
}

#[derive(Debug, Clone)]
pub struct ConvertedAudio {
    pub wav: Vec<u8>,
    pub sample_rate: u32,
}

pub trait FormatConverter: Send + Sync {
    /// Convert an audio file's bytes to WAV, or describe why not.
    fn convert(&self, data: &[u8]) -> std::result::Result<ConvertedAudio, String>;
}

/// Decodes with symphonia and re-encodes as 32-bit float WAV.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaConverter;

impl FormatConverter for SymphoniaConverter {
    fn convert(&self, data: &[u8]) -> std::result::Result<ConvertedAudio, String> {
        if data.is_empty() {
            return Err("Input data is empty".to_string());
        }
        let audio = decode_bytes(data).map_err(|e| format!("Failed to load audio: {e}"))?;
        let wav = encode_wav_bytes(&audio).map_err(|e| format!("Failed to encode WAV: {e}"))?;
        Ok(ConvertedAudio {
            wav,
            sample_rate: audio.sample_rate,
        })
    }
}
