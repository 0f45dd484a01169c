use std::path::Path;

use ndarray::Array2;

use super::{
    audio::write_audio,
    dsp::{pan_gains, seconds_to_frame},
    mixer::MixerState,
};
use crate::{
    error::{RemixError, Result},
    stem::StemSet,
    types::{AudioData, LoopRegion},
};

/// Rendered mixdown, planar `(channels, frames)`.
#[derive(Debug, Clone)]
pub struct MixdownBuffer {
    pub data: Array2<f32>,
    pub sample_rate: u32,
    /// Factor the sum was scaled by to keep the peak at or below 1.0.
    pub normalization: f32,
}

impl MixdownBuffer {
    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn frames(&self) -> usize {
        self.data.ncols()
    }

    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn to_interleaved(&self) -> AudioData {
        let (channels, frames) = self.data.dim();
        let mut samples = Vec::with_capacity(channels * frames);
        for f in 0..frames {
            for ch in 0..channels {
                samples.push(self.data[[ch, f]]);
            }
        }
        AudioData {
            samples,
            sample_rate: self.sample_rate,
            channels: channels as u16,
        }
    }
}

pub struct MixdownExporter;

impl MixdownExporter {
    /// Sum every stem, scaled by its effective gain, over the region (or the
    /// whole file). Pan applies only when the output has two or more
    /// channels. If the summed peak exceeds 1.0 the whole buffer is scaled by
    /// `1 / peak`.
    pub fn render(
        stems: &StemSet,
        mixer: &MixerState,
        region: Option<LoopRegion>,
    ) -> Result<MixdownBuffer> {
        if stems.is_empty() {
            return Err(RemixError::Mixdown("no stems to render".into()));
        }
        if mixer.len() != stems.len() {
            return Err(RemixError::Mixdown(format!(
                "mixer has {} channels for {} stems",
                mixer.len(),
                stems.len()
            )));
        }

        let duration = stems.duration();
        let (start, end) = match region.and_then(|r| r.clamped(duration)) {
            Some(r) => (r.start, r.end),
            None => (0.0, duration),
        };
        let channels = stems.max_channels().max(1) as usize;

        let ranges: Vec<(usize, usize)> = stems
            .stems()
            .iter()
            .map(|s| {
                let total = s.audio.frames();
                (
                    seconds_to_frame(start, duration, total),
                    seconds_to_frame(end, duration, total),
                )
            })
            .collect();
        let frames = ranges.iter().map(|(a, b)| b - a).max().unwrap_or(0);

        let mut data = Array2::<f32>::zeros((channels, frames));
        for (i, stem) in stems.stems().iter().enumerate() {
            let gain = mixer.effective_gain(i);
            if gain == 0.0 {
                continue;
            }
            let pan = mixer.channel(i).map(|c| c.pan).unwrap_or(0.0);
            let (pan_l, pan_r) = if channels >= 2 {
                pan_gains(pan)
            } else {
                (1.0, 1.0)
            };
            let (first, last) = ranges[i];
            for (f, src) in (first..last).enumerate() {
                for ch in 0..channels {
                    let pan_gain = match ch {
                        0 => pan_l,
                        1 => pan_r,
                        _ => 1.0,
                    };
                    data[[ch, f]] += stem.audio.sample(src, ch) * gain * pan_gain;
                }
            }
        }

        let peak = data.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        let normalization = if peak > 1.0 { 1.0 / peak } else { 1.0 };
        if peak > 1.0 {
            data.mapv_inplace(|s| s / peak);
        }

        Ok(MixdownBuffer {
            data,
            sample_rate: stems.sample_rate(),
            normalization,
        })
    }

    /// Render and write a 32-bit float WAV to `dest`.
    pub fn export<P: AsRef<Path>>(
        stems: &StemSet,
        mixer: &MixerState,
        region: Option<LoopRegion>,
        dest: P,
    ) -> Result<MixdownBuffer> {
        let dest = dest.as_ref();
        let buffer = Self::render(stems, mixer, region)?;
        write_audio(dest, &buffer.to_interleaved())?;
        log::info!(
            "mixdown written to {:?} ({} frames, normalization {:.3})",
            dest,
            buffer.frames(),
            buffer.normalization
        );
        Ok(buffer)
    }
}
