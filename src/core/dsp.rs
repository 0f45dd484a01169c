use anyhow::Context;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{error::Result, types::AudioData};

pub fn to_planar_stereo(interleaved: &[f32], channels: u16) -> Vec<[f32; 2]> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().map(|&x| [x, x]).collect(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

const RESAMPLE_CHUNK: usize = 1024;

/// Resample to `to_rate` with a windowed-sinc interpolator. Returns the input
/// unchanged when the rates already match.
///
/// The output is aligned with the input (filter delay removed) and holds
/// exactly `round(frames * to_rate / from_rate)` frames.
pub fn resample(audio: &AudioData, to_rate: u32) -> Result<AudioData> {
    if audio.sample_rate == to_rate || audio.frames() == 0 || audio.channels == 0 {
        return Ok(audio.clone());
    }

    let channels = audio.channels as usize;
    let frames = audio.frames();
    let ratio = to_rate as f64 / audio.sample_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK.min(frames), channels)
            .context("Failed to build resampler")?;
    let delay = resampler.output_delay();

    let planar: Vec<Vec<f32>> = (0..channels)
        .map(|ch| audio.samples.iter().skip(ch).step_by(channels).copied().collect())
        .collect();

    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let n = resampler.input_frames_next();
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + n]).collect();
        let chunk = resampler.process(&block, None).context("Resampling failed")?;
        append_planar(&mut output, chunk);
        pos += n;
    }
    if pos < frames {
        let block: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let chunk = resampler
            .process_partial(Some(block.as_slice()), None)
            .context("Resampling failed")?;
        append_planar(&mut output, chunk);
    }
    // Push zeros through until the delayed tail is out.
    while output[0].len() < delay + expected {
        let chunk = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .context("Resampling failed")?;
        if chunk.first().map_or(true, |c| c.is_empty()) {
            break;
        }
        append_planar(&mut output, chunk);
    }

    let mut samples = Vec::with_capacity(expected * channels);
    for i in delay..delay + expected {
        for channel in &output {
            samples.push(channel.get(i).copied().unwrap_or(0.0));
        }
    }

    Ok(AudioData {
        samples,
        sample_rate: to_rate,
        channels: audio.channels,
    })
}

fn append_planar(output: &mut [Vec<f32>], chunk: Vec<Vec<f32>>) {
    for (out, data) in output.iter_mut().zip(chunk) {
        out.extend_from_slice(&data);
    }
}

/// Map a time in seconds onto a frame offset of a buffer that is
/// `total_frames` long and represents `duration` seconds.
#[inline]
pub fn seconds_to_frame(seconds: f64, duration: f64, total_frames: usize) -> usize {
    if duration <= 0.0 || !seconds.is_finite() {
        return 0;
    }
    let frame = (total_frames as f64 * seconds / duration).round();
    frame.clamp(0.0, total_frames as f64) as usize
}

/// Linear pan law: the side the stem is panned away from is attenuated,
/// the other stays at unity.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let left = if pan > 0.0 { 1.0 - pan } else { 1.0 };
    let right = if pan < 0.0 { 1.0 + pan } else { 1.0 };
    (left, right)
}
