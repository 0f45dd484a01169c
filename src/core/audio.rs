use std::{
    fs::File,
    io::{BufWriter, Cursor},
    path::Path,
};

use anyhow::Context;
use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSource, MediaSourceStream},
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::{
    error::{RemixError, Result},
    types::AudioData,
};

/// Decode any supported audio file into interleaved `f32` PCM.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path: &Path = path.as_ref();

    let file = File::open(path).map_err(|e| RemixError::io_at(path, e))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let audio = decode(Box::new(file), hint)
        .with_context(|| format!("Failed to decode audio file: {:?}", path))?;

    log::debug!(
        "read audio {:?}: sample_rate={}, channels={}, frames={}",
        path,
        audio.sample_rate,
        audio.channels,
        audio.frames()
    );

    Ok(audio)
}

/// Decode an in-memory audio file of any supported container.
pub fn decode_bytes(data: &[u8]) -> Result<AudioData> {
    let audio = decode(Box::new(Cursor::new(data.to_vec())), Hint::new())
        .context("Failed to decode audio data")?;
    Ok(audio)
}

fn decode(source: Box<dyn MediaSource>, hint: Hint) -> anyhow::Result<AudioData> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No supported audio track found")?;
    let track_id = track.id;

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: u32 = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels: u16 = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);

        samples.extend_from_slice(buffer.samples());
    }

    if channels == 0 || sample_rate == 0 {
        anyhow::bail!("Audio stream has no channels or sample rate");
    }

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

fn float_spec(audio: &AudioData) -> WavSpec {
    WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Write 32-bit float WAV.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| RemixError::io_at(path, e))?;
    let mut writer = WavWriter::new(BufWriter::new(file), float_spec(audio))?;
    for sample in &audio.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode to an in-memory 32-bit float WAV file.
pub fn encode_wav_bytes(audio: &AudioData) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, float_spec(audio))?;
        for sample in &audio.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Duration of an audio file in seconds, read from container headers when
/// possible and by full decode otherwise.
pub fn probe_duration<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| RemixError::io_at(path, e))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let from_header = probed
        .format
        .default_track()
        .and_then(|t| Some((t.codec_params.n_frames?, t.codec_params.sample_rate?)))
        .filter(|(_, rate)| *rate > 0)
        .map(|(frames, rate)| frames as f64 / rate as f64);

    match from_header {
        Some(secs) => Ok(secs),
        None => Ok(read_audio(path)?.duration_secs()),
    }
}
