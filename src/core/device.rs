use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::graph::GraphRenderer;
use crate::error::{RemixError, Result};

/// Negotiated output format of the default device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Keeps the output stream alive. Drop to stop audio.
pub struct AudioOutput {
    _stream: Stream,
    format: OutputFormat,
    device_name: String,
}

fn default_device() -> Result<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| RemixError::AudioDevice("no default output device".into()))
}

impl AudioOutput {
    /// Query the default device's preferred format without opening a stream.
    pub fn probe_default() -> Result<OutputFormat> {
        let device = default_device()?;
        let config = device
            .default_output_config()
            .map_err(|e| RemixError::AudioDevice(e.to_string()))?;
        Ok(OutputFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    /// Open the default device and start pulling audio from `renderer`.
    pub fn start(mut renderer: GraphRenderer) -> Result<Self> {
        let device = default_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_output_config()
            .map_err(|e| RemixError::AudioDevice(e.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(RemixError::AudioDevice(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        let config: StreamConfig = supported.into();
        let format = OutputFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    renderer.render(data, channels);
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| RemixError::AudioDevice(e.to_string()))?;
        stream
            .play()
            .map_err(|e| RemixError::AudioDevice(e.to_string()))?;

        log::info!(
            "audio output started on {} ({} Hz, {} ch)",
            device_name,
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            _stream: stream,
            format,
            device_name,
        })
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}
