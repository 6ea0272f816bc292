//! cpal-backed session audio source for the CLI: S16LE mono frames are
//! pushed into a lock-free ring drained by the engine thread.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::Producer as ProducerTrait;
use ringbuf::HeapProd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Audio device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// List available input devices.
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut devices = Vec::new();
    for device in host
        .input_devices()
        .context("Failed to enumerate input devices")?
    {
        if let Ok(name) = device.name() {
            devices.push(AudioDevice {
                is_default: name == default_name,
                name,
            });
        }
    }

    Ok(devices)
}

/// Get a device by name, or the default input device.
pub fn get_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    match device_name {
        Some(name) if name != "default" => {
            for device in host.input_devices().context("Failed to enumerate devices")? {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            anyhow::bail!("Device not found: {}", name);
        }
        _ => host
            .default_input_device()
            .context("No default input device available"),
    }
}

/// Selected stream configuration with its sample format.
pub struct SelectedConfig {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
}

/// Select an input configuration running at exactly `rate` Hz. The engine
/// does no resampling, so a source that cannot match the rate is an error.
pub fn select_input_config(device: &Device, rate: u32) -> Result<SelectedConfig> {
    let supported = device
        .supported_input_configs()
        .context("Failed to query input configs")?;

    let mut fallback = None;
    for range in supported {
        if range.min_sample_rate().0 > rate || range.max_sample_rate().0 < rate {
            continue;
        }
        let config = range.with_sample_rate(cpal::SampleRate(rate));
        let mono = config.channels() == 1;
        let native = config.sample_format() == SampleFormat::I16;
        let selected = SelectedConfig {
            sample_format: config.sample_format(),
            config: config.into(),
        };
        if mono && native {
            return Ok(selected);
        }
        if fallback.is_none() || mono {
            fallback = Some(selected);
        }
    }

    fallback.ok_or_else(|| {
        anyhow::anyhow!("Device does not support capture at {rate} Hz (no resampling)")
    })
}

/// Live capture stream writing mono i16 samples into the ring.
pub struct AudioSource {
    stream: Stream,
    overflow_counter: Arc<AtomicU64>,
}

impl AudioSource {
    pub fn new(
        device: &Device,
        selected: &SelectedConfig,
        mut producer: HeapProd<i16>,
    ) -> Result<Self> {
        let channels = selected.config.channels as usize;
        let overflow_counter = Arc::new(AtomicU64::new(0));

        info!(
            "Building input stream: {} Hz, {} channels, format {:?}",
            selected.config.sample_rate.0, channels, selected.sample_format
        );

        let error_callback = |err| {
            error!("Audio stream error: {}", err);
        };

        let stream = match selected.sample_format {
            SampleFormat::I16 => {
                let overflow = overflow_counter.clone();
                device.build_input_stream(
                    &selected.config,
                    move |data: &[i16], _| {
                        for frame in data.chunks(channels) {
                            if producer.try_push(frame[0]).is_err() {
                                overflow.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    },
                    error_callback,
                    None,
                )
            }
            SampleFormat::F32 => {
                let overflow = overflow_counter.clone();
                device.build_input_stream(
                    &selected.config,
                    move |data: &[f32], _| {
                        for frame in data.chunks(channels) {
                            let sample = (frame[0].clamp(-1.0, 1.0) * 32767.0) as i16;
                            if producer.try_push(sample).is_err() {
                                overflow.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    },
                    error_callback,
                    None,
                )
            }
            other => anyhow::bail!("Unsupported sample format: {:?}", other),
        }
        .context("Failed to build input stream")?;

        Ok(Self {
            stream,
            overflow_counter,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.stream.play().context("Failed to start audio stream")?;
        info!("Audio capture started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.stream.pause().context("Failed to stop audio stream")?;
        debug!("Audio capture stopped");
        Ok(())
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_counter.load(Ordering::Relaxed)
    }
}
