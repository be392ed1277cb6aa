use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::renderer::{SampleRenderer, SlopeShape, DEFAULT_SAMPLE_RATE, DEFAULT_SLOPE_USECS};
use super::sink::AudioSink;
use crate::error::{CwError, Result};
use crate::generator::lock;

struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Sound card output through cpal.
///
/// cpal streams cannot move between threads, so each open spawns a thread
/// that owns the stream until close. Frequency and volume reach the audio
/// callback through the shared renderer.
pub struct CpalSink {
    renderer: Arc<Mutex<SampleRenderer>>,
    stream: Option<StreamThread>,
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalSink {
    pub fn new() -> Self {
        Self::with_slope(SlopeShape::default(), DEFAULT_SLOPE_USECS)
    }

    pub fn with_slope(shape: SlopeShape, usecs: u32) -> Self {
        let mut renderer = SampleRenderer::new(DEFAULT_SAMPLE_RATE);
        renderer.set_slope(shape, usecs);
        Self {
            renderer: Arc::new(Mutex::new(renderer)),
            stream: None,
        }
    }

    fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
        if let Some(name) = name {
            let devices = host
                .output_devices()
                .map_err(|e| CwError::System(e.to_string()))?;
            for device in devices {
                if device.name().map(|n| n == name).unwrap_or(false) {
                    return Ok(device);
                }
            }
            log::warn!("Audio device {:?} not found, using default", name);
        }
        host.default_output_device()
            .ok_or_else(|| CwError::System("No audio output device found".to_string()))
    }

    fn start_stream(
        device_name: Option<&str>,
        renderer: Arc<Mutex<SampleRenderer>>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = Self::find_device(&host, device_name)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| CwError::System(e.to_string()))?;
        lock(&renderer).set_sample_rate(supported_config.sample_rate().0);

        let stream = match supported_config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &supported_config.into(), renderer)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &supported_config.into(), renderer)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &supported_config.into(), renderer)
            }
            other => {
                return Err(CwError::System(format!(
                    "Unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| CwError::System(e.to_string()))?;

        stream.play().map_err(|e| CwError::System(e.to_string()))?;
        Ok(stream)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        renderer: Arc<Mutex<SampleRenderer>>,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let mut mono_buffer = Vec::new();

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let num_frames = data.len() / channels;
                mono_buffer.resize(num_frames, 0.0f32);
                lock(&renderer).fill_buffer(&mut mono_buffer);

                // Same signal on every channel
                for (frame, sample) in data.chunks_mut(channels).zip(mono_buffer.iter()) {
                    let converted: T = T::from_sample(*sample);
                    for channel_sample in frame.iter_mut() {
                        *channel_sample = converted;
                    }
                }
            },
            |err| log::warn!("Audio stream error: {}", err),
            None,
        )
    }
}

impl AudioSink for CpalSink {
    fn open(&mut self, device: Option<&str>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let renderer = Arc::clone(&self.renderer);
        let device_name = device.map(str::to_string);

        let handle = std::thread::Builder::new()
            .name("cw-audio".to_string())
            .spawn(move || match Self::start_stream(device_name.as_deref(), renderer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Hold the stream until close, or until the sink is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let started = ready_rx
            .recv()
            .map_err(|_| CwError::System("Audio thread exited during startup".to_string()))?;
        if let Err(e) = started {
            let _ = handle.join();
            return Err(e);
        }

        self.stream = Some(StreamThread { stop_tx, handle });
        log::info!("Audio output opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.stop_tx.send(());
            let _ = stream.handle.join();
            lock(&self.renderer).set_frequency(0);
            log::info!("Audio output closed");
        }
    }

    fn play(&mut self, frequency: i32) -> Result<()> {
        if self.stream.is_none() {
            return Err(CwError::System("cpal sink is not open".to_string()));
        }
        lock(&self.renderer).set_frequency(frequency);
        Ok(())
    }

    fn set_volume(&mut self, percent: i32) {
        lock(&self.renderer).set_volume(percent);
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}
