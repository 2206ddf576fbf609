//! cpal-backed capture source and playback sink
//!
//! # Capture
//!
//! The input stream delivers interleaved i16 blocks straight to the
//! registered callback on cpal's audio thread. The stream object stays
//! on the control thread that opened it.
//!
//! # Sink
//!
//! `cpal::Stream` is not `Send`, but the pipeline's worker thread owns
//! the sink. The stream therefore lives on a dedicated keeper thread and
//! audio crosses over through a lock-free sample ring: the worker's
//! `write_interleaved` pushes frames, the output callback pops them and
//! plays silence when the ring runs dry. An underrun is consequently
//! absorbed by the callback itself and `recover` has nothing left to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use crate::error::{AurisError, AurisResult};
use crate::io::{AudioCapture, AudioSink, BlockCallback, CaptureFormat, SinkError, SinkFormat};

/// How long `write_interleaved` waits on a full ring before declaring
/// the device stalled
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(1);

fn find_input_device(name: Option<&str>) -> AurisResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AurisError::Capture("no default input device".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AurisError::Capture(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AurisError::Capture(format!("input device '{wanted}' not found"))),
    }
}

fn find_output_device(name: Option<&str>) -> AurisResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AurisError::Sink("no default output device".to_string())),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| AurisError::Sink(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AurisError::Sink(format!("output device '{wanted}' not found"))),
    }
}

/// Multi-channel capture through a cpal input stream
pub struct CpalCapture {
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// `device_name` of `None` selects the system default input
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
        }
    }
}

impl AudioCapture for CpalCapture {
    fn open(&mut self, format: CaptureFormat, mut on_block: BlockCallback) -> AurisResult<()> {
        let device = find_input_device(self.device_name.as_deref())?;
        let device_label = device.name().unwrap_or_else(|_| "unknown".to_string());

        // cpal buffer sizes count frames, not interleaved samples
        let config = StreamConfig {
            channels: format.channels as u16,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Fixed(format.block_samples as u32),
        };
        log::info!(
            "Capture device '{}': {} channels at {} Hz, {} samples/block",
            device_label,
            format.channels,
            format.sample_rate,
            format.block_samples
        );

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    on_block(data);
                },
                |err| log::error!("Capture stream error: {err}"),
                None,
            )
            .map_err(|e| AurisError::Capture(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn start(&mut self) -> AurisResult<()> {
        self.stream
            .as_ref()
            .ok_or_else(|| AurisError::InvalidParam("capture not opened".to_string()))?
            .play()
            .map_err(|e| AurisError::Capture(e.to_string()))
    }

    fn stop(&mut self) -> AurisResult<()> {
        self.stream
            .as_ref()
            .ok_or_else(|| AurisError::InvalidParam("capture not opened".to_string()))?
            .pause()
            .map_err(|e| AurisError::Capture(e.to_string()))
    }
}

/// Stereo playback through a cpal output stream on a keeper thread
pub struct CpalSink {
    device_name: Option<String>,
    producer: Option<rtrb::Producer<i16>>,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    keeper: Option<JoinHandle<()>>,
    volume: f32,
}

impl CpalSink {
    /// `device_name` of `None` selects the system default output
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            producer: None,
            playing: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            keeper: None,
            volume: 1.0,
        }
    }
}

impl AudioSink for CpalSink {
    fn open(&mut self, format: SinkFormat) -> AurisResult<()> {
        // 4x the device buffer absorbs scheduling jitter between the
        // worker and the audio callback
        let ring_capacity = format.buffer_frames.max(64) * format.channels * 4;
        let (producer, mut consumer) = rtrb::RingBuffer::<i16>::new(ring_capacity);

        let playing = Arc::clone(&self.playing);
        let shutdown = Arc::clone(&self.shutdown);
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = mpsc::channel::<AurisResult<()>>();

        let keeper = std::thread::Builder::new()
            .name("auris-sink".to_string())
            .spawn(move || {
                let stream = match build_output_stream(device_name.as_deref(), format, {
                    let playing = Arc::clone(&playing);
                    move |data: &mut [i16]| {
                        if !playing.load(Ordering::Acquire) {
                            data.fill(0);
                            return;
                        }
                        for slot in data.iter_mut() {
                            *slot = consumer.pop().unwrap_or(0);
                        }
                    }
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AurisError::Sink(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !shutdown.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                // Dropping the stream closes the device
            })
            .map_err(|e| AurisError::Init(format!("failed to spawn sink thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| AurisError::Sink("sink thread exited during open".to_string()))??;

        self.producer = Some(producer);
        self.keeper = Some(keeper);
        Ok(())
    }

    fn start(&mut self) -> AurisResult<()> {
        if self.producer.is_none() {
            return Err(AurisError::InvalidParam("sink not opened".to_string()));
        }
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> AurisResult<()> {
        self.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn recover(&mut self) -> AurisResult<()> {
        // The callback already substitutes silence on an empty ring;
        // there is no device state to rebuild.
        Ok(())
    }

    fn write_interleaved(&mut self, pcm: &[i16]) -> Result<usize, SinkError> {
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| SinkError::Device("sink not opened".to_string()))?;
        let volume = self.volume;

        let deadline = std::time::Instant::now() + WRITE_STALL_TIMEOUT;
        for &sample in pcm {
            let scaled = (sample as f32 * volume) as i16;
            loop {
                match producer.push(scaled) {
                    Ok(()) => break,
                    Err(_) => {
                        if std::time::Instant::now() >= deadline {
                            return Err(SinkError::Device("output ring stalled".to_string()));
                        }
                        std::thread::sleep(Duration::from_micros(500));
                    }
                }
            }
        }
        Ok(pcm.len() / 2)
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.playing.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        if let Some(keeper) = self.keeper.take() {
            keeper.thread().unpark();
            let _ = keeper.join();
        }
    }
}

fn build_output_stream<F>(
    device_name: Option<&str>,
    format: SinkFormat,
    mut fill: F,
) -> AurisResult<cpal::Stream>
where
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let device = find_output_device(device_name)?;
    let device_label = device.name().unwrap_or_else(|_| "unknown".to_string());

    let config = StreamConfig {
        channels: format.channels as u16,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Fixed(format.buffer_frames as u32),
    };
    log::info!(
        "Playback device '{}': {} channels at {} Hz, {} frame buffer",
        device_label,
        format.channels,
        format.sample_rate,
        format.buffer_frames
    );

    device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| fill(data),
            |err| log::error!("Playback stream error: {err}"),
            None,
        )
        .map_err(|e| AurisError::Sink(e.to_string()))
}
