//! Capture and playback device contracts
//!
//! The pipeline talks to hardware exclusively through these traits. A
//! capture source delivers interleaved little-endian signed 16-bit PCM
//! blocks to a registered callback; a sink accepts interleaved stereo
//! frames. The kernel-level I2S/DMA driver and the OS sound device sit
//! behind them; tests substitute in-memory doubles.

use thiserror::Error;

use crate::error::{AurisError, AurisResult};

/// Capture stream parameters
#[derive(Debug, Clone, Copy)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u16,
    /// Samples per channel in one callback block
    pub block_samples: usize,
}

/// Playback stream parameters
#[derive(Debug, Clone, Copy)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: usize,
    pub bits_per_sample: u16,
    /// Frames buffered by the device
    pub buffer_frames: usize,
}

/// Handler invoked by the capture source for every interleaved block.
/// Runs on the capture thread: it must not allocate, lock or block.
pub type BlockCallback = Box<dyn FnMut(&[i16]) + Send>;

/// Abstract multi-channel capture source
///
/// Lives on the control thread; only its callback runs concurrently.
pub trait AudioCapture {
    /// Configure the stream and register the block callback
    fn open(&mut self, format: CaptureFormat, on_block: BlockCallback) -> AurisResult<()>;
    fn start(&mut self) -> AurisResult<()>;
    fn stop(&mut self) -> AurisResult<()>;
}

/// Sink-side failures; an underrun is recoverable via [`AudioSink::recover`]
#[derive(Error, Debug)]
pub enum SinkError {
    /// The device consumed data faster than it was written (broken pipe)
    #[error("sink underrun")]
    Underrun,

    /// Unrecoverable device failure
    #[error("sink device error: {0}")]
    Device(String),
}

impl From<SinkError> for AurisError {
    fn from(e: SinkError) -> Self {
        AurisError::Sink(e.to_string())
    }
}

/// Abstract stereo playback sink
///
/// Owned by the worker thread once the pipeline runs; `write_interleaved`
/// is the worker's only blocking call besides the ring poll.
pub trait AudioSink: Send {
    fn open(&mut self, format: SinkFormat) -> AurisResult<()>;
    fn start(&mut self) -> AurisResult<()>;
    fn stop(&mut self) -> AurisResult<()>;

    /// Re-prepare the device after a recoverable underrun
    fn recover(&mut self) -> AurisResult<()>;

    /// Write interleaved L/R frames; returns the frames accepted.
    /// May block until the device takes the data.
    fn write_interleaved(&mut self, pcm: &[i16]) -> Result<usize, SinkError>;

    /// Post-gain applied to everything written, clamped to `[0, 1]`
    fn set_volume(&mut self, volume: f32);
}
