//! Pipeline assembly and lifecycle
//!
//! [`Pipeline`] owns every DSP component and wires the capture callback,
//! the worker thread and the sink together:
//!
//! ```text
//! capture → demuxer → channel rings → worker → sink
//!                                       │
//!                                       └→ published SoundLocation
//! ```
//!
//! Lifecycle: `new` (Initialised) → `start` (Running) → `stop` (Stopped)
//! → `start` again, or `cleanup` (Cleaned). A double `start` is a no-op,
//! `cleanup` is idempotent and implies `stop`. All buffers, FFT plans and
//! rings are allocated in `new`; the steady-state path never allocates.
//!
//! The worker context (DSP state plus the sink) is moved into the thread
//! on `start` and handed back when the thread joins on `stop`, so a
//! restart reuses the same state. Any number of reader threads may hold a
//! [`LocationHandle`] and observe the latest published estimate.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use worker::{command_channel, lock, WorkerCommand, WorkerContext};

use crate::config::ArrayConfig;
use crate::demux::FrameDemuxer;
use crate::error::{AurisError, AurisResult};
use crate::io::{AudioCapture, AudioSink, CaptureFormat, SinkFormat};
use crate::localizer::{Localizer, LocalizerConfig};
use crate::noise::{NoiseReducer, NoiseReducerConfig};
use crate::ring::channel_ring;
use crate::types::{SoundLocation, SPEED_OF_SOUND};

/// Channel ring capacity as a multiple of the block size; headroom for
/// worker scheduling jitter
const RING_BLOCKS: usize = 4;

/// Samples the localiser needs before attempting an estimate
const CORRELATION_WINDOW: usize = 1024;

/// Lifecycle states; see the module documentation for legal transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialised,
    Running,
    Stopped,
    Cleaned,
}

/// Cloneable read handle onto the latest published location.
/// Each `get` returns a consistent snapshot.
#[derive(Clone)]
pub struct LocationHandle(Arc<Mutex<SoundLocation>>);

impl LocationHandle {
    pub fn get(&self) -> SoundLocation {
        *lock(&self.0)
    }
}

/// The assembled real-time pipeline
pub struct Pipeline {
    config: ArrayConfig,
    state: PipelineState,
    capture: Option<Box<dyn AudioCapture>>,
    /// Present while not running; moved into the worker thread on start
    worker: Option<WorkerContext>,
    handle: Option<JoinHandle<WorkerContext>>,
    commands: rtrb::Producer<WorkerCommand>,
    running: Arc<AtomicBool>,
    location: Arc<Mutex<SoundLocation>>,
}

impl Pipeline {
    /// Validate the configuration and allocate every resource: rings,
    /// FFT plans, the localiser and the device streams. Nothing is
    /// allocated after this point on the processing path.
    pub fn new(
        config: ArrayConfig,
        mut capture: Box<dyn AudioCapture>,
        mut sink: Box<dyn AudioSink>,
    ) -> AurisResult<Self> {
        config.validate()?;
        config.log_summary();

        let channels = config.num_microphones;
        let block = config.dma_buffer_size;

        let mut producers = Vec::with_capacity(channels);
        let mut consumers = Vec::with_capacity(channels);
        for _ in 0..channels {
            let (tx, rx) = channel_ring(block * RING_BLOCKS);
            producers.push(tx);
            consumers.push(rx);
        }
        let mut demuxer = FrameDemuxer::new(producers);

        capture.open(
            CaptureFormat {
                sample_rate: config.sample_rate,
                channels,
                bits_per_sample: 16,
                block_samples: block,
            },
            Box::new(move |interleaved| {
                demuxer.demux(interleaved);
            }),
        )?;

        sink.open(SinkFormat {
            sample_rate: config.sample_rate,
            channels: 2,
            bits_per_sample: 16,
            buffer_frames: block,
        })?;
        sink.set_volume(config.volume);

        let mut reducers = Vec::new();
        if config.noise_reduction_enable {
            for _ in 0..channels {
                reducers.push(NoiseReducer::new(&NoiseReducerConfig {
                    noise_threshold: config.noise_threshold,
                    algorithm: config.algorithm.clone(),
                    ..Default::default()
                })?);
            }
            if let Some(first) = reducers.first() {
                log::info!(
                    "Noise reduction active, {} sample latency per channel",
                    first.latency_samples()
                );
            }
        }

        let localizer = Localizer::new(LocalizerConfig {
            num_microphones: channels,
            mic_positions: config.mic_positions(),
            sample_rate: config.sample_rate,
            speed_of_sound: SPEED_OF_SOUND,
            correlation_window_size: CORRELATION_WINDOW,
            min_confidence_threshold: config.min_confidence_threshold,
        })?;

        let location = Arc::new(Mutex::new(SoundLocation::default()));
        let running = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = command_channel();

        let worker = WorkerContext::new(
            consumers,
            reducers,
            localizer,
            sink,
            command_rx,
            Arc::clone(&location),
            Arc::clone(&running),
            block,
        );

        log::info!("Pipeline initialised");
        Ok(Self {
            config,
            state: PipelineState::Initialised,
            capture: Some(capture),
            worker: Some(worker),
            handle: None,
            commands: command_tx,
            running,
            location,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    /// Start capture and processing. Legal from `Initialised` and
    /// `Stopped`; a second `start` while running is a no-op.
    pub fn start(&mut self) -> AurisResult<()> {
        match self.state {
            PipelineState::Running => return Ok(()),
            PipelineState::Initialised | PipelineState::Stopped => {}
            PipelineState::Cleaned => {
                return Err(AurisError::InvalidParam(
                    "cannot start a cleaned pipeline".to_string(),
                ))
            }
        }
        let mut context = self
            .worker
            .take()
            .ok_or_else(|| AurisError::Init("worker context unavailable".to_string()))?;

        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| AurisError::Init("capture unavailable".to_string()))?;
        if let Err(e) = capture.start() {
            self.worker = Some(context);
            return Err(e);
        }
        if let Err(e) = context.sink.start() {
            let _ = capture.stop();
            self.worker = Some(context);
            return Err(e);
        }

        self.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name("auris-worker".to_string())
            .spawn(move || context.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                AurisError::Init(format!("failed to spawn worker thread: {e}"))
            })?;

        self.handle = Some(handle);
        self.state = PipelineState::Running;
        log::info!("Pipeline running");
        Ok(())
    }

    /// Stop processing. The worker finishes at most one in-flight block,
    /// the thread is joined, then the devices are stopped. Stopping a
    /// pipeline that is not running is a no-op.
    pub fn stop(&mut self) -> AurisResult<()> {
        match self.state {
            PipelineState::Running => {}
            PipelineState::Initialised | PipelineState::Stopped => return Ok(()),
            PipelineState::Cleaned => {
                return Err(AurisError::InvalidParam(
                    "cannot stop a cleaned pipeline".to_string(),
                ))
            }
        }

        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(context) => self.worker = Some(context),
                Err(_) => log::error!("Worker thread panicked"),
            }
        }
        self.state = PipelineState::Stopped;

        if let Some(context) = &mut self.worker {
            context.sink.stop()?;
        }
        if let Some(capture) = &mut self.capture {
            capture.stop()?;
        }
        log::info!("Pipeline stopped");
        Ok(())
    }

    /// Release every resource. Implies `stop`; idempotent.
    pub fn cleanup(&mut self) -> AurisResult<()> {
        if self.state == PipelineState::Cleaned {
            return Ok(());
        }
        if self.state == PipelineState::Running {
            self.stop()?;
        }
        self.worker = None;
        self.capture = None;
        self.state = PipelineState::Cleaned;
        log::info!("Pipeline cleaned up");
        Ok(())
    }

    /// Latest published location; a consistent snapshot
    pub fn get_location(&self) -> SoundLocation {
        *lock(&self.location)
    }

    /// Cloneable handle for reader threads
    pub fn location_handle(&self) -> LocationHandle {
        LocationHandle(Arc::clone(&self.location))
    }

    /// Adjust the sink post-gain. Applied at the next block boundary
    /// while running, immediately otherwise.
    pub fn set_volume(&mut self, volume: f32) -> AurisResult<()> {
        self.ensure_not_cleaned()?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(AurisError::InvalidParam(format!(
                "volume = {volume} out of range 0.0-1.0"
            )));
        }
        self.config.volume = volume;
        match &mut self.worker {
            Some(context) => context.sink.set_volume(volume),
            None => self.send_command(WorkerCommand::SetVolume(volume))?,
        }
        Ok(())
    }

    /// Adjust the spectral-subtraction SNR gate
    pub fn set_noise_threshold(&mut self, threshold: f32) -> AurisResult<()> {
        self.ensure_noise_enabled()?;
        self.config.noise_threshold = threshold;
        match &mut self.worker {
            Some(context) => {
                for reducer in &mut context.reducers {
                    reducer.set_threshold(threshold);
                }
            }
            None => self.send_command(WorkerCommand::SetNoiseThreshold(threshold))?,
        }
        Ok(())
    }

    /// Learn the noise profile of every channel from a background-noise
    /// capture. While running, training happens on the worker thread at
    /// the next block boundary.
    pub fn train_noise_profile(&mut self, samples: &[i16]) -> AurisResult<()> {
        self.ensure_noise_enabled()?;
        match &mut self.worker {
            Some(context) => {
                for reducer in &mut context.reducers {
                    reducer.update_noise_profile(samples)?;
                }
                Ok(())
            }
            None => self.send_command(WorkerCommand::TrainNoiseProfile(samples.to_vec())),
        }
    }

    /// Discard the learned noise profile on every channel
    pub fn reset_noise_profile(&mut self) -> AurisResult<()> {
        self.ensure_noise_enabled()?;
        match &mut self.worker {
            Some(context) => {
                for reducer in &mut context.reducers {
                    reducer.reset_profile();
                }
                Ok(())
            }
            None => self.send_command(WorkerCommand::ResetNoiseProfile),
        }
    }

    fn ensure_noise_enabled(&self) -> AurisResult<()> {
        self.ensure_not_cleaned()?;
        if self.config.noise_reduction_enable {
            Ok(())
        } else {
            Err(AurisError::InvalidParam(
                "noise reduction is disabled".to_string(),
            ))
        }
    }

    fn ensure_not_cleaned(&self) -> AurisResult<()> {
        if self.state == PipelineState::Cleaned {
            return Err(AurisError::InvalidParam(
                "pipeline has been cleaned up".to_string(),
            ));
        }
        Ok(())
    }

    fn send_command(&mut self, command: WorkerCommand) -> AurisResult<()> {
        self.commands
            .push(command)
            .map_err(|_| AurisError::InvalidParam("command queue full".to_string()))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
