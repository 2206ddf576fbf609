//! Pipeline worker thread
//!
//! The worker owns every DSP component and the sink. Each iteration it
//! drains pending control commands, waits until every channel ring holds
//! a full block, then runs the block through noise reduction, the
//! localiser, the mono down-mix and the panner before handing the stereo
//! result to the sink. Commands arrive over a lock-free queue and are
//! applied at block boundaries only, so no component is ever reconfigured
//! mid-frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::io::{AudioSink, SinkError};
use crate::localizer::Localizer;
use crate::noise::NoiseReducer;
use crate::panner::StereoPanner;
use crate::ring::RingConsumer;
use crate::telemetry;
use crate::types::{pcm_rms, SoundLocation};

/// Ring poll interval while waiting for a full block
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Control commands applied by the worker at block boundaries
pub(crate) enum WorkerCommand {
    SetVolume(f32),
    SetNoiseThreshold(f32),
    TrainNoiseProfile(Vec<i16>),
    ResetNoiseProfile,
}

/// Command queue depth; control traffic is sparse
const COMMAND_QUEUE_CAPACITY: usize = 64;

pub(crate) fn command_channel(
) -> (rtrb::Producer<WorkerCommand>, rtrb::Consumer<WorkerCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Everything the worker thread owns while the pipeline runs.
///
/// The context is moved into the thread on `start` and handed back on
/// `stop`, so a stopped pipeline can restart without reallocating.
pub(crate) struct WorkerContext {
    pub(crate) consumers: Vec<RingConsumer>,
    /// One reducer per channel; empty when noise reduction is disabled
    pub(crate) reducers: Vec<NoiseReducer>,
    pub(crate) localizer: Localizer,
    pub(crate) panner: StereoPanner,
    pub(crate) sink: Box<dyn AudioSink>,
    pub(crate) commands: rtrb::Consumer<WorkerCommand>,
    pub(crate) location: Arc<Mutex<SoundLocation>>,
    pub(crate) running: Arc<AtomicBool>,

    block_size: usize,
    sequence: u64,
    channels: Vec<Vec<i16>>,
    mono: Vec<i16>,
    stereo: Vec<i16>,
    levels: Vec<f32>,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        consumers: Vec<RingConsumer>,
        reducers: Vec<NoiseReducer>,
        localizer: Localizer,
        sink: Box<dyn AudioSink>,
        commands: rtrb::Consumer<WorkerCommand>,
        location: Arc<Mutex<SoundLocation>>,
        running: Arc<AtomicBool>,
        block_size: usize,
    ) -> Self {
        let num_channels = consumers.len();
        Self {
            consumers,
            reducers,
            localizer,
            panner: StereoPanner::new(),
            sink,
            commands,
            location,
            running,
            block_size,
            sequence: 0,
            channels: vec![vec![0i16; block_size]; num_channels],
            mono: vec![0i16; block_size],
            stereo: vec![0i16; block_size * 2],
            levels: vec![0.0; num_channels],
        }
    }

    /// Worker thread body; returns the context for a later restart.
    pub(crate) fn run(mut self) -> Self {
        log::info!("Processing thread started");
        while self.running.load(Ordering::Acquire) {
            self.process_commands();
            if !self.block_ready() {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            self.process_block();
        }
        log::info!("Processing thread stopped");
        self
    }

    fn block_ready(&self) -> bool {
        self.consumers.iter().all(|c| c.level() >= self.block_size)
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                WorkerCommand::SetVolume(volume) => self.sink.set_volume(volume),
                WorkerCommand::SetNoiseThreshold(threshold) => {
                    for reducer in &mut self.reducers {
                        reducer.set_threshold(threshold);
                    }
                }
                WorkerCommand::TrainNoiseProfile(samples) => {
                    for reducer in &mut self.reducers {
                        if let Err(e) = reducer.update_noise_profile(&samples) {
                            log::error!("Noise profile training failed: {e}");
                        }
                    }
                }
                WorkerCommand::ResetNoiseProfile => {
                    for reducer in &mut self.reducers {
                        reducer.reset_profile();
                    }
                }
            }
        }
    }

    fn process_block(&mut self) {
        for (consumer, channel) in self.consumers.iter_mut().zip(&mut self.channels) {
            let got = consumer.pop(channel);
            debug_assert_eq!(got, channel.len());
        }
        self.sequence += 1;

        for (level, channel) in self.levels.iter_mut().zip(&self.channels) {
            *level = pcm_rms(channel);
        }
        telemetry::log_levels(self.sequence, &self.levels);

        if !self.reducers.is_empty() {
            let before = mean(&self.levels);
            for (reducer, channel) in self.reducers.iter_mut().zip(&mut self.channels) {
                if let Err(e) = reducer.process(channel) {
                    log::error!("Noise reduction failed: {e}");
                }
            }
            for (level, channel) in self.levels.iter_mut().zip(&self.channels) {
                *level = pcm_rms(channel);
            }
            telemetry::log_noise(self.sequence, before, mean(&self.levels));
        }

        let location = match self.localizer.process(&self.channels) {
            Ok(location) => location,
            Err(e) => {
                log::error!("Localisation failed: {e}");
                return;
            }
        };
        *lock(&self.location) = location;
        telemetry::log_location(self.sequence, &location);

        self.downmix();
        self.panner.render(&self.mono, &location, &mut self.stereo);
        self.write_block();
    }

    /// Arithmetic mean across channels per sample position
    fn downmix(&mut self) {
        let n = self.channels.len() as i32;
        for (j, slot) in self.mono.iter_mut().enumerate() {
            let mut sum = 0i32;
            for channel in &self.channels {
                sum += channel[j] as i32;
            }
            *slot = (sum / n) as i16;
        }
    }

    /// Write the rendered block, absorbing one recoverable underrun.
    /// Anything worse stops the worker; the error has already been
    /// logged and the pipeline surfaces it as a dead processing thread.
    fn write_block(&mut self) {
        match self.sink.write_interleaved(&self.stereo) {
            Ok(_) => {}
            Err(SinkError::Underrun) => {
                log::warn!("Sink underrun, re-preparing device");
                if let Err(e) = self.sink.recover() {
                    log::error!("Sink recovery failed: {e}");
                    self.running.store(false, Ordering::Release);
                    return;
                }
                if let Err(e) = self.sink.write_interleaved(&self.stereo) {
                    log::error!("Sink write failed after recovery: {e}");
                    self.running.store(false, Ordering::Release);
                }
            }
            Err(e) => {
                log::error!("Sink write failed: {e}");
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
