//! Real audio device backends
//!
//! Implementations of the [`crate::io`] contracts against actual
//! hardware. Only the cpal backend exists today; an I2S/DMA capture
//! source for embedded targets plugs in through the same traits.

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{CpalCapture, CpalSink};
