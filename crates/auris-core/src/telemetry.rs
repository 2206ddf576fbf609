//! Structured telemetry records
//!
//! Per-block observations emitted through the logging facade under the
//! `auris::telemetry` target, one record per line: `LOCATION` with the
//! published estimate, `NOISE` with the suppression effect, and `LEVELS`
//! with per-channel RMS. Records go out at debug level so a default
//! `info` filter keeps the log readable while `RUST_LOG=auris=debug`
//! captures the full stream.

use std::fmt::Write as _;

use crate::types::SoundLocation;

const TARGET: &str = "auris::telemetry";

pub fn log_location(sequence: u64, location: &SoundLocation) {
    log::debug!(
        target: TARGET,
        "LOCATION seq={} x={:.3} y={:.3} z={:.3} confidence={:.3}",
        sequence,
        location.x,
        location.y,
        location.z,
        location.confidence
    );
}

pub fn log_noise(sequence: u64, before_rms: f32, after_rms: f32) {
    log::debug!(
        target: TARGET,
        "NOISE seq={} before={:.5} after={:.5} reduction_db={:.2}",
        sequence,
        before_rms,
        after_rms,
        reduction_db(before_rms, after_rms)
    );
}

pub fn log_levels(sequence: u64, levels: &[f32]) {
    log::debug!(target: TARGET, "LEVELS seq={} {}", sequence, format_levels(levels));
}

/// Positive dB when the output is quieter than the input
fn reduction_db(before: f32, after: f32) -> f32 {
    if before <= 0.0 || after <= 0.0 {
        return 0.0;
    }
    20.0 * (before / after).log10()
}

fn format_levels(levels: &[f32]) -> String {
    let mut out = String::with_capacity(levels.len() * 12);
    for (ch, level) in levels.iter().enumerate() {
        if ch > 0 {
            out.push(' ');
        }
        let _ = write!(out, "ch{ch}={level:.5}");
    }
    out
}
