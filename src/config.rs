// src/config.rs
// Per-file decode options

use crate::error::{DrsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default soft cap on event frames read from one file.
pub const DEFAULT_MAX_EVENTS: usize = 1_000_000;

/// Largest accepted clock offset from UTC, either direction.
pub const MAX_UTC_OFFSET_HOURS: f64 = 24.0;

/// How the per-sample time axis is built from a channel's bin widths.
///
/// Whether the axis should be rotated by the trigger cell is unresolved for
/// this digitizer: older processing rotated, newer processing does not.
/// `Cumulative` is the default. Pick `TriggerRotated` only when comparing
/// against data produced by the older tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAxis {
    /// `t[i] = w[0] + ... + w[i]`
    #[default]
    Cumulative,
    /// `t[0] = 0`, `t[i] = w[tc] + ... + w[tc + i - 1]` with indices mod 1024,
    /// where `tc` is the event's trigger cell.
    TriggerRotated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Stop after this many event frames without raising an error.
    pub max_events: usize,
    pub time_axis: TimeAxis,
    /// Offset of the digitizer's clock from UTC, in hours. Event timestamps are
    /// recorded in local time; this is only applied when a record's Unix
    /// timestamp is computed.
    pub utc_offset_hours: f64,
    /// Keep the full voltage and time arrays in each output record.
    pub include_waveforms: bool,
    /// Convert inputs even when their output file already exists.
    pub recreate: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_events: DEFAULT_MAX_EVENTS,
            time_axis: TimeAxis::Cumulative,
            utc_offset_hours: 0.0,
            include_waveforms: false,
            recreate: false,
        }
    }
}

impl DecodeOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: DecodeOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that cannot be applied to a capture.
    pub fn validate(&self) -> Result<()> {
        let hours = self.utc_offset_hours;
        if !hours.is_finite() || hours.abs() > MAX_UTC_OFFSET_HOURS {
            return Err(DrsError::InvalidOption(format!(
                "utc_offset_hours must be within +/-{} hours, got {}",
                MAX_UTC_OFFSET_HOURS, hours
            )));
        }
        Ok(())
    }

    /// The clock offset in whole seconds, for timestamp conversion.
    pub fn utc_offset_seconds(&self) -> i64 {
        (self.utc_offset_hours * 3600.0).round() as i64
    }
}
