// src/record.rs
// Output records pairing an event with its pulse features

use crate::analysis::FeatureSet;
use crate::config::DecodeOptions;
use crate::error::{DrsError, FormatError, Result};
use crate::event::Event;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Full capture retained alongside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub times: Vec<f64>,
    pub voltages: Vec<f64>,
}

/// One row of output: a single channel of a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseRecord {
    pub event_id: u32,
    pub board: u16,
    pub channel: u16,
    pub scaler: u32,
    pub timestamp: DateTime<Utc>,
    pub area: f64,
    pub width: f64,
    pub noise: f64,
    pub offset: f64,
    pub peak_time: f64,
    pub peak_voltage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
}

impl PulseRecord {
    /// Seconds since the Unix epoch, with millisecond resolution.
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64 / 1000.0
    }
}

/// Destination for records, fed one at a time.
pub trait RecordSink {
    fn accept(&mut self, record: PulseRecord) -> Result<()>;

    /// Called once after the last record of a file.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<PulseRecord> {
    fn accept(&mut self, record: PulseRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Drops every record; for runs where only the summary matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl RecordSink for Discard {
    fn accept(&mut self, _record: PulseRecord) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: PulseRecord) -> Result<()> {
        (**self).accept(record)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Builds [`PulseRecord`]s from decoded events and their features.
#[derive(Debug, Clone)]
pub struct RecordAssembler {
    utc_offset: TimeDelta,
    include_waveforms: bool,
}

impl RecordAssembler {
    pub fn new(options: &DecodeOptions) -> Result<Self> {
        options.validate()?;
        let utc_offset = TimeDelta::try_seconds(options.utc_offset_seconds()).ok_or_else(|| {
            DrsError::InvalidOption(format!(
                "utc_offset_hours {} is out of range",
                options.utc_offset_hours
            ))
        })?;
        Ok(RecordAssembler {
            utc_offset,
            include_waveforms: options.include_waveforms,
        })
    }

    /// Fails only when the clock offset moves the timestamp outside the
    /// representable date range.
    pub fn assemble(&self, event: &Event, features: &FeatureSet) -> Result<PulseRecord> {
        let timestamp = event
            .timestamp
            .checked_sub_signed(self.utc_offset)
            .ok_or(FormatError::InvalidTimestamp {
                serial: event.serial,
            })?
            .and_utc();
        let waveform = self.include_waveforms.then(|| Waveform {
            times: event.times.to_vec(),
            voltages: event.voltages.to_vec(),
        });

        Ok(PulseRecord {
            event_id: event.serial,
            board: event.board,
            channel: event.channel,
            scaler: event.scaler,
            timestamp,
            area: features.area,
            width: features.width,
            noise: features.noise,
            offset: features.offset,
            peak_time: features.peak_time,
            peak_voltage: features.peak_voltage,
            waveform,
        })
    }
}
