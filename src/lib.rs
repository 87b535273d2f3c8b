// src/lib.rs
// DRS Reader Library - Public API

//! # DRS Reader
//!
//! A Rust library for decoding binary captures from a DRS4 switched-capacitor
//! waveform digitizer and characterizing the pulse in every channel.
//!
//! ## Features
//!
//! - Parse the per-channel timing calibration header (`DRS2`/`TIME`)
//! - Stream event frames for any number of boards and channels
//! - Convert raw ADC counts to volts and bin widths to a time axis
//! - Measure peak, pulse boundaries, baseline, noise, width and area
//! - Hand one record per channel per event to any [`RecordSink`], such as CSV
//! - Process many files in parallel with per-file error isolation
//! - Convert directories of captures to CSV, skipping finished outputs
//!
//! ## Example
//!
//! ```no_run
//! use drs_reader::{process_file, CsvSink, DecodeOptions};
//!
//! let options = DecodeOptions::default();
//! let mut sink = CsvSink::create("run.csv", options.include_waveforms)
//!     .expect("Failed to create CSV");
//!
//! let summary = process_file("run.dat", &options, &mut sink)
//!     .expect("Failed to decode file");
//!
//! println!("Events: {}", summary.events);
//! if let Some(rate) = summary.event_rate_hz() {
//!     println!("Event rate: {:.1} Hz", rate);
//! }
//! ```
//!
//! Lower-level access goes through [`EventDecoder`], an iterator of
//! [`Event`]s, and [`analyze_event`].

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod cursor;
mod error;
pub mod event;
pub mod export;
pub mod pipeline;
pub mod record;

#[cfg(test)]
mod testutil;

pub use analysis::{analyze, analyze_event, analyze_events, FeatureSet};
pub use calibration::{BinWidths, BoardLayout, CalibrationTable, ChannelKey, N_BINS};
pub use config::{DecodeOptions, TimeAxis};
pub use cursor::ByteCursor;
pub use error::{
    AnalysisError, AnalysisErrorKind, AnalysisStep, DrsError, FormatError, Result,
};
pub use event::{Event, EventDecoder, StopReason};
pub use export::CsvSink;
pub use pipeline::{
    convert_files, output_paths, process_file, process_files, process_reader, Conversion,
    ConvertOutcome, RunSummary,
};
pub use record::{Discard, PulseRecord, RecordAssembler, RecordSink, Waveform};
