// src/error.rs
// Error types for the DRS reader

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Output {} is also the output of an earlier input", .0.display())]
    DuplicateOutput(PathBuf),
}

pub type Result<T> = std::result::Result<T, DrsError>;

/// Fatal problems with the layout of a capture file.
///
/// Any of these aborts the decode of the current file: after one is returned
/// the cursor position no longer lines up with a frame boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unrecognized magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: &'static str, found: String },

    #[error("unexpected tag at byte {offset}: expected {expected:?}, found {found:?}")]
    UnexpectedTag {
        offset: u64,
        expected: &'static str,
        found: String,
    },

    #[error("channel tag at byte {offset} has a non-numeric channel number {found:?}")]
    BadChannelNumber { offset: u64, found: String },

    #[error("no calibration for board {board} channel {channel}")]
    UnknownChannel { board: u16, channel: u16 },

    #[error("event frame references board {0} which has no calibration")]
    UnknownBoard(u16),

    #[error("event {serial}: board {board} expected channel {expected}, found {found}")]
    ChannelMismatch {
        serial: u32,
        board: u16,
        expected: u16,
        found: u16,
    },

    #[error("event {serial}: invalid timestamp")]
    InvalidTimestamp { serial: u32 },

    #[error("calibration header ends unexpectedly at byte {offset}")]
    TruncatedHeader { offset: u64 },

    #[error("file contains no boards")]
    NoBoards,
}

/// The step of the waveform analysis that was running when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStep {
    Polarity,
    Peak,
    NoiseEstimate,
    PulseStart,
    PulseEnd,
    Baseline,
    Width,
    Area,
}

impl fmt::Display for AnalysisStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisStep::Polarity => "polarity",
            AnalysisStep::Peak => "peak",
            AnalysisStep::NoiseEstimate => "noise estimate",
            AnalysisStep::PulseStart => "pulse start",
            AnalysisStep::PulseEnd => "pulse end",
            AnalysisStep::Baseline => "baseline",
            AnalysisStep::Width => "width",
            AnalysisStep::Area => "area",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisErrorKind {
    #[error("non-finite sample {value} at index {index}")]
    NonFiniteSample { index: usize, value: f64 },

    #[error("non-finite result {0}")]
    NonFiniteResult(f64),
}

/// A waveform analysis that did not produce a feature set.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("analysis failed at {step} step: {kind}")]
pub struct AnalysisError {
    pub step: AnalysisStep,
    pub kind: AnalysisErrorKind,
}

impl AnalysisError {
    pub(crate) fn new(step: AnalysisStep, kind: AnalysisErrorKind) -> Self {
        AnalysisError { step, kind }
    }
}
