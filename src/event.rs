// src/event.rs
// Event frames: one decoded capture per board channel

use crate::calibration::{
    parse_channel_number, CalibrationTable, ChannelKey, BOARD_TAG, CHANNEL_TAG, N_BINS,
};
use crate::config::{DecodeOptions, TimeAxis};
use crate::cursor::ByteCursor;
use crate::error::{FormatError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

pub const EVENT_TAG: &str = "EHDR";
pub const TRIGGER_TAG: &str = "T#";

/// Convert one raw ADC count to volts.
///
/// The 16-bit ADC spans one volt; the range center (in millivolts) shifts that
/// window, so a range center of 0 covers -0.5 V to +0.5 V.
pub fn raw_to_voltage(raw: u16, range_center: i16) -> f64 {
    raw as f64 / 65535.0 + range_center as f64 / 1000.0 - 0.5
}

/// One channel of one event frame, as recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub serial: u32,
    pub board: u16,
    pub channel: u16,
    /// Wall-clock time of the digitizer, without any timezone correction.
    pub timestamp: NaiveDateTime,
    pub range_center: i16,
    pub trigger_cell: u16,
    pub scaler: u32,
    pub raw: Box<[u16; N_BINS]>,
    pub voltages: Box<[f64; N_BINS]>,
    pub times: Box<[f64; N_BINS]>,
}

impl Event {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.board, self.channel)
    }
}

/// Why an [`EventDecoder`] stopped producing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stream ended on a frame boundary.
    EndOfStream,
    /// The stream ended inside a frame; that frame was dropped.
    Truncated,
    /// The configured frame cap was reached.
    EventCap,
    /// A [`FormatError`] was returned and decoding was abandoned.
    FormatError,
}

/// Reads event frames from a capture, one channel [`Event`] at a time.
///
/// A frame is decoded completely before any of its channels is handed out, so
/// a frame cut short by the end of the stream yields nothing. After an error is
/// returned the iterator is exhausted.
pub struct EventDecoder<R> {
    cursor: ByteCursor<R>,
    calibration: CalibrationTable,
    time_axis: TimeAxis,
    max_frames: usize,
    frames: usize,
    pending: VecDeque<Event>,
    stop: Option<StopReason>,
}

// Unwraps a read, or abandons the current frame when the stream ran dry.
macro_rules! or_truncated {
    ($self:ident, $read:expr) => {
        match $read? {
            Some(value) => value,
            None => return Ok($self.truncated()),
        }
    };
}

impl EventDecoder<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, options: &DecodeOptions) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }
}

impl<R: Read + Seek> EventDecoder<R> {
    pub fn from_reader(reader: R, options: &DecodeOptions) -> Result<Self> {
        Self::new(ByteCursor::new(reader), options)
    }

    /// Parse the calibration header, leaving the cursor on the first frame.
    pub fn new(mut cursor: ByteCursor<R>, options: &DecodeOptions) -> Result<Self> {
        let calibration = CalibrationTable::parse(&mut cursor)?;
        Ok(EventDecoder {
            cursor,
            calibration,
            time_axis: options.time_axis,
            max_frames: options.max_events,
            frames: 0,
            pending: VecDeque::new(),
            stop: None,
        })
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Event frames decoded so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// `None` while events may still follow.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    fn truncated(&mut self) -> Option<Vec<Event>> {
        log::warn!(
            "Stream ends inside an event frame at byte {}; dropping it",
            self.cursor.position()
        );
        self.stop = Some(StopReason::Truncated);
        None
    }

    /// Decode the next complete frame. `Ok(None)` means decoding is over and
    /// `self.stop` says why.
    fn decode_frame(&mut self) -> Result<Option<Vec<Event>>> {
        if self.frames >= self.max_frames {
            if self.cursor.read_bytes(1)?.is_none() {
                self.stop = Some(StopReason::EndOfStream);
                return Ok(None);
            }
            self.cursor.unread(1)?;
            log::warn!("Hit max number of events ({}). Stopping now", self.max_frames);
            self.stop = Some(StopReason::EventCap);
            return Ok(None);
        }

        let frame_offset = self.cursor.position();
        let marker = match self.cursor.read_ascii(EVENT_TAG.len())? {
            Some(marker) => marker,
            None => {
                if self.cursor.read_bytes(1)?.is_some() {
                    return Ok(self.truncated());
                }
                self.stop = Some(StopReason::EndOfStream);
                return Ok(None);
            }
        };
        if marker != EVENT_TAG {
            return Err(FormatError::UnexpectedTag {
                offset: frame_offset,
                expected: EVENT_TAG,
                found: marker,
            }
            .into());
        }

        let serial = or_truncated!(self, self.cursor.read_u32());
        let date = or_truncated!(self, self.cursor.read_u16_array(7));
        let range_center = or_truncated!(self, self.cursor.read_i16());
        let timestamp = decode_timestamp(&date).ok_or(FormatError::InvalidTimestamp { serial })?;

        let mut events = Vec::new();
        let mut first_board = true;
        loop {
            let tag_offset = self.cursor.position();
            let tag = match self.cursor.read_ascii(BOARD_TAG.len())? {
                Some(tag) => tag,
                None if first_board => return Ok(self.truncated()),
                None => break,
            };
            if tag != BOARD_TAG {
                if first_board {
                    return Err(FormatError::UnexpectedTag {
                        offset: tag_offset,
                        expected: BOARD_TAG,
                        found: tag,
                    }
                    .into());
                }
                self.cursor.unread(BOARD_TAG.len())?;
                break;
            }
            first_board = false;

            let board = or_truncated!(self, self.cursor.read_u16());
            let channels = self
                .calibration
                .board(board)
                .ok_or(FormatError::UnknownBoard(board))?
                .channels
                .clone();

            let tag_offset = self.cursor.position();
            let tag = or_truncated!(self, self.cursor.read_ascii(TRIGGER_TAG.len()));
            if tag != TRIGGER_TAG {
                return Err(FormatError::UnexpectedTag {
                    offset: tag_offset,
                    expected: TRIGGER_TAG,
                    found: tag,
                }
                .into());
            }
            let trigger_cell = or_truncated!(self, self.cursor.read_u16());

            for expected in channels {
                let tag_offset = self.cursor.position();
                let tag = or_truncated!(self, self.cursor.read_ascii(CHANNEL_TAG.len()));
                if tag != CHANNEL_TAG {
                    return Err(FormatError::UnexpectedTag {
                        offset: tag_offset,
                        expected: CHANNEL_TAG,
                        found: tag,
                    }
                    .into());
                }
                let digits = or_truncated!(self, self.cursor.read_ascii(3));
                let channel = parse_channel_number(&digits).ok_or(FormatError::BadChannelNumber {
                    offset: tag_offset,
                    found: digits,
                })?;
                if channel != expected {
                    return Err(FormatError::ChannelMismatch {
                        serial,
                        board,
                        expected,
                        found: channel,
                    }
                    .into());
                }

                let scaler = or_truncated!(self, self.cursor.read_u32());
                let samples = or_truncated!(self, self.cursor.read_u16_array(N_BINS));

                let key = ChannelKey::new(board, channel);
                let widths = self
                    .calibration
                    .get(key)
                    .ok_or(FormatError::UnknownChannel { board, channel })?;

                let mut raw = Box::new([0u16; N_BINS]);
                raw.copy_from_slice(&samples);
                let mut voltages = Box::new([0.0f64; N_BINS]);
                for (v, &r) in voltages.iter_mut().zip(raw.iter()) {
                    *v = raw_to_voltage(r, range_center);
                }

                events.push(Event {
                    serial,
                    board,
                    channel,
                    timestamp,
                    range_center,
                    trigger_cell,
                    scaler,
                    raw,
                    voltages,
                    times: widths.time_axis(self.time_axis, trigger_cell),
                });
            }
        }

        self.frames += 1;
        if self.frames % 1000 == 0 {
            log::debug!("Found {} events", self.frames);
        }
        Ok(Some(events))
    }
}

fn decode_timestamp(fields: &[u16]) -> Option<NaiveDateTime> {
    match *fields {
        [year, month, day, hour, minute, second, millisecond] => {
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_milli_opt(
                hour as u32,
                minute as u32,
                second as u32,
                millisecond as u32,
            )
        }
        _ => None,
    }
}

impl<R: Read + Seek> Iterator for EventDecoder<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.stop.is_some() {
                return None;
            }
            match self.decode_frame() {
                Ok(Some(events)) => self.pending.extend(events),
                Ok(None) => {}
                Err(e) => {
                    self.stop = Some(StopReason::FormatError);
                    return Some(Err(e));
                }
            }
        }
    }
}
