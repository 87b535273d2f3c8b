// src/calibration.rs
// Board/channel timing calibration header

use crate::config::TimeAxis;
use crate::cursor::ByteCursor;
use crate::error::{FormatError, Result};
use std::collections::HashMap;
use std::io::{Read, Seek};

/// Number of sampling cells per channel.
pub const N_BINS: usize = 1024;

pub const FILE_MAGIC: &str = "DRS2";
pub const TIME_MAGIC: &str = "TIME";
pub const BOARD_TAG: &str = "B#";
pub const CHANNEL_TAG: &str = "C";

/// Identifies one digitizer input across the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    pub board: u16,
    pub channel: u16,
}

impl ChannelKey {
    pub fn new(board: u16, channel: u16) -> Self {
        ChannelKey { board, channel }
    }
}

/// Parse the three ASCII digits following a channel tag.
pub(crate) fn parse_channel_number(digits: &str) -> Option<u16> {
    if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// The 1024 per-cell bin widths of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BinWidths(Box<[f32; N_BINS]>);

impl BinWidths {
    pub fn from_slice(widths: &[f32]) -> Option<Self> {
        let array: [f32; N_BINS] = widths.try_into().ok()?;
        Some(BinWidths(Box::new(array)))
    }

    pub fn as_array(&self) -> &[f32; N_BINS] {
        &self.0
    }

    pub fn mean(&self) -> f64 {
        self.0.iter().map(|&w| w as f64).sum::<f64>() / N_BINS as f64
    }

    /// Build the time of every sample for an event latched at `trigger_cell`.
    pub fn time_axis(&self, axis: TimeAxis, trigger_cell: u16) -> Box<[f64; N_BINS]> {
        let mut times = Box::new([0.0f64; N_BINS]);
        let mut total = 0.0f64;
        match axis {
            TimeAxis::Cumulative => {
                for (t, &w) in times.iter_mut().zip(self.0.iter()) {
                    total += w as f64;
                    *t = total;
                }
            }
            TimeAxis::TriggerRotated => {
                let start = trigger_cell as usize % N_BINS;
                for i in 1..N_BINS {
                    total += self.0[(start + i - 1) % N_BINS] as f64;
                    times[i] = total;
                }
            }
        }
        times
    }
}

/// Channels declared for one board, in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardLayout {
    pub board: u16,
    pub channels: Vec<u16>,
}

/// All bin widths declared in a file's header, keyed by board and channel.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    boards: Vec<BoardLayout>,
    widths: HashMap<ChannelKey, BinWidths>,
}

impl CalibrationTable {
    /// Consume the preamble and every board section.
    ///
    /// Leaves the cursor on the first byte that is not part of a board
    /// section, which for a well-formed file is the first event frame.
    pub fn parse<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> Result<Self> {
        Self::expect_magic(cursor, FILE_MAGIC)?;
        Self::expect_magic(cursor, TIME_MAGIC)?;

        let mut table = CalibrationTable::default();

        loop {
            match cursor.read_ascii(2)? {
                Some(tag) if tag == BOARD_TAG => {}
                Some(_) => {
                    cursor.unread(2)?;
                    break;
                }
                None => break,
            }

            let board = cursor.read_u16()?.ok_or(FormatError::TruncatedHeader {
                offset: cursor.position(),
            })?;
            log::info!("Found board {}", board);

            let channels = table.parse_channels(cursor, board)?;
            if channels.is_empty() {
                log::warn!("Board {} doesn't have any channels", board);
            }
            table.boards.push(BoardLayout { board, channels });
        }

        if table.boards.is_empty() {
            return Err(FormatError::NoBoards.into());
        }

        Ok(table)
    }

    fn expect_magic<R: Read + Seek>(
        cursor: &mut ByteCursor<R>,
        expected: &'static str,
    ) -> Result<()> {
        let found = cursor.read_ascii(expected.len())?.unwrap_or_default();
        if found != expected {
            return Err(FormatError::BadMagic { expected, found }.into());
        }
        Ok(())
    }

    fn parse_channels<R: Read + Seek>(
        &mut self,
        cursor: &mut ByteCursor<R>,
        board: u16,
    ) -> Result<Vec<u16>> {
        let mut channels = Vec::new();

        loop {
            match cursor.read_ascii(1)? {
                Some(tag) if tag == CHANNEL_TAG => {}
                Some(_) => {
                    cursor.unread(1)?;
                    break;
                }
                None => break,
            }

            let channel = match cursor.read_ascii(3)? {
                Some(digits) => match parse_channel_number(&digits) {
                    Some(channel) => channel,
                    None => {
                        cursor.unread(4)?;
                        break;
                    }
                },
                None => {
                    cursor.unread(1)?;
                    break;
                }
            };
            log::info!("Found channel #{}", channel);

            let widths = cursor
                .read_f32_array(N_BINS)?
                .and_then(|w| BinWidths::from_slice(&w))
                .ok_or(FormatError::TruncatedHeader {
                    offset: cursor.position(),
                })?;

            let key = ChannelKey::new(board, channel);
            if self.widths.insert(key, widths).is_some() {
                log::warn!(
                    "Board {} channel {} declared twice; keeping the later widths",
                    board,
                    channel
                );
            } else {
                channels.push(channel);
            }
        }

        Ok(channels)
    }

    pub fn boards(&self) -> &[BoardLayout] {
        &self.boards
    }

    pub fn board(&self, board: u16) -> Option<&BoardLayout> {
        self.boards.iter().find(|layout| layout.board == board)
    }

    pub fn get(&self, key: ChannelKey) -> Option<&BinWidths> {
        self.widths.get(&key)
    }

    /// Every calibrated channel, in header order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelKey> + '_ {
        self.boards.iter().flat_map(|layout| {
            layout
                .channels
                .iter()
                .map(move |&channel| ChannelKey::new(layout.board, channel))
        })
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }
}
