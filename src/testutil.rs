// src/testutil.rs
// Synthetic capture files for unit tests

use crate::calibration::N_BINS;

pub(crate) fn uniform_widths(width: f32) -> Vec<f32> {
    vec![width; N_BINS]
}

/// Raw samples whose decoded voltage is `level` volts at range center 0.
pub(crate) fn flat_samples(level: f64) -> Vec<u16> {
    vec![((level + 0.5) * 65535.0).round() as u16; N_BINS]
}

pub(crate) const DATE: [u16; 7] = [2021, 10, 6, 14, 30, 15, 250];

/// Builds a capture byte-for-byte, starting after the `DRS2`/`TIME` preamble.
pub(crate) struct DatBuilder {
    bytes: Vec<u8>,
}

impl DatBuilder {
    pub(crate) fn new() -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DRS2");
        bytes.extend_from_slice(b"TIME");
        DatBuilder { bytes }
    }

    pub(crate) fn raw(mut self, data: &[u8]) -> Self {
        self.bytes.extend_from_slice(data);
        self
    }

    pub(crate) fn board(mut self, board: u16) -> Self {
        self.bytes.extend_from_slice(b"B#");
        self.bytes.extend_from_slice(&board.to_le_bytes());
        self
    }

    pub(crate) fn channel(mut self, channel: u16, widths: &[f32]) -> Self {
        self.bytes.extend_from_slice(format!("C{:03}", channel).as_bytes());
        for w in widths {
            self.bytes.extend_from_slice(&w.to_le_bytes());
        }
        self
    }

    pub(crate) fn event(mut self, serial: u32, date: [u16; 7], range_center: i16) -> Self {
        self.bytes.extend_from_slice(b"EHDR");
        self.bytes.extend_from_slice(&serial.to_le_bytes());
        for field in date {
            self.bytes.extend_from_slice(&field.to_le_bytes());
        }
        self.bytes.extend_from_slice(&range_center.to_le_bytes());
        self
    }

    pub(crate) fn event_board(mut self, board: u16, trigger_cell: u16) -> Self {
        self.bytes.extend_from_slice(b"B#");
        self.bytes.extend_from_slice(&board.to_le_bytes());
        self.bytes.extend_from_slice(b"T#");
        self.bytes.extend_from_slice(&trigger_cell.to_le_bytes());
        self
    }

    pub(crate) fn event_channel(mut self, channel: u16, scaler: u32, samples: &[u16]) -> Self {
        self.bytes.extend_from_slice(format!("C{:03}", channel).as_bytes());
        self.bytes.extend_from_slice(&scaler.to_le_bytes());
        for s in samples {
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn build(self) -> Vec<u8> {
        self.bytes
    }
}
