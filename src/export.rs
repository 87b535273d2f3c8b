// src/export.rs
// CSV output of pulse records

use crate::calibration::N_BINS;
use crate::error::{DrsError, Result};
use crate::record::{PulseRecord, RecordSink};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const CSV_COLUMNS: [&str; 11] = [
    "event_id",
    "board",
    "channel",
    "scaler",
    "timestamp",
    "area",
    "width",
    "noise",
    "offset",
    "peak_time",
    "peak_voltage",
];

/// Writes one CSV row per record. With waveforms enabled every row also
/// carries `time_0..time_1023` and `voltage_0..voltage_1023`.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    include_waveforms: bool,
    header_written: bool,
}

impl CsvSink<File> {
    pub fn create<P: AsRef<Path>>(path: P, include_waveforms: bool) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        Ok(CsvSink {
            writer,
            include_waveforms,
            header_written: false,
        })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(wtr: W, include_waveforms: bool) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(wtr);
        CsvSink {
            writer,
            include_waveforms,
            header_written: false,
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let mut header: Vec<String> = CSV_COLUMNS.iter().map(|c| c.to_string()).collect();
        if self.include_waveforms {
            header.extend((0..N_BINS).map(|i| format!("time_{}", i)));
            header.extend((0..N_BINS).map(|i| format!("voltage_{}", i)));
        }
        self.writer.write_record(&header)?;
        self.header_written = true;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.write_header()?;
        self.writer
            .into_inner()
            .map_err(|e| DrsError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn accept(&mut self, record: PulseRecord) -> Result<()> {
        self.write_header()?;

        let mut row = vec![
            record.event_id.to_string(),
            record.board.to_string(),
            record.channel.to_string(),
            record.scaler.to_string(),
            format!("{:.3}", record.unix_timestamp()),
            record.area.to_string(),
            record.width.to_string(),
            record.noise.to_string(),
            record.offset.to_string(),
            record.peak_time.to_string(),
            record.peak_voltage.to_string(),
        ];
        if self.include_waveforms {
            match &record.waveform {
                Some(waveform) => {
                    row.extend(waveform.times.iter().map(|t| t.to_string()));
                    row.extend(waveform.voltages.iter().map(|v| v.to_string()));
                }
                None => row.extend(std::iter::repeat(String::new()).take(2 * N_BINS)),
            }
        }
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.write_header()?;
        self.writer.flush()?;
        Ok(())
    }
}
