// src/pipeline.rs
// Decode -> analyze -> record, one file at a time

use crate::analysis::analyze_event;
use crate::calibration::ChannelKey;
use crate::config::DecodeOptions;
use crate::error::{DrsError, Result};
use crate::event::{EventDecoder, StopReason};
use crate::export::CsvSink;
use crate::record::{RecordAssembler, RecordSink};
use chrono::NaiveDateTime;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

/// What happened while processing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Event frames decoded.
    pub frames: usize,
    /// Channel events decoded (frames times channels).
    pub events: usize,
    /// Records handed to the sink.
    pub records: usize,
    /// Events whose analysis failed; these produced no record.
    pub failed_analyses: usize,
    pub stop_reason: StopReason,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    /// Nominal sampling rate of each channel, from its mean bin width.
    /// GHz when the widths are in nanoseconds.
    pub sampling_rates: Vec<(ChannelKey, f64)>,
}

impl RunSummary {
    pub fn duration_seconds(&self) -> Option<f64> {
        let (first, last) = (self.first_timestamp?, self.last_timestamp?);
        Some((last - first).num_milliseconds() as f64 / 1000.0)
    }

    /// Frames per second over the run, if it spans any time at all.
    pub fn event_rate_hz(&self) -> Option<f64> {
        let duration = self.duration_seconds()?;
        if duration > 0.0 {
            Some(self.frames as f64 / duration)
        } else {
            None
        }
    }
}

/// Run every event of an open decoder through analysis into `sink`.
///
/// A format error stops the run; records already accepted stay with the sink.
pub fn process_events<R, S>(
    mut decoder: EventDecoder<R>,
    options: &DecodeOptions,
    sink: &mut S,
) -> Result<RunSummary>
where
    R: Read + Seek,
    S: RecordSink + ?Sized,
{
    let assembler = RecordAssembler::new(options)?;
    let calibration = decoder.calibration();
    let sampling_rates: Vec<(ChannelKey, f64)> = calibration
        .channels()
        .filter_map(|key| calibration.get(key).map(|widths| (key, 1.0 / widths.mean())))
        .collect();

    let mut events = 0;
    let mut records = 0;
    let mut failed_analyses = 0;
    let mut first_timestamp = None;
    let mut last_timestamp = None;

    for event in decoder.by_ref() {
        let event = event?;
        events += 1;
        first_timestamp.get_or_insert(event.timestamp);
        last_timestamp = Some(event.timestamp);

        match analyze_event(&event) {
            Ok(features) => {
                sink.accept(assembler.assemble(&event, &features)?)?;
                records += 1;
            }
            Err(e) => {
                failed_analyses += 1;
                log::warn!(
                    "Event {} board {} channel {}: {}",
                    event.serial,
                    event.board,
                    event.channel,
                    e
                );
            }
        }
    }
    sink.finish()?;

    let summary = RunSummary {
        frames: decoder.frames(),
        events,
        records,
        failed_analyses,
        stop_reason: decoder.stop_reason().unwrap_or(StopReason::EndOfStream),
        first_timestamp,
        last_timestamp,
        sampling_rates,
    };
    log::info!(
        "Decoded {} events in {} frames ({:?})",
        summary.events,
        summary.frames,
        summary.stop_reason
    );
    Ok(summary)
}

pub fn process_reader<R, S>(reader: R, options: &DecodeOptions, sink: &mut S) -> Result<RunSummary>
where
    R: Read + Seek,
    S: RecordSink + ?Sized,
{
    let decoder = EventDecoder::from_reader(reader, options)?;
    process_events(decoder, options, sink)
}

pub fn process_file<P, S>(path: P, options: &DecodeOptions, sink: &mut S) -> Result<RunSummary>
where
    P: AsRef<Path>,
    S: RecordSink + ?Sized,
{
    log::info!("Processing {}", path.as_ref().display());
    let decoder = EventDecoder::open(path, options)?;
    process_events(decoder, options, sink)
}

/// Process independent files in parallel, one sink per file.
///
/// Results come back in input order. A failure in one file, including a
/// failure to create its sink, is reported for that file only.
pub fn process_files<F, S>(
    paths: &[PathBuf],
    options: &DecodeOptions,
    make_sink: F,
) -> Vec<(PathBuf, Result<RunSummary>)>
where
    F: Fn(&Path) -> Result<S> + Sync,
    S: RecordSink,
{
    paths
        .par_iter()
        .map(|path| (path.clone(), process_with_sink(path, options, &make_sink)))
        .collect()
}

fn process_with_sink<F, S>(
    path: &Path,
    options: &DecodeOptions,
    make_sink: F,
) -> Result<RunSummary>
where
    F: FnOnce(&Path) -> Result<S>,
    S: RecordSink,
{
    let result = make_sink(path).and_then(|mut sink| process_file(path, options, &mut sink));
    if let Err(e) = &result {
        log::warn!("{}: {}", path.display(), e);
    }
    result
}

/// CSV destination for each input under `output_dir`.
///
/// Inputs keep their layout below the deepest directory they all share, so
/// `a/run.dat` and `b/run.dat` become `a/run.csv` and `b/run.csv`.
pub fn output_paths(inputs: &[PathBuf], output_dir: &Path) -> Vec<PathBuf> {
    let resolved: Vec<PathBuf> = inputs
        .iter()
        .map(|p| {
            fs::canonicalize(p)
                .or_else(|_| std::path::absolute(p))
                .unwrap_or_else(|_| p.clone())
        })
        .collect();
    let root = common_root(&resolved);

    resolved
        .iter()
        .map(|path| {
            let relative: PathBuf = path
                .strip_prefix(&root)
                .unwrap_or(path)
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect();
            output_dir.join(relative).with_extension("csv")
        })
        .collect()
}

fn discard_output(output: &Path) {
    if let Err(e) = fs::remove_file(output) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", output.display(), e);
        }
    }
}

fn common_root(paths: &[PathBuf]) -> PathBuf {
    let mut parents = paths.iter().filter_map(|p| p.parent());
    let first = match parents.next() {
        Some(parent) => parent.to_path_buf(),
        None => return PathBuf::new(),
    };
    parents.fold(first, |root, parent| {
        root.components()
            .zip(parent.components())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a)
            .collect()
    })
}

/// What `convert_files` did with one input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvertOutcome {
    Converted(RunSummary),
    /// The output already existed and `recreate` was off.
    Skipped,
}

#[derive(Debug)]
pub struct Conversion {
    pub input: PathBuf,
    pub output: PathBuf,
    pub outcome: Result<ConvertOutcome>,
}

/// Convert captures to one CSV each under `output_dir`, in parallel.
///
/// Existing outputs are left alone unless `options.recreate` is set. An input
/// whose output collides with an earlier input's fails without writing.
pub fn convert_files(
    inputs: &[PathBuf],
    output_dir: &Path,
    options: &DecodeOptions,
) -> Vec<Conversion> {
    let outputs = output_paths(inputs, output_dir);
    let mut claimed = HashSet::new();
    let duplicate: Vec<bool> = outputs.iter().map(|o| !claimed.insert(o.clone())).collect();

    inputs
        .par_iter()
        .zip(outputs.par_iter())
        .zip(duplicate.par_iter())
        .map(|((input, output), &duplicate)| {
            let outcome = if duplicate {
                log::warn!(
                    "{}: output {} already claimed",
                    input.display(),
                    output.display()
                );
                Err(DrsError::DuplicateOutput(output.clone()))
            } else if output.is_file() && !options.recreate {
                log::info!("File exists, skipping {}", input.display());
                Ok(ConvertOutcome::Skipped)
            } else {
                let result = process_with_sink(input, options, |_| {
                    if let Some(parent) = output.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    CsvSink::create(output, options.include_waveforms)
                });
                if result.is_err() {
                    // a partial output would be skipped on the next run
                    discard_output(output);
                }
                result.map(ConvertOutcome::Converted)
            };
            Conversion {
                input: input.clone(),
                output: output.clone(),
                outcome,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::record::{Discard, PulseRecord};
    use crate::testutil::{flat_samples, uniform_widths, DatBuilder, DATE};
    use std::io::Cursor;

    fn pulse_samples() -> Vec<u16> {
        let mut samples = flat_samples(0.0);
        for (i, s) in samples.iter_mut().enumerate().skip(300).take(100) {
            *s += (100 * (50 - (i as i64 - 350).abs())) as u16;
        }
        samples
    }

    fn two_channel_file(frames: u32) -> DatBuilder {
        let mut builder = DatBuilder::new()
            .board(1)
            .channel(1, &uniform_widths(0.2))
            .channel(2, &uniform_widths(0.25));
        for serial in 0..frames {
            let mut date = DATE;
            date[5] += serial as u16;
            builder = builder
                .event(serial, date, 0)
                .event_board(1, 0)
                .event_channel(1, serial, &pulse_samples())
                .event_channel(2, serial, &flat_samples(0.0));
        }
        builder
    }

    #[test]
    fn test_records_follow_decode_order() {
        let bytes = two_channel_file(3).build();
        let mut sink: Vec<PulseRecord> = Vec::new();
        let summary =
            process_reader(Cursor::new(bytes), &DecodeOptions::default(), &mut sink).unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.events, 6);
        assert_eq!(summary.records, 6);
        assert_eq!(summary.failed_analyses, 0);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);

        let order: Vec<(u32, u16)> = sink.iter().map(|r| (r.event_id, r.channel)).collect();
        assert_eq!(order, vec![(0, 1), (0, 2), (1, 1), (1, 2), (2, 1), (2, 2)]);
        assert!(sink[0].area > 0.0);
        assert_eq!(sink[1].area, 0.0);
        assert!((sink[0].peak_voltage - 0.0763).abs() < 1e-3);
    }

    #[test]
    fn test_summary_rates() {
        let bytes = two_channel_file(3).build();
        let summary =
            process_reader(Cursor::new(bytes), &DecodeOptions::default(), &mut Discard).unwrap();

        assert_eq!(summary.duration_seconds(), Some(2.0));
        assert_eq!(summary.event_rate_hz(), Some(1.5));
        assert_eq!(summary.sampling_rates.len(), 2);
        assert_eq!(summary.sampling_rates[0].0, ChannelKey::new(1, 1));
        assert!((summary.sampling_rates[0].1 - 5.0).abs() < 1e-4);
        assert!((summary.sampling_rates[1].1 - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_single_frame_has_no_rate() {
        let bytes = two_channel_file(1).build();
        let summary =
            process_reader(Cursor::new(bytes), &DecodeOptions::default(), &mut Discard).unwrap();
        assert_eq!(summary.duration_seconds(), Some(0.0));
        assert_eq!(summary.event_rate_hz(), None);
    }

    #[test]
    fn test_format_error_stops_run() {
        let bytes = two_channel_file(2).raw(b"EHDRxx").build();
        let mut sink: Vec<PulseRecord> = Vec::new();
        let summary =
            process_reader(Cursor::new(bytes), &DecodeOptions::default(), &mut sink).unwrap();
        // six trailing bytes are a truncated frame, not an error
        assert_eq!(summary.stop_reason, StopReason::Truncated);
        assert_eq!(sink.len(), 4);

        let bytes = two_channel_file(2).raw(b"XXXXXXXXXXXX").build();
        let mut sink: Vec<PulseRecord> = Vec::new();
        let result = process_reader(Cursor::new(bytes), &DecodeOptions::default(), &mut sink);
        assert!(matches!(
            result,
            Err(DrsError::Format(FormatError::UnexpectedTag { .. }))
        ));
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn test_process_files_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.dat");
        let bad = dir.path().join("bad.dat");
        let missing = dir.path().join("missing.dat");
        std::fs::write(&good, two_channel_file(2).build()).unwrap();
        let mut corrupt = two_channel_file(2).build();
        corrupt[..4].copy_from_slice(b"XXXX");
        std::fs::write(&bad, corrupt).unwrap();

        let paths = vec![good.clone(), bad.clone(), missing.clone()];
        let results = process_files(&paths, &DecodeOptions::default(), |_| {
            Ok(Vec::<PulseRecord>::new())
        });

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, good);
        assert_eq!(results[0].1.as_ref().unwrap().records, 4);
        assert!(matches!(
            results[1].1,
            Err(DrsError::Format(FormatError::BadMagic { .. }))
        ));
        assert!(matches!(results[2].1, Err(DrsError::Io(_))));
    }

    fn write_capture(path: &Path, frames: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, two_channel_file(frames).build()).unwrap();
    }

    fn row_count(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count() - 1
    }

    #[test]
    fn test_same_file_names_in_different_directories() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("raw/a/run.dat");
        let b = dir.path().join("raw/b/run.dat");
        write_capture(&a, 2);
        write_capture(&b, 3);
        let out = dir.path().join("processed");

        let results = convert_files(&[a.clone(), b.clone()], &out, &DecodeOptions::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].input, a);
        assert_eq!(results[0].output, out.join("a/run.csv"));
        assert_eq!(results[1].output, out.join("b/run.csv"));
        for result in &results {
            assert!(matches!(result.outcome, Ok(ConvertOutcome::Converted(_))));
        }
        assert_eq!(row_count(&out.join("a/run.csv")), 4);
        assert_eq!(row_count(&out.join("b/run.csv")), 6);
    }

    #[test]
    fn test_single_input_lands_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw/run.dat");
        write_capture(&input, 1);
        let out = dir.path().join("processed");
        assert_eq!(output_paths(&[input], &out), vec![out.join("run.csv")]);
    }

    #[test]
    fn test_repeated_input_is_not_converted_twice() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("run.dat");
        write_capture(&input, 2);
        let out = dir.path().join("processed");

        let results = convert_files(&[input.clone(), input], &out, &DecodeOptions::default());
        assert!(matches!(results[0].outcome, Ok(ConvertOutcome::Converted(_))));
        assert!(matches!(
            results[1].outcome,
            Err(DrsError::DuplicateOutput(ref path)) if *path == out.join("run.csv")
        ));
        assert_eq!(row_count(&out.join("run.csv")), 4);
    }

    #[test]
    fn test_existing_output_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("run.dat");
        write_capture(&input, 2);
        let out = dir.path().join("processed");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("run.csv"), "keep me\n").unwrap();

        let results = convert_files(&[input.clone()], &out, &DecodeOptions::default());
        assert!(matches!(results[0].outcome, Ok(ConvertOutcome::Skipped)));
        assert_eq!(fs::read_to_string(out.join("run.csv")).unwrap(), "keep me\n");

        let options = DecodeOptions {
            recreate: true,
            ..DecodeOptions::default()
        };
        let results = convert_files(&[input], &out, &options);
        assert!(matches!(results[0].outcome, Ok(ConvertOutcome::Converted(_))));
        assert_eq!(row_count(&out.join("run.csv")), 4);
    }

    #[test]
    fn test_failed_conversion_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("run.dat");
        fs::write(&input, two_channel_file(2).raw(b"XXXXXXXXXXXX").build()).unwrap();
        let out = dir.path().join("processed");

        let results = convert_files(&[input], &out, &DecodeOptions::default());
        assert!(matches!(
            results[0].outcome,
            Err(DrsError::Format(FormatError::UnexpectedTag { .. }))
        ));
        assert!(!out.join("run.csv").exists());
    }
}
