// src/main.rs
// Command-line application for DRS Reader

use clap::{Parser, Subcommand};
use drs_reader::{
    convert_files, process_file, ConvertOutcome, DecodeOptions, Discard, RunSummary, TimeAxis,
};
use std::path::{Path, PathBuf};
use std::process;

/// Decode DRS4 digitizer captures into per-pulse measurements.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with decode options.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Rotate each event's time axis by its trigger cell.
    #[arg(long, global = true, default_value_t = false)]
    rotate_time_axis: bool,

    /// Offset of the digitizer clock from UTC, in hours (e.g. -7 for PDT).
    #[arg(long, global = true, allow_negative_numbers = true)]
    utc_offset_hours: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display capture file information
    Info { file: PathBuf },

    /// Convert captures to one CSV file each
    Convert {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory.
        #[arg(short, long, default_value = "processed")]
        output: PathBuf,

        /// Include the full voltage and time arrays in every row.
        #[arg(long, default_value_t = false)]
        waveforms: bool,

        /// Overwrite outputs that already exist instead of skipping them.
        #[arg(long, default_value_t = false)]
        recreate: bool,
    },
}

fn load_options(cli: &Cli) -> drs_reader::Result<DecodeOptions> {
    let mut options = match &cli.config {
        Some(path) => DecodeOptions::load(path)?,
        None => DecodeOptions::default(),
    };
    if cli.rotate_time_axis {
        options.time_axis = TimeAxis::TriggerRotated;
    }
    if let Some(hours) = cli.utc_offset_hours {
        options.utc_offset_hours = hours;
    }
    options.validate()?;
    Ok(options)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut options = match load_options(&cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error loading options: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Command::Info { file } => {
            match process_file(&file, &options, &mut Discard) {
                Ok(summary) => print_file_info(&file, &summary),
                Err(e) => {
                    eprintln!("Error reading '{}': {}", file.display(), e);
                    process::exit(1);
                }
            }
        }

        Command::Convert {
            inputs,
            output,
            waveforms,
            recreate,
        } => {
            options.include_waveforms |= waveforms;
            options.recreate |= recreate;

            let results = convert_files(&inputs, &output, &options);
            let mut failures = 0;
            for conversion in &results {
                match &conversion.outcome {
                    Ok(ConvertOutcome::Converted(summary)) => println!(
                        "Converted {} -> {} ({} records, {} failed analyses)",
                        conversion.input.display(),
                        conversion.output.display(),
                        summary.records,
                        summary.failed_analyses
                    ),
                    Ok(ConvertOutcome::Skipped) => println!(
                        "Skipped {} ({} exists)",
                        conversion.input.display(),
                        conversion.output.display()
                    ),
                    Err(e) => {
                        failures += 1;
                        eprintln!("Error converting '{}': {}", conversion.input.display(), e);
                    }
                }
            }

            if failures > 0 {
                eprintln!("{} of {} files failed", failures, results.len());
                process::exit(1);
            }
        }
    }
}

fn print_file_info(file: &Path, summary: &RunSummary) {
    println!("DRS File Information");
    println!("====================");
    println!();
    println!("File: {}", file.display());
    println!();

    println!("Channels:");
    for (key, rate) in &summary.sampling_rates {
        println!(
            "  Board {} channel {}: {:.3} GHz nominal sampling rate",
            key.board, key.channel, rate
        );
    }
    println!();

    println!("Events:");
    println!("  Event frames: {}", summary.frames);
    println!("  Channel events: {}", summary.events);
    println!("  Failed analyses: {}", summary.failed_analyses);
    println!("  Stopped by: {:?}", summary.stop_reason);
    println!();

    println!("Run Timing:");
    if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
        println!("  First event: {}", first);
        println!("  Last event: {}", last);
    }
    if let Some(duration) = summary.duration_seconds() {
        println!("  Duration: {:.3} s", duration);
    }
    match summary.event_rate_hz() {
        Some(rate) => println!("  Event rate: {:.3} Hz", rate),
        None => println!("  Event rate: n/a"),
    }
}
