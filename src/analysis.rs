// src/analysis.rs
// Pulse characterization of a single channel capture

use crate::calibration::N_BINS;
use crate::error::{AnalysisError, AnalysisErrorKind, AnalysisStep};
use crate::event::Event;
use rayon::prelude::*;
use serde::Serialize;

/// Samples this close to either end of the capture are edge artifacts.
pub const EDGE_KEEP_OUT: usize = 10;
/// Leading samples assumed to precede any pulse.
pub const NOISE_WINDOW: usize = 100;

pub const PEAK_MIN_INDEX: usize = EDGE_KEEP_OUT;
pub const PEAK_MAX_INDEX: usize = N_BINS - EDGE_KEEP_OUT - 1;
pub const PULSE_MIN_INDEX: usize = EDGE_KEEP_OUT / 4;
pub const PULSE_MAX_INDEX: usize = N_BINS - EDGE_KEEP_OUT / 4;

/// Measurements of the dominant pulse in one capture.
///
/// Voltages are in volts after polarity normalization; times and widths are
/// in the units of the calibration bin widths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureSet {
    pub peak_index: usize,
    pub peak_voltage: f64,
    pub peak_time: f64,
    pub start_index: usize,
    pub end_index: usize,
    /// Mean of the pre-pulse baseline.
    pub offset: f64,
    /// Half the 5th-95th percentile spread of the pre-pulse baseline.
    pub noise: f64,
    pub width: f64,
    /// Baseline-subtracted integral over the pulse, never negative.
    pub area: f64,
}

/// Flip the waveform if its largest excursion is negative.
///
/// Applying this to an already normalized waveform leaves it unchanged.
pub fn normalize_polarity(voltages: &mut [f64]) {
    let (min, max) = voltages
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min.abs() > max.abs() {
        voltages.iter_mut().for_each(|v| *v = -*v);
    }
}

/// Percentile with linear interpolation between closest ranks.
///
/// Returns NaN for an empty slice.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn noise_estimate(values: &[f64]) -> f64 {
    0.5 * (percentile(values, 95.0) - percentile(values, 5.0))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Trapezoidal integral of `y` against `x`.
fn trapezoid(y: &[f64], x: &[f64]) -> f64 {
    y.windows(2)
        .zip(x.windows(2))
        .map(|(y, x)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum()
}

fn finite(step: AnalysisStep, value: f64) -> Result<f64, AnalysisError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnalysisError::new(step, AnalysisErrorKind::NonFiniteResult(value)))
    }
}

pub fn analyze_event(event: &Event) -> Result<FeatureSet, AnalysisError> {
    analyze(&event.voltages, &event.times)
}

/// Analyze already decoded events in parallel. Results keep input order.
pub fn analyze_events(events: &[Event]) -> Vec<Result<FeatureSet, AnalysisError>> {
    events.par_iter().map(analyze_event).collect()
}

/// Characterize the pulse in one capture.
///
/// Works on a private copy of `voltages`; the inputs are not modified.
pub fn analyze(
    voltages: &[f64; N_BINS],
    times: &[f64; N_BINS],
) -> Result<FeatureSet, AnalysisError> {
    if let Some((index, &value)) = voltages.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(AnalysisError::new(
            AnalysisStep::Polarity,
            AnalysisErrorKind::NonFiniteSample { index, value },
        ));
    }
    let mut v = *voltages;
    normalize_polarity(&mut v);

    // First maximum, kept clear of the edges.
    let argmax = v
        .iter()
        .enumerate()
        .fold(0, |best, (i, &x)| if x > v[best] { i } else { best });
    let peak_index = argmax.clamp(PEAK_MIN_INDEX, PEAK_MAX_INDEX);
    let peak_voltage = v[peak_index];
    let peak_time = finite(AnalysisStep::Peak, times[peak_index])?;

    let rough_noise = noise_estimate(&v[..NOISE_WINDOW]);

    // The pulse starts right after the last pre-peak sample at or below the
    // noise level, so earlier excursions above the noise do not move it.
    let start_index = v[..peak_index]
        .iter()
        .rposition(|&x| x <= rough_noise)
        .map_or(PULSE_MIN_INDEX, |i| i + 1)
        .max(PULSE_MIN_INDEX);

    let end_index = v[peak_index..]
        .iter()
        .position(|&x| x < rough_noise)
        .map_or(PULSE_MAX_INDEX, |i| i + peak_index)
        .min(PULSE_MAX_INDEX);

    let baseline = &v[..start_index * 3 / 4];
    let offset = mean(baseline);
    let noise = noise_estimate(baseline);

    let width = finite(AnalysisStep::Width, times[end_index] - times[start_index])?;

    let pulse: Vec<f64> = v[start_index..end_index].iter().map(|x| x - offset).collect();
    let area = finite(
        AnalysisStep::Area,
        trapezoid(&pulse, &times[start_index..end_index]),
    )?
    .max(0.0);

    Ok(FeatureSet {
        peak_index,
        peak_voltage,
        peak_time,
        start_index,
        end_index,
        offset,
        noise,
        width,
        area,
    })
}
