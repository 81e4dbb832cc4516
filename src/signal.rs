//! Channel conditioning and spectral helpers.
//!
//! The detector's duration and timing criteria are defined against original
//! sample positions, so the band-pass must be zero-phase: a Butterworth SOS
//! cascade run forward-backward with `sosfiltfilt_dyn`.

use std::iter::Sum;

use ndarray::Array2;
use nalgebra::Complex;
use num_traits::{Float, Zero};
use rayon::prelude::*;
use rustfft::FftPlanner;
use sci_rs::na::RealField;
use sci_rs::signal::filter::{design::*, sosfiltfilt_dyn};
use tracing::debug;

use crate::{AnalysisError, RecordingInfo};

/// Check a pass-band against the sampling rate: 0 < low < high < Nyquist.
pub fn validate_band(low: f64, high: f64, sfreq: f64) -> Result<(), AnalysisError> {
    let nyquist = sfreq / 2.0;
    if low <= 0.0 || high <= 0.0 || low >= high || high >= nyquist {
        return Err(AnalysisError::InvalidBand { low, high, sfreq });
    }
    Ok(())
}

pub fn design_butter_bp<F>(order: usize, lowcut: F, highcut: F, fs: F) -> Vec<Sos<F>>
where
    F: Float + RealField + Sum,
{
    // Design Second Order Section (SOS) filter
    let filter = butter_dyn(
        order,
        [lowcut, highcut].to_vec(),
        Some(FilterBandType::Bandpass),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
        panic!("Failed to design filter");
    };
    sos
}

/// Band-pass every channel of `data` between `low` and `high` Hz, zero-phase.
/// Output has the same shape and sampling rate as the input.
pub fn bandpass_filter(
    low: f64,
    high: f64,
    info: &RecordingInfo,
    data: &Array2<f64>,
) -> Result<Array2<f64>, AnalysisError> {
    validate_band(low, high, info.sfreq)?;
    if data.is_empty() {
        return Ok(Array2::from_shape_vec((0, 0), Vec::new()).unwrap());
    }

    debug!(low, high, sfreq = info.sfreq, "band-pass filtering channels");
    let sos = design_butter_bp(4, low, high, info.sfreq);
    let n_channels = data.nrows();
    let n_samples = data.ncols();

    let filtered_rows: Vec<Vec<f64>> = (0..n_channels)
        .into_par_iter()
        .map(|ch_idx| {
            let channel = data.row(ch_idx);
            sosfiltfilt_dyn(channel.into_iter().copied(), &sos)
        })
        .collect();

    let mut flat = Vec::with_capacity(n_channels * n_samples);
    for row in &filtered_rows {
        flat.extend_from_slice(row);
    }
    Ok(Array2::from_shape_vec((n_channels, n_samples), flat)
        .expect("filtered rows keep the input shape"))
}

/// Dominant-frequency estimation over short windows.
///
/// Wraps an FFT planner so repeated candidate checks reuse plans.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        SpectrumAnalyzer {
            planner: FftPlanner::new(),
        }
    }

    /// Frequency (Hz) of the strongest non-DC spectral bin of `window`.
    /// Returns 0.0 for windows too short to resolve anything.
    pub fn dominant_frequency(&mut self, window: &[f64], sfreq: f64) -> f64 {
        let n = window.len();
        if n < 4 {
            return 0.0;
        }

        // Hann window to reduce leakage from the abrupt cut.
        let mut buf: Vec<Complex<f64>> = window
            .iter()
            .enumerate()
            .map(|(i, &sample)| {
                let w = 0.5
                    * (1.0 - ((2.0 * std::f64::consts::PI * i as f64) / (n - 1) as f64).cos());
                Complex::new(sample * w, 0.0)
            })
            .collect();

        let fft = self.planner.plan_fft_forward(n);
        let mut scratch = vec![Complex::zero(); fft.get_inplace_scratch_len()];
        fft.process_with_scratch(&mut buf, &mut scratch);

        let mut best_bin = 1;
        let mut best_mag = 0.0;
        for (bin, value) in buf.iter().enumerate().take(n / 2).skip(1) {
            let mag = value.norm_sqr();
            if mag > best_mag {
                best_mag = mag;
                best_bin = bin;
            }
        }
        best_bin as f64 * sfreq / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn info(sfreq: f64, n_samples: usize) -> RecordingInfo {
        RecordingInfo {
            ch_names: vec!["E1".into(), "E2".into()],
            sfreq,
            n_samples,
        }
    }

    fn sine_rows(freqs: &[f64], sfreq: f64, n: usize) -> Array2<f64> {
        let mut flat = Vec::with_capacity(freqs.len() * n);
        for &f in freqs {
            for i in 0..n {
                flat.push((2.0 * std::f64::consts::PI * f * i as f64 / sfreq).sin());
            }
        }
        Array2::from_shape_vec((freqs.len(), n), flat).unwrap()
    }

    #[test]
    fn inverted_band_is_rejected() {
        let err = validate_band(10.0, 5.0, 100.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidBand { .. }));
    }

    #[test]
    fn band_at_nyquist_is_rejected() {
        assert!(validate_band(0.3, 50.0, 100.0).is_err());
        assert!(validate_band(0.3, 49.0, 100.0).is_ok());
        assert!(validate_band(-1.0, 8.0, 100.0).is_err());
    }

    #[test]
    fn filter_preserves_shape() {
        let data = sine_rows(&[2.0, 5.0], 100.0, 1000);
        let out = bandpass_filter(0.5, 20.0, &info(100.0, 1000), &data).unwrap();
        assert_eq!(out.dim(), data.dim());
    }

    #[test]
    fn out_of_band_content_is_attenuated() {
        // 2 Hz passes a 1-10 Hz band, 30 Hz does not.
        let data = sine_rows(&[2.0, 30.0], 100.0, 2000);
        let out = bandpass_filter(1.0, 10.0, &info(100.0, 2000), &data).unwrap();
        let rms = |row: ndarray::ArrayView1<'_, f64>| {
            (row.iter().map(|v| v * v).sum::<f64>() / row.len() as f64).sqrt()
        };
        assert!(rms(out.row(0)) > 0.5);
        assert!(rms(out.row(1)) < 0.1);
    }

    #[test]
    fn filtering_twice_is_near_idempotent() {
        let data = sine_rows(&[3.0], 100.0, 2000);
        let inf = info(100.0, 2000);
        let once = bandpass_filter(1.0, 10.0, &inf, &data).unwrap();
        let twice = bandpass_filter(1.0, 10.0, &inf, &once).unwrap();
        // Compare away from the edges where filtfilt transients live.
        for i in 200..1800 {
            assert_abs_diff_eq!(once[[0, i]], twice[[0, i]], epsilon = 0.05);
        }
    }

    #[test]
    fn dominant_frequency_of_pure_sine() {
        let sfreq = 100.0;
        let window: Vec<f64> = (0..512)
            .map(|i| (2.0 * std::f64::consts::PI * 5.0 * i as f64 / sfreq).sin())
            .collect();
        let f = SpectrumAnalyzer::new().dominant_frequency(&window, sfreq);
        assert_abs_diff_eq!(f, 5.0, epsilon = 0.3);
    }
}
