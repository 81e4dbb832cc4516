//! One analysis run: upsample the hypnogram, condition both eye channels,
//! detect saccades, correlate with stage and normalize. All intermediates
//! are owned by the run and dropped when it returns.

use tracing::info;

use crate::detect::{detect_events, DetectionConfig, Event};
use crate::hypno::{upsample_hypnogram, Stage};
use crate::rates::{correlate_events, StageRate};
use crate::signal::bandpass_filter;
use crate::{AnalysisError, EogData, RecordingInfo};

/// Canonical scoring epoch length in seconds.
pub const EPOCH_SECS: f64 = 30.0;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Channel conditioning pass-band in Hz.
    pub filter_band: (f64, f64),
    /// Scoring epoch duration in seconds.
    pub epoch_secs: f64,
    pub detection: DetectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            filter_band: (0.3, 50.0),
            epoch_secs: EPOCH_SECS,
            detection: DetectionConfig::default(),
        }
    }
}

/// Result of one run: the ordered event set and the per-stage rate table.
#[derive(Debug)]
pub struct AnalysisRun {
    pub events: Vec<Event>,
    pub rates: Vec<StageRate>,
}

/// Run the full pipeline over one recording's two eye channels and its
/// epoch-level hypnogram.
pub fn run_analysis(
    info: &RecordingInfo,
    eog: &EogData,
    epochs: &[Stage],
    config: &PipelineConfig,
) -> Result<AnalysisRun, AnalysisError> {
    if eog.data.nrows() != 2 {
        return Err(AnalysisError::Alignment(format!(
            "expected 2 eye channels, got {}",
            eog.data.nrows()
        )));
    }
    if eog.data.ncols() != info.n_samples {
        return Err(AnalysisError::Alignment(format!(
            "recording info claims {} samples but data has {}",
            info.n_samples,
            eog.data.ncols()
        )));
    }

    let hypno = upsample_hypnogram(epochs, config.epoch_secs, info.sfreq, info.n_samples)?;

    let (low, high) = config.filter_band;
    let conditioned = EogData {
        data: bandpass_filter(low, high, info, &eog.data)?,
    };
    let ch_a = conditioned.channel(0)?;
    let ch_b = conditioned.channel(1)?;

    let events = detect_events(&ch_a, &ch_b, info.sfreq, Some(&hypno), &config.detection)?;
    let rates = correlate_events(&events, &hypno, info.sfreq)?;

    info!(
        n_events = events.len(),
        n_stages = rates.len(),
        "analysis run complete"
    );
    Ok(AnalysisRun { events, rates })
}
