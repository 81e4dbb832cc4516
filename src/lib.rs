#![warn(clippy::all, rust_2018_idioms)]
use ndarray::Array2;

pub mod detect;
pub mod error;
pub mod hypno;
pub mod io;
pub mod pipeline;
pub mod rates;
pub mod signal;

pub use error::AnalysisError;

/// Recording-wide metadata shared by every stage of an analysis run.
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub ch_names: Vec<String>,
    pub sfreq: f64,
    pub n_samples: usize,
}

/// The two time-synchronized eye channels, rows = channels, columns = samples.
#[derive(Debug)]
pub struct EogData {
    pub data: Array2<f64>,
}

impl EogData {
    pub fn channel(&self, ch_idx: usize) -> Result<Vec<f64>, AnalysisError> {
        if ch_idx >= self.data.nrows() {
            return Err(AnalysisError::Alignment(format!(
                "channel index {} out of range for {} channels",
                ch_idx,
                self.data.nrows()
            )));
        }
        Ok(self.data.row(ch_idx).to_vec())
    }
}
