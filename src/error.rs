use thiserror::Error;

/// Errors raised at the component boundary where an invariant is first
/// violated. Empty results (no events, zero occupancy) are not errors and
/// never surface here.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Epoch duration times sampling rate rounds to zero, a stage code is
    /// unknown, or some other precondition of the run is unmet.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Band-pass edges are inverted, non-positive, or at/above Nyquist.
    #[error("invalid band [{low}, {high}] Hz at sampling rate {sfreq} Hz")]
    InvalidBand { low: f64, high: f64, sfreq: f64 },

    /// Detector criterion ranges are inverted or non-positive.
    #[error("invalid detector configuration: {0}")]
    InvalidConfiguration(String),

    /// Channel lengths or sampling rates disagree where they must match.
    #[error("alignment error: {0}")]
    Alignment(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
