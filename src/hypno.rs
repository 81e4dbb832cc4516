//! Sleep stage codes and hypnogram upsampling.
//!
//! Scoring produces one stage per 30-second epoch; the detector works at the
//! sample level, so the coarse hypnogram is expanded to one stage per sample
//! of the target signal before anything else runs.

use tracing::debug;

use crate::AnalysisError;

/// Closed set of stage codes. The scorer's integer encoding (-2..4) exists
/// only at the I/O boundary, see [`Stage::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Unscored,
    Artefact,
    Wake,
    Nrem1,
    Nrem2,
    Nrem3,
    Rem,
}

impl Stage {
    /// All stages in reporting order.
    pub const ALL: [Stage; 7] = [
        Stage::Unscored,
        Stage::Artefact,
        Stage::Wake,
        Stage::Nrem1,
        Stage::Nrem2,
        Stage::Nrem3,
        Stage::Rem,
    ];

    /// Map the scorer's integer code to a stage, `None` for unknown codes.
    pub fn from_code(code: i8) -> Option<Stage> {
        match code {
            -2 => Some(Stage::Unscored),
            -1 => Some(Stage::Artefact),
            0 => Some(Stage::Wake),
            1 => Some(Stage::Nrem1),
            2 => Some(Stage::Nrem2),
            3 => Some(Stage::Nrem3),
            4 => Some(Stage::Rem),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Unscored => "Unscored",
            Stage::Artefact => "Artefact",
            Stage::Wake => "Wake",
            Stage::Nrem1 => "NREM1",
            Stage::Nrem2 => "NREM2",
            Stage::Nrem3 => "NREM3",
            Stage::Rem => "REM",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Expand an epoch-level hypnogram to one stage per sample of a signal of
/// `target_len` samples.
///
/// Each epoch is repeated `round(epoch_secs * sfreq)` times. A provisional
/// sequence longer than the signal is truncated (the recording ended
/// mid-epoch); a shorter one is padded with `Unscored` (scoring stopped
/// before the signal did). The result is always exactly `target_len` long.
pub fn upsample_hypnogram(
    epochs: &[Stage],
    epoch_secs: f64,
    sfreq: f64,
    target_len: usize,
) -> Result<Vec<Stage>, AnalysisError> {
    let epoch_samples = (epoch_secs * sfreq).round() as usize;
    if epoch_samples == 0 {
        return Err(AnalysisError::Configuration(format!(
            "epoch duration {} s at {} Hz rounds to zero samples",
            epoch_secs, sfreq
        )));
    }

    let mut upsampled: Vec<Stage> = Vec::with_capacity(target_len);
    'outer: for &stage in epochs {
        for _ in 0..epoch_samples {
            if upsampled.len() == target_len {
                break 'outer;
            }
            upsampled.push(stage);
        }
    }
    if upsampled.len() < target_len {
        debug!(
            scored = upsampled.len(),
            total = target_len,
            "hypnogram shorter than signal, padding tail as Unscored"
        );
        upsampled.resize(target_len, Stage::Unscored);
    }
    Ok(upsampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn truncates_when_scoring_outruns_signal() {
        let epochs = vec![Stage::Wake, Stage::Nrem2];
        // 2 epochs * 30 samples = 60, target 45 -> first 45 entries kept.
        let out = upsample_hypnogram(&epochs, 30.0, 1.0, 45).unwrap();
        assert_eq!(out.len(), 45);
        assert!(out[..30].iter().all(|&s| s == Stage::Wake));
        assert!(out[30..].iter().all(|&s| s == Stage::Nrem2));
    }

    #[test]
    fn pads_unscored_when_signal_outruns_scoring() {
        let epochs = vec![Stage::Rem];
        let out = upsample_hypnogram(&epochs, 30.0, 1.0, 100).unwrap();
        assert_eq!(out.len(), 100);
        assert!(out[..30].iter().all(|&s| s == Stage::Rem));
        assert!(out[30..].iter().all(|&s| s == Stage::Unscored));
    }

    #[test]
    fn empty_hypnogram_is_all_unscored() {
        let out = upsample_hypnogram(&[], 30.0, 100.0, 500).unwrap();
        assert_eq!(out.len(), 500);
        assert!(out.iter().all(|&s| s == Stage::Unscored));
    }

    #[test]
    fn zero_sample_epoch_is_a_configuration_error() {
        let err = upsample_hypnogram(&[Stage::Wake], 0.001, 10.0, 100).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn unknown_code_maps_to_none() {
        assert_eq!(Stage::from_code(7), None);
        assert_eq!(Stage::from_code(-2), Some(Stage::Unscored));
        assert_eq!(Stage::from_code(4), Some(Stage::Rem));
    }

    proptest! {
        #[test]
        fn output_length_always_matches_target(
            n_epochs in 0usize..50,
            target_len in 0usize..20_000,
        ) {
            let epochs = vec![Stage::Nrem2; n_epochs];
            let out = upsample_hypnogram(&epochs, 30.0, 10.0, target_len).unwrap();
            prop_assert_eq!(out.len(), target_len);
        }
    }
}
