//! Loading collaborator outputs from disk.
//!
//! The recording reader and the stage classifier live outside this crate;
//! what arrives here is their exported raw material: a little-endian `f64`
//! sample file with channels interleaved sample-by-sample, and a hypnogram
//! file with one signed byte per 30-second epoch using the scorer's integer
//! encoding (-2 Unscored .. 4 REM).

use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;

use ndarray::Array2;
use tracing::info;

use crate::hypno::Stage;
use crate::{AnalysisError, EogData, RecordingInfo};

/// Read an interleaved `f64` sample file and demultiplex it into one row
/// per channel.
pub fn load_samples(
    path: &str,
    ch_names: &[String],
    sfreq: f64,
) -> Result<(RecordingInfo, EogData), AnalysisError> {
    let n_ch = ch_names.len();
    if n_ch == 0 {
        return Err(AnalysisError::Configuration(
            "channel name list is empty".into(),
        ));
    }

    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    // A truncated file is reported, never silently shortened.
    if buffer.len() % 8 != 0 {
        return Err(AnalysisError::Configuration(format!(
            "sample file is {} bytes, not a whole number of f64 samples",
            buffer.len()
        )));
    }

    let mut samples: Vec<f64> = Vec::with_capacity(buffer.len() / 8);
    for chunk in buffer.chunks_exact(8) {
        let bytes: [u8; 8] = chunk.try_into().expect("chunks_exact yields 8 bytes");
        samples.push(f64::from_le_bytes(bytes));
    }
    if samples.len() % n_ch != 0 {
        return Err(AnalysisError::Alignment(format!(
            "{} samples do not divide evenly into {} channels",
            samples.len(),
            n_ch
        )));
    }

    let n_samples = samples.len() / n_ch;
    let mut channels: Vec<Vec<f64>> = vec![Vec::with_capacity(n_samples); n_ch];
    for (i, &val) in samples.iter().enumerate() {
        channels[i % n_ch].push(val);
    }

    let mut flat = Vec::with_capacity(n_ch * n_samples);
    for ch in &channels {
        flat.extend_from_slice(ch);
    }
    let data = Array2::from_shape_vec((n_ch, n_samples), flat)
        .expect("demultiplexed rows share one length");

    info!(path, n_ch, n_samples, sfreq, "loaded recording");
    let info = RecordingInfo {
        ch_names: ch_names.to_vec(),
        sfreq,
        n_samples,
    };
    Ok((info, EogData { data }))
}

/// Read an epoch-level hypnogram, one signed byte per epoch. Unknown codes
/// are a configuration error, never silently coerced.
pub fn load_hypnogram(path: &str) -> Result<Vec<Stage>, AnalysisError> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    let mut epochs = Vec::with_capacity(buffer.len());
    for (i, &byte) in buffer.iter().enumerate() {
        let code = byte as i8;
        match Stage::from_code(code) {
            Some(stage) => epochs.push(stage),
            None => {
                return Err(AnalysisError::Configuration(format!(
                    "unknown stage code {} at epoch {}",
                    code, i
                )))
            }
        }
    }
    info!(path, n_epochs = epochs.len(), "loaded hypnogram");
    Ok(epochs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn tmp(name: &str, bytes: &[u8]) -> String {
        let path = std::env::temp_dir().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn samples_demultiplex_round_robin() {
        let values: Vec<f64> = vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = tmp("reog_samples_test.bin", &bytes);
        let names = vec!["E1".to_string(), "E2".to_string()];
        let (info, eog) = load_samples(&path, &names, 100.0).unwrap();
        assert_eq!(info.n_samples, 3);
        assert_eq!(eog.data.row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(eog.data.row(1).to_vec(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn uneven_sample_count_is_an_alignment_error() {
        let bytes: Vec<u8> = [1.0f64, 2.0, 3.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let path = tmp("reog_uneven_test.bin", &bytes);
        let names = vec!["E1".to_string(), "E2".to_string()];
        assert!(matches!(
            load_samples(&path, &names, 100.0),
            Err(AnalysisError::Alignment(_))
        ));
    }

    #[test]
    fn truncated_sample_file_is_a_configuration_error() {
        let mut bytes: Vec<u8> = 1.0f64.to_le_bytes().to_vec();
        bytes.push(0xff); // 9 bytes: one sample plus a stray byte
        let path = tmp("reog_truncated_test.bin", &bytes);
        let names = vec!["E1".to_string()];
        assert!(matches!(
            load_samples(&path, &names, 100.0),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn hypnogram_codes_map_to_stages() {
        let path = tmp("reog_hypno_test.bin", &[254, 0, 2, 4]); // -2, 0, 2, 4
        let epochs = load_hypnogram(&path).unwrap();
        assert_eq!(
            epochs,
            vec![Stage::Unscored, Stage::Wake, Stage::Nrem2, Stage::Rem]
        );
    }

    #[test]
    fn unknown_stage_code_is_a_configuration_error() {
        let path = tmp("reog_badcode_test.bin", &[0, 9]);
        assert!(matches!(
            load_hypnogram(&path),
            Err(AnalysisError::Configuration(_))
        ));
    }
}
