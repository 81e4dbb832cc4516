//! Stage correlation and rate normalization.
//!
//! Every event is attributed to the stage at the sample nearest its peak
//! time; onset and offset are detection-window artifacts, the peak marks the
//! event instant. Counts are normalized by time-in-stage to events per
//! minute. A stage the recording never entered reports its rate as the
//! explicit undefined sentinel (`None`), never a division fault.

use tracing::debug;

use crate::detect::Event;
use crate::hypno::Stage;
use crate::AnalysisError;

/// One row of the per-stage rate table.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRate {
    pub stage: Stage,
    pub count: usize,
    pub occupancy_min: f64,
    /// Events per minute of time-in-stage; `None` when occupancy is zero.
    pub rate: Option<f64>,
}

/// Build the per-stage rate table for one run.
///
/// The table covers every stage that occurs in the hypnogram or the event
/// set: stages with zero events but nonzero occupancy appear with rate 0,
/// they are never omitted.
pub fn correlate_events(
    events: &[Event],
    hypno: &[Stage],
    sfreq: f64,
) -> Result<Vec<StageRate>, AnalysisError> {
    if sfreq <= 0.0 {
        return Err(AnalysisError::Configuration(format!(
            "sampling rate must be positive, got {}",
            sfreq
        )));
    }
    if hypno.is_empty() {
        return Err(AnalysisError::Alignment(
            "sample-aligned hypnogram is empty".into(),
        ));
    }

    let mut counts = [0usize; Stage::ALL.len()];
    let mut samples = [0usize; Stage::ALL.len()];
    let idx_of = |stage: Stage| Stage::ALL.iter().position(|&s| s == stage).unwrap();

    for &stage in hypno {
        samples[idx_of(stage)] += 1;
    }
    for event in events {
        let sample = (event.peak * sfreq).round() as usize;
        let sample = sample.min(hypno.len() - 1);
        counts[idx_of(hypno[sample])] += 1;
    }

    let mut table = Vec::new();
    for (i, &stage) in Stage::ALL.iter().enumerate() {
        if samples[i] == 0 && counts[i] == 0 {
            continue;
        }
        let occupancy_min = samples[i] as f64 / sfreq / 60.0;
        let rate = rate_per_minute(counts[i], occupancy_min);
        table.push(StageRate {
            stage,
            count: counts[i],
            occupancy_min,
            rate,
        });
    }
    debug!(rows = table.len(), "rate table built");
    Ok(table)
}

/// Events per minute, or the undefined sentinel when the stage never
/// occurred. Zero occupancy must not produce a NaN or a division fault.
pub fn rate_per_minute(count: usize, occupancy_min: f64) -> Option<f64> {
    if occupancy_min > 0.0 {
        Some(count as f64 / occupancy_min)
    } else {
        None
    }
}

/// Render the table the way the study scripts printed their summary block.
pub fn format_table(table: &[StageRate]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:>8} {:>12} {:>12}\n",
        "Stage", "Events", "Minutes", "Events/min"
    ));
    for row in table {
        let rate = match row.rate {
            Some(r) => format!("{:.2}", r),
            None => "n/a".to_string(),
        };
        out.push_str(&format!(
            "{:<10} {:>8} {:>12.2} {:>12}\n",
            row.stage.label(),
            row.count,
            row.occupancy_min,
            rate
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Channel;
    use approx::assert_abs_diff_eq;

    fn event_at(peak: f64) -> Event {
        Event {
            channel: Channel::A,
            onset: peak - 0.1,
            offset: peak + 0.1,
            peak,
            amplitude: 50.0,
            score: 50.0,
        }
    }

    #[test]
    fn occupancy_sums_to_recording_duration() {
        let sfreq = 100.0;
        // 2 minutes: one minute Wake, one minute REM.
        let mut hypno = vec![Stage::Wake; 6000];
        hypno.extend(vec![Stage::Rem; 6000]);
        let table = correlate_events(&[], &hypno, sfreq).unwrap();
        let total: f64 = table.iter().map(|r| r.occupancy_min).sum();
        assert_abs_diff_eq!(total, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn events_attributed_by_peak_sample() {
        let sfreq = 100.0;
        let mut hypno = vec![Stage::Nrem2; 6000];
        hypno.extend(vec![Stage::Rem; 6000]);
        // Peak at 90 s lands in REM even though the onset is earlier.
        let events = vec![event_at(90.0), event_at(30.0)];
        let table = correlate_events(&events, &hypno, sfreq).unwrap();
        let rem = table.iter().find(|r| r.stage == Stage::Rem).unwrap();
        let n2 = table.iter().find(|r| r.stage == Stage::Nrem2).unwrap();
        assert_eq!(rem.count, 1);
        assert_eq!(n2.count, 1);
    }

    #[test]
    fn zero_occupancy_yields_undefined_sentinel_not_nan() {
        assert_eq!(rate_per_minute(0, 0.0), None);
        assert_eq!(rate_per_minute(3, 0.0), None);
        assert_eq!(rate_per_minute(2, 2.0), Some(1.0));
    }

    #[test]
    fn counted_stage_gets_its_rate() {
        let sfreq = 100.0;
        let hypno = vec![Stage::Wake; 6000];
        let table = correlate_events(&[event_at(30.0)], &hypno, sfreq).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].stage, Stage::Wake);
        assert_eq!(table[0].rate, Some(1.0));
    }

    #[test]
    fn zero_event_stage_reports_rate_zero_not_omitted() {
        let sfreq = 100.0;
        let mut hypno = vec![Stage::Nrem3; 6000];
        hypno.extend(vec![Stage::Rem; 6000]);
        let table = correlate_events(&[event_at(90.0)], &hypno, sfreq).unwrap();
        let n3 = table.iter().find(|r| r.stage == Stage::Nrem3).unwrap();
        assert_eq!(n3.count, 0);
        assert_eq!(n3.rate, Some(0.0));
    }

    #[test]
    fn peak_past_end_clamps_to_last_sample() {
        let sfreq = 100.0;
        let hypno = vec![Stage::Rem; 1000];
        let table = correlate_events(&[event_at(1e6)], &hypno, sfreq).unwrap();
        assert_eq!(table[0].count, 1);
    }

    #[test]
    fn empty_hypnogram_is_an_alignment_error() {
        assert!(matches!(
            correlate_events(&[], &[], 100.0),
            Err(AnalysisError::Alignment(_))
        ));
    }

    #[test]
    fn undefined_rate_renders_as_na() {
        let row = StageRate {
            stage: Stage::Artefact,
            count: 0,
            occupancy_min: 0.0,
            rate: None,
        };
        let text = format_table(&[row]);
        assert!(text.contains("n/a"));
    }
}
