//! Dual-channel saccade detection.
//!
//! Both conditioned eye channels are scanned for oscillatory deflections: a
//! run of three alternating local extrema (rise-then-fall or fall-then-rise)
//! whose span fits the duration window. Each candidate must then pass the
//! amplitude range, the dominant-frequency band check on a short window
//! around its peak, and (optionally) a robust outlier screen. Surviving
//! candidates on the same channel never overlap; candidates that overlap
//! across channels are merged into a single higher-confidence event.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::hypno::Stage;
use crate::signal::SpectrumAnalyzer;
use crate::AnalysisError;

/// Channel attribution of a detected event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
    Both,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::A => f.write_str("E1"),
            Channel::B => f.write_str("E2"),
            Channel::Both => f.write_str("E1+E2"),
        }
    }
}

/// One detected saccade. Times are seconds from recording start; immutable
/// once emitted.
#[derive(Debug, Clone)]
pub struct Event {
    pub channel: Channel,
    pub onset: f64,
    pub offset: f64,
    pub peak: f64,
    pub amplitude: f64,
    pub score: f64,
}

impl Event {
    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }
}

/// Detector criteria. Defaults follow the study parameters: relaxed
/// amplitude and duration windows, a wide saccade band, outlier screening
/// off, no stage restriction.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Stages during which detection is attempted; empty = no restriction.
    pub active_stages: HashSet<Stage>,
    /// (min, max) peak deflection amplitude, signal units.
    pub amplitude_range: (f64, f64),
    /// (min, max) event duration in seconds.
    pub duration_range: (f64, f64),
    /// (low, high) Hz the candidate's dominant frequency must fall in.
    pub band: (f64, f64),
    /// Robust (median/MAD) screening of amplitude and duration.
    pub reject_outliers: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            active_stages: HashSet::new(),
            amplitude_range: (30.0, 600.0),
            duration_range: (0.03, 1.0),
            band: (0.3, 8.0),
            reject_outliers: false,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self, sfreq: f64) -> Result<(), AnalysisError> {
        if sfreq <= 0.0 {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "sampling rate must be positive, got {}",
                sfreq
            )));
        }
        let (amp_lo, amp_hi) = self.amplitude_range;
        if amp_lo <= 0.0 || amp_lo >= amp_hi {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "amplitude range ({}, {}) must be positive and increasing",
                amp_lo, amp_hi
            )));
        }
        let (dur_lo, dur_hi) = self.duration_range;
        if dur_lo <= 0.0 || dur_lo >= dur_hi {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "duration range ({}, {}) must be positive and increasing",
                dur_lo, dur_hi
            )));
        }
        let (band_lo, band_hi) = self.band;
        if band_lo <= 0.0 || band_lo >= band_hi || band_hi >= sfreq / 2.0 {
            return Err(AnalysisError::InvalidConfiguration(format!(
                "event band ({}, {}) must be positive, increasing, and below the {} Hz Nyquist limit",
                band_lo,
                band_hi,
                sfreq / 2.0
            )));
        }
        Ok(())
    }
}

/// Sample-index candidate, internal to the detector.
#[derive(Debug, Clone)]
struct Candidate {
    ch: usize,
    onset: usize,
    peak: usize,
    offset: usize,
    amplitude: f64,
    score: f64,
}

/// Detect saccades jointly on two conditioned channels.
///
/// `hypno` is a sample-aligned stage sequence restricting where detection is
/// attempted (see [`DetectionConfig::active_stages`]); pass `None` for no
/// restriction. An empty result is a valid outcome, not an error.
pub fn detect_events(
    ch_a: &[f64],
    ch_b: &[f64],
    sfreq: f64,
    hypno: Option<&[Stage]>,
    config: &DetectionConfig,
) -> Result<Vec<Event>, AnalysisError> {
    config.validate(sfreq)?;
    if ch_a.len() != ch_b.len() {
        return Err(AnalysisError::Alignment(format!(
            "channel lengths differ: {} vs {}",
            ch_a.len(),
            ch_b.len()
        )));
    }
    if let Some(h) = hypno {
        if h.len() != ch_a.len() {
            return Err(AnalysisError::Alignment(format!(
                "hypnogram length {} does not match signal length {}",
                h.len(),
                ch_a.len()
            )));
        }
    }

    let active = |idx: usize| -> bool {
        if config.active_stages.is_empty() {
            return true;
        }
        match hypno {
            Some(h) => config.active_stages.contains(&h[idx]),
            None => true,
        }
    };

    let mut analyzer = SpectrumAnalyzer::new();
    let mut candidates = Vec::new();
    for (ch, samples) in [(0usize, ch_a), (1usize, ch_b)] {
        let found = scan_channel(ch, samples, sfreq, config, &active, &mut analyzer);
        debug!(channel = ch, n = found.len(), "criterion-passing candidates");
        candidates.extend(found);
    }

    if config.reject_outliers {
        let before = candidates.len();
        candidates = reject_outliers(candidates, sfreq);
        debug!(before, after = candidates.len(), "outlier screening");
    }

    let kept_a = resolve_overlaps(candidates.iter().filter(|c| c.ch == 0).cloned().collect());
    let kept_b = resolve_overlaps(candidates.iter().filter(|c| c.ch == 1).cloned().collect());

    // Association widens merged spans, which can reintroduce per-channel
    // overlap with a leftover monocular event, so resolve once more at the
    // event level.
    let mut events = resolve_event_overlaps(associate(kept_a, kept_b, sfreq));
    events.sort_by(|x, y| x.onset.total_cmp(&y.onset));
    info!(n_events = events.len(), "detection finished");
    Ok(events)
}

/// A turning point of the signal: the run of equal-valued samples where one
/// direction of movement ends. Single-sample extrema have `start == end`.
#[derive(Debug, Clone, Copy)]
struct Turn {
    start: usize,
    end: usize,
}

impl Turn {
    fn mid(&self) -> usize {
        (self.start + self.end) / 2
    }
}

/// Locate the turning points of a channel. A crest that holds one value for
/// several samples is a single turning point spanning the plateau, so
/// deflections keep one rise-then-fall regardless of sample parity. Flat
/// runs inside a monotone stretch are not turning points.
fn turning_points(x: &[f64]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut last_dir = 0i8;
    // Index where the signal last stopped moving.
    let mut rest = 0usize;
    for i in 1..x.len() {
        let d = x[i] - x[i - 1];
        let s = if d > 0.0 {
            1
        } else if d < 0.0 {
            -1
        } else {
            0
        };
        if s == 0 {
            continue;
        }
        if s != last_dir {
            turns.push(Turn {
                start: rest,
                end: i - 1,
            });
            last_dir = s;
        }
        rest = i;
    }
    if last_dir != 0 && rest < x.len() {
        turns.push(Turn {
            start: rest,
            end: x.len() - 1,
        });
    }
    turns
}

fn scan_channel(
    ch: usize,
    samples: &[f64],
    sfreq: f64,
    config: &DetectionConfig,
    active: &dyn Fn(usize) -> bool,
    analyzer: &mut SpectrumAnalyzer,
) -> Vec<Candidate> {
    let turns = turning_points(samples);
    let (amp_lo, amp_hi) = config.amplitude_range;
    let (dur_lo, dur_hi) = config.duration_range;
    let (band_lo, band_hi) = config.band;

    let mut out = Vec::new();
    for w in turns.windows(3) {
        // Anchor the span at the plateau edges facing the peak; the peak
        // itself sits at the crest plateau's midpoint.
        let onset = w[0].end;
        let peak = w[1].mid();
        let offset = w[2].start;

        // One strict movement separates consecutive turning points; skip
        // anything degenerate regardless.
        let rise = samples[peak] - samples[onset];
        let fall = samples[offset] - samples[peak];
        if rise == 0.0 || fall == 0.0 || rise.signum() == fall.signum() {
            continue;
        }

        let duration = (offset - onset) as f64 / sfreq;
        if duration < dur_lo || duration > dur_hi {
            continue;
        }

        let amplitude = rise.abs().max(fall.abs());
        if amplitude < amp_lo || amplitude > amp_hi {
            continue;
        }

        if !active(peak) {
            continue;
        }

        // Dominant frequency over a window around the peak, independent of
        // the channel-wide conditioning band. The window must be long
        // enough that the bin width sits at band_lo / 2 or finer, otherwise
        // slow in-band events get binned below the low edge.
        let span = offset - onset + 1;
        let min_half = (sfreq / band_lo).ceil() as usize;
        let half = (span * 2).max(min_half).max(32);
        let lo = peak.saturating_sub(half);
        let hi = (peak + half).min(samples.len());
        let freq = analyzer.dominant_frequency(&samples[lo..hi], sfreq);
        if freq < band_lo || freq > band_hi {
            continue;
        }

        out.push(Candidate {
            ch,
            onset,
            peak,
            offset,
            amplitude,
            // Single-channel confidence is the deflection amplitude;
            // cross-channel association adds the partner's share.
            score: amplitude,
        });
    }
    out
}

/// Median of a slice; input need not be sorted.
fn median(values: &[f64]) -> f64 {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}

/// Drop candidates whose amplitude or duration sits far outside the bulk of
/// the per-run distribution (modified z-score from the scaled MAD, cutoff
/// 3.5). Runs with fewer than five candidates are left untouched.
fn reject_outliers(candidates: Vec<Candidate>, sfreq: f64) -> Vec<Candidate> {
    if candidates.len() < 5 {
        return candidates;
    }
    let amplitudes: Vec<f64> = candidates.iter().map(|c| c.amplitude).collect();
    let durations: Vec<f64> = candidates
        .iter()
        .map(|c| (c.offset - c.onset) as f64 / sfreq)
        .collect();

    let inlier = |values: &[f64]| -> Vec<bool> {
        let med = median(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
        let mad = 1.4826 * median(&deviations);
        if mad == 0.0 {
            return vec![true; values.len()];
        }
        values.iter().map(|v| (v - med).abs() / mad <= 3.5).collect()
    };

    let amp_ok = inlier(&amplitudes);
    let dur_ok = inlier(&durations);
    candidates
        .into_iter()
        .zip(amp_ok.into_iter().zip(dur_ok))
        .filter_map(|(c, (a, d))| (a && d).then_some(c))
        .collect()
}

/// Same-channel overlap resolution: keep the higher-scoring candidate of any
/// overlapping pair. Returns the survivors sorted by onset.
fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.onset.cmp(&b.onset)));
    let mut kept: Vec<Candidate> = Vec::new();
    for cand in candidates {
        let clashes = kept
            .iter()
            .any(|k| cand.onset <= k.offset && k.onset <= cand.offset);
        if !clashes {
            kept.push(cand);
        }
    }
    kept.sort_by_key(|c| c.onset);
    kept
}

/// Whether two events occupy a common channel. `Both` counts on either side.
fn channels_clash(a: Channel, b: Channel) -> bool {
    !matches!((a, b), (Channel::A, Channel::B) | (Channel::B, Channel::A))
}

/// Event-level overlap resolution across the associated set: of any two
/// time-overlapping events sharing a channel, the higher-scoring one wins.
fn resolve_event_overlaps(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by(|x, y| {
        y.score
            .total_cmp(&x.score)
            .then(x.onset.total_cmp(&y.onset))
    });
    let mut kept: Vec<Event> = Vec::new();
    for ev in events {
        let clashes = kept.iter().any(|k| {
            channels_clash(ev.channel, k.channel) && ev.onset <= k.offset && k.onset <= ev.offset
        });
        if !clashes {
            kept.push(ev);
        }
    }
    kept
}

/// Overlap fraction required (of the shorter span) to treat two candidates
/// on opposite channels as one binocular event.
const ASSOC_OVERLAP: f64 = 0.5;

fn associate(kept_a: Vec<Candidate>, kept_b: Vec<Candidate>, sfreq: f64) -> Vec<Event> {
    let to_event = |c: &Candidate, channel: Channel, score: f64| Event {
        channel,
        onset: c.onset as f64 / sfreq,
        offset: c.offset as f64 / sfreq,
        peak: c.peak as f64 / sfreq,
        amplitude: c.amplitude,
        score,
    };

    let mut used_b = vec![false; kept_b.len()];
    let mut events = Vec::new();
    for a in &kept_a {
        let mut partner: Option<usize> = None;
        for (j, b) in kept_b.iter().enumerate() {
            if used_b[j] {
                continue;
            }
            let overlap =
                a.offset.min(b.offset) as i64 - a.onset.max(b.onset) as i64;
            if overlap <= 0 {
                continue;
            }
            let shorter = (a.offset - a.onset).min(b.offset - b.onset).max(1);
            if overlap as f64 >= ASSOC_OVERLAP * shorter as f64 {
                partner = Some(j);
                break;
            }
        }
        match partner {
            Some(j) => {
                used_b[j] = true;
                let b = &kept_b[j];
                let stronger = if b.amplitude > a.amplitude { b } else { a };
                events.push(Event {
                    channel: Channel::Both,
                    onset: a.onset.min(b.onset) as f64 / sfreq,
                    offset: a.offset.max(b.offset) as f64 / sfreq,
                    peak: stronger.peak as f64 / sfreq,
                    amplitude: stronger.amplitude,
                    score: a.score + b.score,
                });
            }
            None => events.push(to_event(a, Channel::A, a.score)),
        }
    }
    for (j, b) in kept_b.iter().enumerate() {
        if !used_b[j] {
            events.push(to_event(b, Channel::B, b.score));
        }
    }
    events
}
