use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reog::detect::DetectionConfig;
use reog::hypno::Stage;
use reog::io;
use reog::pipeline::{run_analysis, PipelineConfig, EPOCH_SECS};
use reog::rates::format_table;

// CLI code
// underscores will be converted to "-" when clap parses the arguments
#[derive(Parser)]
#[command(name = "reog")]
#[command(version = "0.1.0")]
#[command(about = "Sleep EOG saccade detection and per-stage rates", long_about = None)]
pub struct Cli {
    /// File path of the raw interleaved f64 sample file (two eye channels)
    #[arg(long)]
    dfpath: String,

    /// File path of the epoch-level hypnogram (one signed byte per epoch)
    #[arg(long)]
    hypno: String,

    /// Sampling rate of the recording in Hz
    #[arg(long)]
    sfreq: f64,

    /// Low edge of the conditioning band-pass in Hz
    #[arg(long, default_value_t = 0.3)]
    lfreq: f64,

    /// High edge of the conditioning band-pass in Hz
    #[arg(long, default_value_t = 50.0)]
    hfreq: f64,

    /// Minimum event amplitude (signal units)
    #[arg(long, default_value_t = 30.0)]
    amp_min: f64,

    /// Maximum event amplitude (signal units)
    #[arg(long, default_value_t = 600.0)]
    amp_max: f64,

    /// Minimum event duration in seconds
    #[arg(long, default_value_t = 0.03)]
    dur_min: f64,

    /// Maximum event duration in seconds
    #[arg(long, default_value_t = 1.0)]
    dur_max: f64,

    /// Low edge of the event frequency band in Hz
    #[arg(long, default_value_t = 0.3)]
    band_low: f64,

    /// High edge of the event frequency band in Hz
    #[arg(long, default_value_t = 8.0)]
    band_high: f64,

    /// Restrict detection to REM epochs
    #[arg(long)]
    rem_only: bool,

    /// Discard statistically inconsistent candidates
    #[arg(long)]
    reject_outliers: bool,

    /// Print every detected event, not just the rate table
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let ch_names = vec!["E1".to_string(), "E2".to_string()];
    let (rec_info, eog) = io::load_samples(&cli.dfpath, &ch_names, cli.sfreq)
        .with_context(|| format!("reading samples from {}", cli.dfpath))?;
    let epochs = io::load_hypnogram(&cli.hypno)
        .with_context(|| format!("reading hypnogram from {}", cli.hypno))?;

    let detection = DetectionConfig {
        active_stages: if cli.rem_only {
            [Stage::Rem].into_iter().collect()
        } else {
            Default::default()
        },
        amplitude_range: (cli.amp_min, cli.amp_max),
        duration_range: (cli.dur_min, cli.dur_max),
        band: (cli.band_low, cli.band_high),
        reject_outliers: cli.reject_outliers,
    };
    let config = PipelineConfig {
        filter_band: (cli.lfreq, cli.hfreq),
        epoch_secs: EPOCH_SECS,
        detection,
    };

    info!(
        sfreq = rec_info.sfreq,
        n_samples = rec_info.n_samples,
        n_epochs = epochs.len(),
        "starting analysis"
    );
    let run = run_analysis(&rec_info, &eog, &epochs, &config)?;

    if cli.verbose {
        for ev in &run.events {
            println!(
                "{}  onset {:.3}s  peak {:.3}s  offset {:.3}s  amp {:.1}  score {:.1}",
                ev.channel, ev.onset, ev.peak, ev.offset, ev.amplitude, ev.score
            );
        }
    }
    println!("Detected {} saccades", run.events.len());
    println!();
    print!("{}", format_table(&run.rates));

    Ok(())
}
