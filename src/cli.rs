use crate::error::Result;
use crate::metrics::HistogramConfig;
use crate::report::ReportOptions;
use crate::simulate::WorkloadConfig;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// HTTP load statistics - replays a synthetic connection workload through the
/// statistics collectors and prints the end-of-run report
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of connections to open (the whole run is scheduled in memory,
    /// up to 50 million events)
    #[clap(long, default_value_t = crate::defaults::NUM_CONNS, help_heading = "Workload")]
    pub num_conns: u64,

    /// Calls issued on every established connection
    #[clap(long, default_value_t = crate::defaults::NUM_CALLS, help_heading = "Workload")]
    pub num_calls: u64,

    /// Connection rate in connections per second
    #[clap(long, default_value_t = crate::defaults::RATE, help_heading = "Workload")]
    pub rate: f64,

    /// Seed of the workload generator
    #[clap(long, default_value_t = crate::defaults::SEED, help_heading = "Workload")]
    pub seed: u64,

    /// Fraction of connections that fail with a socket error
    #[clap(long, default_value_t = 0.0, help_heading = "Workload")]
    pub failure_ratio: f64,

    /// Fraction of connections that hit the client timeout
    #[clap(long, default_value_t = 0.0, help_heading = "Workload")]
    pub timeout_ratio: f64,

    /// Client timeout (e.g. "5s", "500ms")
    #[clap(long, value_parser = parse_seconds, default_value = "5s", help_heading = "Workload")]
    pub timeout: f64,

    /// Reply-rate sampling interval (e.g. "5s", "500ms")
    #[clap(long, value_parser = parse_seconds, default_value = "5s", help_heading = "Statistics")]
    pub sample_interval: f64,

    /// Histogram bin width in milliseconds (at most 10 million bins per histogram)
    #[clap(long, default_value_t = crate::defaults::BIN_WIDTH_SECS * 1e3, help_heading = "Statistics")]
    pub bin_width: f64,

    /// Largest latency the histograms resolve, in seconds; longer ones land in the last bin
    #[clap(long, default_value_t = crate::defaults::MAX_LIFETIME_SECS, help_heading = "Statistics")]
    pub max_lifetime: f64,

    /// Print the 1..100% percentile table
    #[clap(long, default_value_t = false, help_heading = "Report")]
    pub percentiles: bool,

    /// Print a one-line summary instead of the full report
    #[clap(long, default_value_t = false, help_heading = "Report")]
    pub summary: bool,

    /// Verbose output (-v: progress, -vv: histograms and per-sample rates)
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write the report to this file instead of stdout
    #[clap(short = 'o', long)]
    pub output: Option<PathBuf>,
}

impl Args {
    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            percentiles: self.percentiles,
            summary: self.summary,
            verbosity: self.verbose,
        }
    }

    pub fn histogram_config(&self) -> Result<HistogramConfig> {
        HistogramConfig::from_range(self.bin_width * 1e-3, self.max_lifetime)
    }

    pub fn workload_config(&self) -> Result<WorkloadConfig> {
        let config = WorkloadConfig {
            num_conns: self.num_conns,
            num_calls: self.num_calls,
            rate: self.rate,
            seed: self.seed,
            failure_ratio: self.failure_ratio,
            timeout_ratio: self.timeout_ratio,
            timeout: self.timeout,
            sample_interval: self.sample_interval,
            ..WorkloadConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a duration (e.g. "10s", "250ms", "2m") into seconds
fn parse_seconds(s: &str) -> std::result::Result<f64, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, scale) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, 1e-3)
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, 1.0)
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, 60.0)
    } else {
        (s, 1.0) // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    if !(num.is_finite() && num > 0.0) {
        return Err(format!("Duration must be positive: {}", s));
    }

    Ok(num * scale)
}
