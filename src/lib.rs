//! # HTTP Load Statistics Library
//!
//! The measurement core of an HTTP load generator: it observes the lifecycle
//! events of connections and calls and turns them into an end-of-run report
//! of latency distributions, throughput, error breakdowns and CPU usage.
//!
//! ## Architecture Overview
//!
//! - `events`: the lifecycle event contract (kinds, object handles, payloads, clocks)
//! - `engine`: synchronous dispatcher driving collectors through init/start/stop/dump
//! - `collector`: the `StatCollector` plugin trait and the standard `BasicCollector`
//! - `metrics`: fixed-bin latency histograms with percentiles, and the reply-rate sampler
//! - `counters`: run counters and socket error classification
//! - `report`: the plain-text report views
//! - `simulate`: a seeded synthetic workload that drives the engine without sockets
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use http_load_stats::{BasicCollector, EventEngine, HistogramConfig, ManualClock};
//! use http_load_stats::report::ReportOptions;
//! use http_load_stats::simulate::{self, WorkloadConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut engine = EventEngine::new(ManualClock::new());
//!     engine.add_collector(Box::new(BasicCollector::new(
//!         HistogramConfig::default(),
//!         ReportOptions::default(),
//!     )));
//!     engine.init()?;
//!
//!     simulate::run(&mut engine, &WorkloadConfig::default())?;
//!     engine.dump(&mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Measurement Model
//!
//! - **Fixed linear bins**: every latency channel keeps a histogram of
//!   `num_bins` equal-width bins; values beyond the range are clamped into
//!   the last bin
//! - **Bin-midpoint percentiles**: percentile `p` is the midpoint of the first
//!   bin whose cumulative count covers `p` % of the observations
//! - **Zero-safe rates**: every derived rate prints 0 when its divisor is 0

/// Command-line interface and configuration
///
/// Argument parsing using clap, converted into `HistogramConfig`,
/// `WorkloadConfig` and `ReportOptions`.
pub mod cli;

/// Statistics collectors
///
/// The `StatCollector` plugin trait and `BasicCollector`, which binds the
/// lifecycle events to latency channels, counters and the reply-rate sampler.
pub mod collector;

pub mod counters;

/// Event dispatch and run lifecycle
pub mod engine;

pub mod error;

/// Lifecycle event types shared between the engine and collectors
pub mod events;

pub mod logging;

/// Latency histograms and throughput sampling
///
/// Implements the fixed-bin metric channel with:
/// - Running count, sum, sum of squares, min and max
/// - Percentile resolution at bin midpoints
/// - Reply-rate samples in replies per second
pub mod metrics;

/// End-of-run report views
pub mod report;

/// Seeded synthetic workload generator
pub mod simulate;

// Re-export key types for convenient library usage

/// Collector plugin contract and the standard collector
pub use collector::{BasicCollector, BasicStats, StatCollector};

/// Run counters and failure buckets
pub use counters::{Counters, FailureCause};

pub use engine::EventEngine;

pub use error::{Result, StatsError};

/// Event contract
pub use events::{CallId, Clock, ConnId, EventKind, ManualClock, MonotonicClock, ObjectRef, Payload};

/// Measurement types
pub use metrics::{ChannelStats, HistogramConfig, MetricChannel, ReplyRateSampler};

/// The current version of the statistics library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default histogram bin width, in seconds
    ///
    /// 1 ms resolves typical LAN and WAN latencies while keeping the
    /// histograms of a 100 s range at 100 000 bins.
    pub const BIN_WIDTH_SECS: f64 = 1e-3;

    /// Default upper bound of the histogram range, in seconds
    ///
    /// Anything longer is still counted but lands in the last bin.
    pub const MAX_LIFETIME_SECS: f64 = 100.0;

    /// Default number of histogram bins (`MAX_LIFETIME_SECS / BIN_WIDTH_SECS`)
    pub const NUM_BINS: usize = 100_000;

    /// Largest bin count a histogram accepts
    ///
    /// Every channel allocates its bins up front, so this bounds the memory
    /// of the four latency channels to a few hundred MiB.
    pub const MAX_BINS: usize = 10_000_000;

    /// Default reply-rate sampling interval, in seconds
    pub const SAMPLE_INTERVAL_SECS: f64 = 5.0;

    /// Default client timeout, in seconds
    pub const CLIENT_TIMEOUT_SECS: f64 = 5.0;

    /// Default number of connections
    pub const NUM_CONNS: u64 = 1000;

    /// Default number of calls per connection
    pub const NUM_CALLS: u64 = 1;

    /// Default connection rate, in connections per second
    pub const RATE: f64 = 100.0;

    /// Default seed of the workload generator
    pub const SEED: u64 = 1;

    /// Largest number of events a synthetic run may schedule
    ///
    /// The generator holds the whole run in memory before replaying it.
    pub const MAX_SIMULATED_EVENTS: u64 = 50_000_000;
}
