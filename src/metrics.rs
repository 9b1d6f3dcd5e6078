//! # Latency Channels and Reply-Rate Sampling
//!
//! This module holds the bounded-memory aggregators that every lifecycle
//! handler feeds:
//!
//! - **`MetricChannel`**: one latency distribution (connection lifetime,
//!   handshake, response or transfer time) kept as running moments plus a
//!   fixed-width linear histogram. Memory is fixed when the channel is built
//!   and never grows, no matter how many observations arrive.
//! - **`ReplyRateSampler`**: converts "replies completed since the previous
//!   sample" into a replies-per-second rate on every sampling tick and keeps
//!   running moments over those rates.
//!
//! All values are in seconds. Channels are updated in O(1) per observation;
//! only `MetricChannel::finalize` scans the histogram, once, at the end of the
//! run.

use crate::error::{Result, StatsError};

/// Number of percentile slots in a finalized channel.
///
/// Index `p` holds the `p`-th percentile for `p` in `1..=100`; index 0 is
/// unused and stays at zero.
pub const PERCENTILE_SLOTS: usize = 101;

/// Fixed binning for a `MetricChannel` histogram.
///
/// A value `v` lands in bin `floor(v * num_bins / max_value)`, clamped to
/// `[0, num_bins - 1]`. Values at or beyond `max_value` all collapse into the
/// last bin: they are still counted, but the topmost percentiles of a run with
/// such outliers are compressed towards `max_value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramConfig {
    max_value: f64,
    num_bins: usize,
}

impl HistogramConfig {
    /// Build a binning from a bin width and a bin count.
    pub fn new(bin_width: f64, num_bins: usize) -> Result<Self> {
        if !(bin_width.is_finite() && bin_width > 0.0) {
            return Err(StatsError::invalid(
                "bin_width",
                format!("must be a positive number of seconds, got {}", bin_width),
            ));
        }
        if num_bins == 0 {
            return Err(StatsError::invalid("num_bins", "must be at least 1"));
        }
        check_bin_count(num_bins)?;
        let max_value = bin_width * num_bins as f64;
        if !max_value.is_finite() {
            return Err(StatsError::invalid(
                "bin_width",
                format!("{} bins of {} s overflow the histogram range", num_bins, bin_width),
            ));
        }
        Ok(Self {
            max_value,
            num_bins,
        })
    }

    /// Build a binning that covers `[0, max_value)` with bins of `bin_width`.
    pub fn from_range(bin_width: f64, max_value: f64) -> Result<Self> {
        if !(max_value.is_finite() && max_value > 0.0) {
            return Err(StatsError::invalid(
                "max_value",
                format!("must be a positive number of seconds, got {}", max_value),
            ));
        }
        let probe = Self::new(bin_width, 1)?;
        let bins = (max_value / probe.bin_width()).round();
        if bins < 1.0 {
            return Err(StatsError::invalid(
                "max_value",
                "range is narrower than a single bin",
            ));
        }
        if !bins.is_finite() || bins > crate::defaults::MAX_BINS as f64 {
            return Err(StatsError::invalid(
                "bin_width",
                format!(
                    "{} s over {} s needs more than {} bins",
                    bin_width,
                    max_value,
                    crate::defaults::MAX_BINS
                ),
            ));
        }
        let num_bins = bins as usize;
        Ok(Self {
            max_value,
            num_bins,
        })
    }

    pub fn bin_width(&self) -> f64 {
        self.max_value / self.num_bins as f64
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    /// Bin index for `value`; negative and NaN values go to bin 0.
    pub fn bin_for(&self, value: f64) -> usize {
        let raw = (value * self.num_bins as f64 / self.max_value).floor();
        if raw.is_nan() || raw <= 0.0 {
            0
        } else {
            // `as` saturates, so huge values stay representable before the clamp.
            (raw as usize).min(self.num_bins - 1)
        }
    }

    /// Midpoint of bin `index`, the value reported for any percentile that
    /// resolves to that bin.
    pub fn bin_midpoint(&self, index: usize) -> f64 {
        (index as f64 + 0.5) * self.bin_width()
    }
}

fn check_bin_count(num_bins: usize) -> Result<()> {
    if num_bins > crate::defaults::MAX_BINS {
        return Err(StatsError::invalid(
            "num_bins",
            format!(
                "at most {} bins are supported, got {}",
                crate::defaults::MAX_BINS,
                num_bins
            ),
        ));
    }
    Ok(())
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            max_value: crate::defaults::MAX_LIFETIME_SECS,
            num_bins: crate::defaults::NUM_BINS,
        }
    }
}

/// Running count, sum, sum of squares and extrema of a stream of values.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Empty moments. `min` starts at the largest representable value and
    /// `max` at negative infinity so the first observation takes both.
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::MAX,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    /// Arithmetic mean, or 0 when nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Population standard deviation.
    ///
    /// The variance is clamped at zero: `sum_sq / n - mean^2` can come out
    /// slightly negative through floating-point cancellation when all values
    /// are (nearly) equal.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Final statistics of one channel, produced by `MetricChannel::finalize`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub count: u64,
    pub avg: f64,
    pub stddev: f64,
    /// 0 when the channel is empty.
    pub min: f64,
    /// 0 when the channel is empty.
    pub max: f64,
    pub percentiles: [f64; PERCENTILE_SLOTS],
}

impl ChannelStats {
    /// A channel with no observations carries no distribution at all; report
    /// writers must print it as "no data" rather than as zeros.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The `p`-th percentile, `p` in `1..=100`.
    pub fn percentile(&self, p: usize) -> f64 {
        assert!(
            (1..=100).contains(&p),
            "percentile rank {} is outside 1..=100",
            p
        );
        self.percentiles[p]
    }
}

/// Online aggregator for a single latency distribution.
///
/// ## Memory
///
/// The histogram is allocated once with `HistogramConfig::num_bins` slots
/// (800 KB for the default 100 000 bins) and never resized.
///
/// ## Invariants
///
/// - the histogram bins always sum to `count()`
/// - once `count() > 0`, every observed value lies in `[min, max]`
#[derive(Debug, Clone)]
pub struct MetricChannel {
    config: HistogramConfig,
    moments: RunningStats,
    histogram: Box<[u64]>,
}

impl MetricChannel {
    pub fn new(config: HistogramConfig) -> Self {
        Self {
            config,
            moments: RunningStats::new(),
            histogram: vec![0; config.num_bins()].into_boxed_slice(),
        }
    }

    /// Record one observation (seconds).
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.moments.record(value);
        let bin = self.config.bin_for(value);
        self.histogram[bin] += 1;
    }

    pub fn count(&self) -> u64 {
        self.moments.count()
    }

    pub fn config(&self) -> &HistogramConfig {
        &self.config
    }

    pub fn moments(&self) -> &RunningStats {
        &self.moments
    }

    pub fn histogram(&self) -> &[u64] {
        &self.histogram
    }

    /// Iterate `(bin_index, count)` over bins holding at least one value.
    pub fn occupied_bins(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.histogram
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(i, &n)| (i, n))
    }

    /// Compute mean, standard deviation and the percentile table.
    ///
    /// Percentiles come from one ascending scan over the bins with a running
    /// cumulative count `n`. Rank `p` resolves to the first bin where
    /// `n * 100 >= count * p`, i.e. the smallest bin midpoint whose cumulative
    /// mass reaches `p` percent (nearest-rank). The table is therefore
    /// non-decreasing in `p`, and `percentiles[100]` is the bin holding the
    /// maximum. An empty channel leaves every slot at zero.
    pub fn finalize(&self) -> ChannelStats {
        let count = self.count();
        let mut percentiles = [0.0; PERCENTILE_SLOTS];

        if count > 0 {
            let mut cumulative: u128 = 0;
            let mut p: usize = 1;
            for (bin, &hits) in self.histogram.iter().enumerate() {
                if hits == 0 {
                    continue;
                }
                cumulative += u128::from(hits);
                while p <= 100 && cumulative * 100 >= u128::from(count) * p as u128 {
                    percentiles[p] = self.config.bin_midpoint(bin);
                    p += 1;
                }
                if p > 100 {
                    break;
                }
            }
            debug_assert!(p > 100, "histogram mass does not match sample count");
        }

        ChannelStats {
            count,
            avg: self.moments.mean(),
            stddev: self.moments.stddev(),
            min: self.moments.min().unwrap_or(0.0),
            max: self.moments.max().unwrap_or(0.0),
            percentiles,
        }
    }
}

/// Summary of the reply-rate samples taken during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplyRateStats {
    pub samples: u64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Only computed with two or more samples; 0 otherwise.
    pub stddev: f64,
}

/// Periodic throughput observer.
///
/// Every completed reply bumps a transient counter; every sampling tick turns
/// that counter into a rate and resets it.
#[derive(Debug, Clone, Default)]
pub struct ReplyRateSampler {
    replies_since_sample: u64,
    rates: RunningStats,
}

impl ReplyRateSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reply(&mut self) {
        self.replies_since_sample += 1;
    }

    pub fn pending_replies(&self) -> u64 {
        self.replies_since_sample
    }

    /// Close the current interval.
    ///
    /// `weight` is the inverse of the interval length actually elapsed, so the
    /// returned rate is in replies per second even when ticks jitter.
    pub fn sample(&mut self, weight: f64) -> f64 {
        let rate = weight * self.replies_since_sample as f64;
        self.rates.record(rate);
        self.replies_since_sample = 0;
        rate
    }

    pub fn rates(&self) -> &RunningStats {
        &self.rates
    }

    pub fn stats(&self) -> ReplyRateStats {
        let samples = self.rates.count();
        ReplyRateStats {
            samples,
            min: self.rates.min().unwrap_or(0.0),
            avg: self.rates.mean(),
            max: self.rates.max().unwrap_or(0.0),
            stddev: if samples > 1 { self.rates.stddev() } else { 0.0 },
        }
    }
}
