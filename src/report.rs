//! # End-of-Run Report
//!
//! Turns the finalized channels and counters of a `BasicStats` into plain-text
//! output. Four views exist, selected by `ReportOptions`:
//!
//! - **Percentile table**: rows 1..100 %, one column per latency channel
//! - **Summary line**: one whitespace-separated row for downstream parsing;
//!   fields whose inputs are inconsistent are replaced by `******`
//! - **Histograms** (`verbosity > 1`): non-empty bins of every channel
//! - **Narrative report**: rates, sizes, distributions, CPU and error totals
//!
//! Every derived rate goes through `ratio`, so a zero-length run or an empty
//! counter prints 0 instead of `inf`/`NaN`. A channel without observations is
//! printed as "no data".

use crate::collector::BasicStats;
use crate::counters::{Counters, FailureCause};
use crate::error::{Result, StatsError};
use crate::metrics::{ChannelStats, MetricChannel, ReplyRateStats};
use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeVal;
use std::io::{self, Write};

const NO_DATA: &str = "no data";
const INVALID_FIELD: &str = "******";

/// Which report views to print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Print the 1..100 % percentile table first.
    pub percentiles: bool,
    /// Print only the one-line summary (after the percentile table, if any).
    pub summary: bool,
    /// `> 1` adds per-channel histogram dumps to the narrative report.
    pub verbosity: u8,
}

/// User and system CPU time of this process, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
}

impl CpuTimes {
    /// Snapshot the CPU time consumed so far.
    pub fn capture() -> Result<Self> {
        let usage = getrusage(UsageWho::RUSAGE_SELF)
            .map_err(|source| StatsError::ResourceUsage { source })?;
        Ok(Self {
            user: timeval_secs(usage.user_time()),
            system: timeval_secs(usage.system_time()),
        })
    }

    /// CPU time spent between `earlier` and `self`.
    pub fn since(&self, earlier: &CpuTimes) -> CpuTimes {
        CpuTimes {
            user: (self.user - earlier.user).max(0.0),
            system: (self.system - earlier.system).max(0.0),
        }
    }

    pub fn total(&self) -> f64 {
        self.user + self.system
    }
}

fn timeval_secs(tv: TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 * 1e-6
}

/// Run-wide facts the engine measured outside of any collector.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTotals {
    /// Wall-clock seconds between test start and stop.
    pub duration: f64,
    pub cpu: CpuTimes,
}

/// `numerator / denominator`, or 0 when the quotient would not be finite.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        let q = numerator / denominator;
        if q.is_finite() {
            return q;
        }
    }
    0.0
}

/// Finalized view of a `BasicStats`, ready to be printed.
#[derive(Debug)]
pub struct BasicReport<'a> {
    stats: &'a BasicStats,
    lifetime: ChannelStats,
    connect: ChannelStats,
    response: ChannelStats,
    transfer: ChannelStats,
    reply_rate: ReplyRateStats,
}

impl<'a> BasicReport<'a> {
    /// Finalize every channel of `stats`.
    pub fn new(stats: &'a BasicStats) -> Self {
        Self {
            stats,
            lifetime: stats.lifetime().finalize(),
            connect: stats.connect().finalize(),
            response: stats.response().finalize(),
            transfer: stats.transfer().finalize(),
            reply_rate: stats.reply_rate().stats(),
        }
    }

    pub fn lifetime(&self) -> &ChannelStats {
        &self.lifetime
    }

    pub fn connect(&self) -> &ChannelStats {
        &self.connect
    }

    pub fn response(&self) -> &ChannelStats {
        &self.response
    }

    pub fn transfer(&self) -> &ChannelStats {
        &self.transfer
    }

    fn counters(&self) -> &Counters {
        self.stats.counters()
    }

    /// Print the views selected by `options`.
    pub fn write(&self, run: &RunTotals, options: &ReportOptions, out: &mut dyn Write) -> io::Result<()> {
        if options.percentiles {
            self.write_percentile_table(out)?;
        }
        if options.summary {
            return self.write_summary_line(out);
        }
        if options.verbosity > 1 {
            self.write_histograms(out)?;
        }
        self.write_narrative(run, out)
    }

    pub fn write_percentile_table(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "\nPercentiles [ms] - lifetime  connect  response  transfer:")?;
        let columns = [&self.lifetime, &self.connect, &self.response, &self.transfer];
        for p in 1..=100 {
            write!(out, "{:>6}%", p)?;
            for stats in columns {
                if stats.is_empty() {
                    write!(out, " {:>6}", "-")?;
                } else {
                    write!(out, " {:>6.0}", 1e3 * stats.percentile(p))?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// One row: connect/response/transfer/lifetime averages (ms), average
    /// header/content/footer sizes, then the 1xx..5xx counters.
    ///
    /// Every stage downstream of the handshake is expected to have seen one
    /// observation per established connection; when it did not, its field is
    /// replaced by `******` because the average would describe a different
    /// population than the others.
    pub fn write_summary_line(&self, out: &mut dyn Write) -> io::Result<()> {
        let counters = self.counters();
        let established = self.connect.count;
        let total_replies = counters.total_replies();
        let replies_match = total_replies == established && established > 0;

        let fields = [
            summary_field(!self.connect.is_empty(), self.connect.avg, 8),
            summary_field(
                self.response.count == established && !self.response.is_empty(),
                self.response.avg,
                6,
            ),
            summary_field(replies_match && !self.transfer.is_empty(), self.transfer.avg, 6),
            summary_field(
                self.lifetime.count == established && !self.lifetime.is_empty(),
                self.lifetime.avg,
                6,
            ),
        ];
        write!(out, "{}", fields.join(" "))?;

        if replies_match {
            let bytes = counters.received_bytes();
            let n = total_replies as f64;
            write!(
                out,
                "   {} {} {}",
                (bytes.header as f64 / n) as u64,
                (bytes.content as f64 / n) as u64,
                (bytes.footer as f64 / n) as u64
            )?;
            write!(
                out,
                "   {} {} {} {} {}",
                counters.replies(1),
                counters.replies(2),
                counters.replies(3),
                counters.replies(4),
                counters.replies(5)
            )?;
        } else {
            write!(out, "   * * *   * * * * *")?;
        }
        writeln!(out)
    }

    pub fn write_histograms(&self, out: &mut dyn Write) -> io::Result<()> {
        let channels: [(&str, &MetricChannel); 4] = [
            ("connection lifetime", self.stats.lifetime()),
            ("connect time", self.stats.connect()),
            ("response time", self.stats.response()),
            ("transfer time", self.stats.transfer()),
        ];
        for (title, channel) in channels {
            writeln!(out, "\nHistogram - {} (ms):", title)?;
            write_histogram(channel, out)?;
        }
        Ok(())
    }

    pub fn write_narrative(&self, run: &RunTotals, out: &mut dyn Write) -> io::Result<()> {
        let counters = self.counters();
        let delta = run.duration;
        let total_replies = counters.total_replies();
        let conns = counters.conns_issued() as f64;
        let sent = counters.requests_sent() as f64;

        writeln!(
            out,
            "\nTotal: connections {} requests {} replies {} test-duration {:.3} s",
            counters.conns_issued(),
            counters.requests_sent(),
            total_replies,
            delta
        )?;
        writeln!(out)?;

        writeln!(
            out,
            "Connection rate: {:.1} conn/s ({:.1} ms/conn, <={} concurrent connections)",
            ratio(conns, delta),
            1e3 * ratio(delta, conns),
            counters.max_conns()
        )?;
        writeln!(
            out,
            "Connection length [replies/conn]: {:.3}",
            ratio(total_replies as f64, self.lifetime.count as f64)
        )?;

        write!(
            out,
            "\n                       num    avg stddev    min  10%  25%  50%  75%  90%  95%  99%    max"
        )?;
        for (label, stats) in [
            ("Connection life [ms]", &self.lifetime),
            ("Handshake time  [ms]", &self.connect),
            ("Response time   [ms]", &self.response),
            ("Transfer time   [ms]", &self.transfer),
        ] {
            write!(out, "\n{}", label)?;
            write_channel_row(stats, out)?;
        }
        writeln!(out, "\n")?;

        writeln!(
            out,
            "Request rate: {:.1} req/s ({:.1} ms/req)",
            ratio(sent, delta),
            1e3 * ratio(delta, sent)
        )?;
        writeln!(
            out,
            "Request size [B]: {:.1}",
            ratio(counters.req_bytes_sent() as f64, sent)
        )?;
        writeln!(out)?;

        let rate = &self.reply_rate;
        writeln!(
            out,
            "Reply rate [replies/s]: min {:.1} avg {:.1} max {:.1} stddev {:.1} ({} samples)",
            rate.min, rate.avg, rate.max, rate.stddev, rate.samples
        )?;

        let bytes = counters.received_bytes();
        let n = total_replies as f64;
        let header = ratio(bytes.header as f64, n);
        let content = ratio(bytes.content as f64, n);
        let footer = ratio(bytes.footer as f64, n);
        writeln!(
            out,
            "Reply size [B]: header {:.1} content {:.1} footer {:.1} (total {:.1})",
            header,
            content,
            footer,
            header + content + footer
        )?;
        writeln!(
            out,
            "Reply status: 1xx={} 2xx={} 3xx={} 4xx={} 5xx={}",
            counters.replies(1),
            counters.replies(2),
            counters.replies(3),
            counters.replies(4),
            counters.replies(5)
        )?;
        writeln!(out)?;

        let cpu = run.cpu;
        writeln!(
            out,
            "CPU time [s]: user {:.2} system {:.2} (user {:.1}% system {:.1}% total {:.1}%)",
            cpu.user,
            cpu.system,
            100.0 * ratio(cpu.user, delta),
            100.0 * ratio(cpu.system, delta),
            100.0 * ratio(cpu.total(), delta)
        )?;

        let net_bytes = (counters.req_bytes_sent() + bytes.header + bytes.content) as f64;
        writeln!(
            out,
            "Net I/O: {:.1} KB/s ({:.1}*10^6 bps)",
            ratio(net_bytes, delta) / 1024.0,
            8e-6 * ratio(net_bytes, delta)
        )?;
        writeln!(out)?;

        writeln!(
            out,
            "Errors: total {} client-timo {} socket-timo {} connrefused {} connreset {}",
            counters.total_errors(),
            counters.client_timeouts(),
            counters.failures(FailureCause::SocketTimeout),
            counters.failures(FailureCause::ConnectionRefused),
            counters.failures(FailureCause::ConnectionReset)
        )?;
        writeln!(
            out,
            "Errors: fd-unavail {} addrunavail {} ftab-full {} other {}",
            counters.failures(FailureCause::FdUnavailable),
            counters.failures(FailureCause::AddressUnavailable),
            counters.failures(FailureCause::FileTableFull),
            counters.failures(FailureCause::Other)
        )
    }
}

fn summary_field(valid: bool, secs: f64, width: usize) -> String {
    if valid {
        format!("{:>width$.1}", 1e3 * secs, width = width)
    } else {
        format!("{:>width$}", INVALID_FIELD, width = width)
    }
}

fn write_channel_row(stats: &ChannelStats, out: &mut dyn Write) -> io::Result<()> {
    if stats.is_empty() {
        return write!(out, "{:>6} {:>6}", 0, NO_DATA);
    }
    write!(
        out,
        "{:>6} {:>6.1} {:>6.1} {:>6.1}",
        stats.count,
        1e3 * stats.avg,
        1e3 * stats.stddev,
        1e3 * stats.min
    )?;
    for p in [10, 25, 50, 75, 90, 95, 99] {
        write!(out, " {:>4.0}", 1e3 * stats.percentile(p))?;
    }
    write!(out, " {:>6.1}", 1e3 * stats.max)
}

/// Dump the non-empty bins of `channel` as `<midpoint ms> <count>` lines.
///
/// A line holding only `:` marks that one or more empty bins were skipped
/// before the next line.
pub fn write_histogram(channel: &MetricChannel, out: &mut dyn Write) -> io::Result<()> {
    let config = channel.config();
    let mut previous: Option<usize> = None;
    for (bin, hits) in channel.occupied_bins() {
        let gap = match previous {
            Some(prev) => bin > prev + 1,
            None => bin > 0,
        };
        if gap {
            writeln!(out, "{:>14}", ':')?;
        }
        writeln!(out, "{:>16.1} {}", 1e3 * config.bin_midpoint(bin), hits)?;
        previous = Some(bin);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HistogramConfig;

    const MS: f64 = 1e-3;

    fn render(stats: &BasicStats, run: &RunTotals, options: ReportOptions) -> String {
        let mut buf = Vec::new();
        BasicReport::new(stats).write(run, &options, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_ratio_guards() {
        assert_eq!(ratio(10.0, 0.0), 0.0);
        assert_eq!(ratio(0.0, 0.0), 0.0);
        assert_eq!(ratio(10.0, -1.0), 0.0);
        assert_eq!(ratio(f64::MAX, f64::MIN_POSITIVE), 0.0);
        assert_eq!(ratio(10.0, 4.0), 2.5);
    }

    #[test]
    fn test_cpu_times_since() {
        let earlier = CpuTimes {
            user: 1.0,
            system: 0.5,
        };
        let later = CpuTimes {
            user: 1.75,
            system: 0.75,
        };
        let used = later.since(&earlier);
        assert_eq!(used.user, 0.75);
        assert_eq!(used.system, 0.25);
        assert_eq!(used.total(), 1.0);
    }

    #[test]
    fn test_cpu_times_capture() {
        let cpu = CpuTimes::capture().unwrap();
        assert!(cpu.user >= 0.0);
        assert!(cpu.system >= 0.0);
    }

    #[test]
    fn test_empty_run_has_no_nan_or_inf() {
        let stats = BasicStats::new(HistogramConfig::default());
        let text = render(&stats, &RunTotals::default(), ReportOptions::default());
        assert!(!text.contains("NaN"), "{}", text);
        assert!(!text.contains("inf"), "{}", text);
        assert!(text.contains("Connection rate: 0.0 conn/s (0.0 ms/conn"));
        assert!(text.contains("Connection life [ms]     0 no data"));
        assert!(text.contains("Transfer time   [ms]     0 no data"));
        assert!(text.contains("Errors: total 0 client-timo 0"));
    }

    #[test]
    fn test_empty_percentile_table_prints_dashes() {
        let stats = BasicStats::new(HistogramConfig::default());
        let mut buf = Vec::new();
        BasicReport::new(&stats)
            .write_percentile_table(&mut buf)
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().filter(|l| l.contains("%  ")).count(), 100);
        assert!(text.contains("    50%      -      -      -      -"));
    }

    #[test]
    fn test_empty_summary_line_is_all_markers() {
        let stats = BasicStats::new(HistogramConfig::default());
        let mut buf = Vec::new();
        BasicReport::new(&stats).write_summary_line(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "  ****** ****** ****** ******   * * *   * * * * *\n"
        );
    }

    #[test]
    fn test_histogram_gap_marker() {
        let mut channel = MetricChannel::new(HistogramConfig::new(MS, 20).unwrap());
        channel.update(0.5 * MS);
        channel.update(1.5 * MS);
        channel.update(5.5 * MS);
        channel.update(5.6 * MS);

        let mut buf = Vec::new();
        write_histogram(&channel, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "             0.5 1\n             1.5 1\n             :\n             5.5 2\n"
        );
    }

    #[test]
    fn test_histogram_gap_before_first_bin() {
        let mut channel = MetricChannel::new(HistogramConfig::new(MS, 20).unwrap());
        channel.update(3.2 * MS);
        let mut buf = Vec::new();
        write_histogram(&channel, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("             :\n"));
    }
}
