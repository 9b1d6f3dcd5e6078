//! # Synthetic Workload
//!
//! Produces a deterministic, fully timestamped run without opening any
//! socket, so the statistics pipeline can be exercised end to end from the
//! command line and from tests.
//!
//! Connections are opened at a fixed rate in virtual time. Each one then
//! either fails with a socket error, times out waiting for its first reply, or
//! connects and performs `num_calls` sequential calls. Connect, response and
//! transfer delays are exponentially distributed around configurable means.
//! Every event is generated up front, ordered by timestamp and then delivered
//! through the engine while its `ManualClock` follows along.

use crate::counters::ReplyBytes;
use crate::defaults;
use crate::engine::EventEngine;
use crate::error::{Result, StatsError};
use crate::events::{Clock, EventKind, ManualClock, ObjectRef, Payload, ReplyInfo};
use nix::errno::Errno;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Socket errors handed out to failing connections, in turn.
const FAILURE_CODES: [Errno; 6] = [
    Errno::ECONNREFUSED,
    Errno::ECONNRESET,
    Errno::ETIMEDOUT,
    Errno::EMFILE,
    Errno::EADDRNOTAVAIL,
    Errno::EHOSTUNREACH,
];

/// Cumulative probability and status code of each reply kind.
const STATUS_MIX: [(f64, u16); 4] = [(0.90, 200), (0.95, 304), (0.99, 404), (1.0, 503)];

/// Shape of a synthetic run. All durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    pub num_conns: u64,
    pub num_calls: u64,
    /// New connections per second.
    pub rate: f64,
    pub seed: u64,
    /// Fraction of connections that fail with a socket error.
    pub failure_ratio: f64,
    /// Fraction of connections that hit the client timeout.
    pub timeout_ratio: f64,
    /// Client timeout applied while waiting for a reply.
    pub timeout: f64,
    pub sample_interval: f64,
    pub mean_connect: f64,
    pub mean_response: f64,
    pub mean_transfer: f64,
    pub request_bytes: u64,
    pub reply_bytes: ReplyBytes,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_conns: defaults::NUM_CONNS,
            num_calls: defaults::NUM_CALLS,
            rate: defaults::RATE,
            seed: defaults::SEED,
            failure_ratio: 0.0,
            timeout_ratio: 0.0,
            timeout: defaults::CLIENT_TIMEOUT_SECS,
            sample_interval: defaults::SAMPLE_INTERVAL_SECS,
            mean_connect: 0.001,
            mean_response: 0.010,
            mean_transfer: 0.002,
            request_bytes: 80,
            reply_bytes: ReplyBytes {
                header: 240,
                content: 4096,
                footer: 0,
            },
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_calls == 0 {
            return Err(StatsError::invalid("num_calls", "must be at least 1"));
        }
        positive("rate", self.rate)?;
        positive("timeout", self.timeout)?;
        positive("sample_interval", self.sample_interval)?;
        for (field, mean) in [
            ("mean_connect", self.mean_connect),
            ("mean_response", self.mean_response),
            ("mean_transfer", self.mean_transfer),
        ] {
            if !(mean.is_finite() && mean >= 0.0) {
                return Err(StatsError::invalid(
                    field,
                    format!("must be a non-negative number of seconds, got {}", mean),
                ));
            }
        }
        for (field, ratio) in [
            ("failure_ratio", self.failure_ratio),
            ("timeout_ratio", self.timeout_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(StatsError::invalid(
                    field,
                    format!("must be within [0, 1], got {}", ratio),
                ));
            }
        }
        if self.failure_ratio + self.timeout_ratio > 1.0 {
            return Err(StatsError::invalid(
                "timeout_ratio",
                "failure and timeout ratios together must not exceed 1",
            ));
        }
        self.check_event_budget()
    }

    /// Every event is held in memory before the replay starts, so refuse
    /// runs that would schedule more than `MAX_SIMULATED_EVENTS`.
    fn check_event_budget(&self) -> Result<()> {
        let limit = defaults::MAX_SIMULATED_EVENTS;
        // A successful connection is the longest path: created, connecting,
        // connected, four events per call, destroyed.
        let per_conn = self.num_calls.checked_mul(4).and_then(|n| n.checked_add(4));
        let conn_events = per_conn.and_then(|n| n.checked_mul(self.num_conns));
        let conn_events = match conn_events {
            Some(n) if n <= limit => n,
            _ => {
                return Err(StatsError::invalid(
                    "num_conns",
                    format!(
                        "{} connections of {} calls exceed {} scheduled events",
                        self.num_conns, self.num_calls, limit
                    ),
                ))
            }
        };

        let span = self.num_conns as f64 / self.rate
            + self.timeout
            + self.mean_connect
            + self.num_calls as f64 * (self.mean_response + self.mean_transfer);
        let samples = span / self.sample_interval;
        if !(samples.is_finite() && samples <= (limit - conn_events) as f64) {
            return Err(StatsError::invalid(
                "sample_interval",
                format!(
                    "sampling a {:.0} s run every {} s exceeds {} scheduled events",
                    span, self.sample_interval, limit
                ),
            ));
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(StatsError::invalid(
            field,
            format!("must be a positive number, got {}", value),
        ))
    }
}

/// What a synthetic run did, independent of what the collectors measured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationSummary {
    pub connections: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub calls_completed: u64,
    pub samples: u64,
    pub events: u64,
    /// Virtual seconds from start to the last event.
    pub duration: f64,
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    at: f64,
    kind: EventKind,
    object: ObjectRef,
    payload: Payload,
}

struct Generator<'a> {
    config: &'a WorkloadConfig,
    rng: StdRng,
    events: Vec<Scheduled>,
    summary: SimulationSummary,
}

impl<'a> Generator<'a> {
    fn new(config: &'a WorkloadConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
            events: Vec::new(),
            summary: SimulationSummary::default(),
        }
    }

    fn push(&mut self, at: f64, kind: EventKind, object: ObjectRef, payload: Payload) {
        self.events.push(Scheduled {
            at,
            kind,
            object,
            payload,
        });
    }

    fn exponential(&mut self, mean: f64) -> f64 {
        let u: f64 = self.rng.gen();
        -mean * (1.0 - u).ln()
    }

    fn status(&mut self) -> u16 {
        let u: f64 = self.rng.gen();
        STATUS_MIX
            .iter()
            .find(|&&(cumulative, _)| u < cumulative)
            .map_or(STATUS_MIX[STATUS_MIX.len() - 1].1, |&(_, status)| status)
    }

    /// Schedule one connection opened at `start`. Returns when it is gone.
    fn connection(&mut self, id: u64, start: f64) -> f64 {
        let conn = ObjectRef::conn(id);
        self.push(start, EventKind::ConnectionCreated, conn, Payload::Empty);
        self.push(start, EventKind::ConnectionConnecting, conn, Payload::Empty);
        self.summary.connections += 1;

        let outcome: f64 = self.rng.gen();
        let connect_delay = self.exponential(self.config.mean_connect);
        let mut now = start + connect_delay;

        if outcome < self.config.failure_ratio {
            let code = FAILURE_CODES[(self.summary.failed % FAILURE_CODES.len() as u64) as usize];
            self.summary.failed += 1;
            self.push(now, EventKind::ConnectionFailed, conn, Payload::ErrorCode(code as i32));
            self.push(now, EventKind::ConnectionDestroyed, conn, Payload::Empty);
            return now;
        }

        self.push(now, EventKind::ConnectionConnected, conn, Payload::Empty);

        if outcome < self.config.failure_ratio + self.config.timeout_ratio {
            let call = ObjectRef::call(id, 0);
            self.push(now, EventKind::CallSendStart, call, Payload::Empty);
            self.push(
                now,
                EventKind::CallSendStop,
                call,
                Payload::RequestBytes(self.config.request_bytes),
            );
            now += self.config.timeout;
            self.summary.timed_out += 1;
            self.push(now, EventKind::ConnectionTimeout, conn, Payload::Empty);
            self.push(now, EventKind::ConnectionDestroyed, conn, Payload::Empty);
            return now;
        }

        for call_id in 0..self.config.num_calls {
            let call = ObjectRef::call(id, call_id);
            self.push(now, EventKind::CallSendStart, call, Payload::Empty);
            self.push(
                now,
                EventKind::CallSendStop,
                call,
                Payload::RequestBytes(self.config.request_bytes),
            );
            now += self.exponential(self.config.mean_response);
            self.push(now, EventKind::CallRecvStart, call, Payload::Empty);
            now += self.exponential(self.config.mean_transfer);
            let reply = ReplyInfo {
                status: self.status(),
                bytes: self.config.reply_bytes,
            };
            self.push(now, EventKind::CallRecvStop, call, Payload::Reply(reply));
            self.summary.calls_completed += 1;
        }
        self.push(now, EventKind::ConnectionDestroyed, conn, Payload::Empty);
        now
    }

    fn generate(mut self) -> (Vec<Scheduled>, SimulationSummary) {
        let mut end: f64 = 0.0;
        for id in 0..self.config.num_conns {
            let start = id as f64 / self.config.rate;
            end = end.max(self.connection(id, start));
        }

        let interval = self.config.sample_interval;
        let mut tick = 1;
        while tick as f64 * interval <= end {
            self.push(
                tick as f64 * interval,
                EventKind::PerformanceSample,
                ObjectRef::None,
                Payload::SampleWeight(1.0 / interval),
            );
            tick += 1;
        }
        self.summary.samples = tick - 1;
        self.summary.duration = end;

        // Stable: events sharing a timestamp keep their causal order.
        self.events.sort_by(|a, b| a.at.total_cmp(&b.at));
        self.summary.events = self.events.len() as u64;
        (self.events, self.summary)
    }
}

/// Run `config` through `engine`, from `start` to `stop`.
///
/// The engine must be initialized and not yet started; event times are
/// offsets from the clock reading at the time of the call.
pub fn run(engine: &mut EventEngine<ManualClock>, config: &WorkloadConfig) -> Result<SimulationSummary> {
    config.validate()?;
    let (events, summary) = Generator::new(config).generate();
    debug!(events = events.len(), "workload generated");

    let origin = engine.clock().now();
    engine.start()?;
    for event in &events {
        engine.clock_mut().set(origin + event.at);
        engine.deliver(event.kind, event.object, event.payload);
    }
    engine.clock_mut().set(origin + summary.duration);
    engine.stop()?;

    info!(
        connections = summary.connections,
        failed = summary.failed,
        timed_out = summary.timed_out,
        calls = summary.calls_completed,
        "workload finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(config: &WorkloadConfig) -> (Vec<Scheduled>, SimulationSummary) {
        Generator::new(config).generate()
    }

    #[test]
    fn test_default_config_is_valid() {
        WorkloadConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_ratios() {
        let config = WorkloadConfig {
            failure_ratio: 0.7,
            timeout_ratio: 0.5,
            ..WorkloadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StatsError::InvalidConfig { field: "timeout_ratio", .. })
        ));

        let config = WorkloadConfig {
            failure_ratio: -0.1,
            ..WorkloadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_rate_and_interval() {
        for config in [
            WorkloadConfig {
                rate: 0.0,
                ..WorkloadConfig::default()
            },
            WorkloadConfig {
                sample_interval: f64::NAN,
                ..WorkloadConfig::default()
            },
            WorkloadConfig {
                num_calls: 0,
                ..WorkloadConfig::default()
            },
        ] {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_rejects_runs_beyond_event_budget() {
        let config = WorkloadConfig {
            num_conns: defaults::MAX_SIMULATED_EVENTS,
            ..WorkloadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StatsError::InvalidConfig {
                field: "num_conns",
                ..
            })
        ));

        let config = WorkloadConfig {
            num_conns: 1,
            num_calls: u64::MAX,
            ..WorkloadConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkloadConfig {
            sample_interval: 1e-9,
            ..WorkloadConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StatsError::InvalidConfig {
                field: "sample_interval",
                ..
            })
        ));
    }

    #[test]
    fn test_same_seed_same_events() {
        let config = WorkloadConfig {
            num_conns: 50,
            failure_ratio: 0.2,
            timeout_ratio: 0.1,
            ..WorkloadConfig::default()
        };
        let (a, sa) = generate(&config);
        let (b, sb) = generate(&config);
        assert_eq!(sa, sb);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.at, y.at);
            assert_eq!(x.kind, y.kind);
            assert_eq!(x.object, y.object);
        }
    }

    #[test]
    fn test_events_are_time_ordered() {
        let config = WorkloadConfig {
            num_conns: 200,
            num_calls: 3,
            rate: 1000.0,
            sample_interval: 0.05,
            ..WorkloadConfig::default()
        };
        let (events, summary) = generate(&config);
        assert!(events.windows(2).all(|w| w[0].at <= w[1].at));
        assert_eq!(summary.calls_completed, 600);
        assert!(summary.samples > 0);
    }

    #[test]
    fn test_all_failing_connections() {
        let config = WorkloadConfig {
            num_conns: 12,
            failure_ratio: 1.0,
            ..WorkloadConfig::default()
        };
        let (events, summary) = generate(&config);
        assert_eq!(summary.failed, 12);
        assert_eq!(summary.calls_completed, 0);
        let codes: Vec<i32> = events
            .iter()
            .filter_map(|e| match e.payload {
                Payload::ErrorCode(code) => Some(code),
                _ => None,
            })
            .collect();
        assert_eq!(codes.len(), 12);
        assert_eq!(codes[0], Errno::ECONNREFUSED as i32);
        assert_eq!(codes[6], Errno::ECONNREFUSED as i32);
    }

    #[test]
    fn test_run_drives_engine_to_stopped() {
        let mut engine = EventEngine::new(ManualClock::new());
        engine.init().unwrap();
        let config = WorkloadConfig {
            num_conns: 5,
            ..WorkloadConfig::default()
        };
        let summary = run(&mut engine, &config).unwrap();
        assert_eq!(engine.phase(), crate::engine::Phase::Stopped);
        assert_eq!(engine.delivered(), summary.events);
        assert_eq!(engine.run_totals().duration, summary.duration);
    }
}
