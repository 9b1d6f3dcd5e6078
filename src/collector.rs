//! # Statistics Collectors
//!
//! A collector is a plugin the engine drives through four lifecycle hooks
//! (`init`, `start`, `stop`, `dump`) plus event delivery. `BasicCollector` is
//! the standard one: it binds the lifecycle events to the latency channels,
//! the counter block and the reply-rate sampler, and renders the end-of-run
//! report.
//!
//! ## Auxiliary per-object data
//!
//! Some measurements span two events of the same object (connect start →
//! connected, send start → first reply byte, ...). The timestamps live in a
//! side table owned by the collector and keyed by `ConnId`/`CallId`; calls are
//! nested under their connection so that everything a connection left behind
//! is dropped together with it. Reading an entry that was never written means
//! the engine broke the event ordering contract, and the handler panics.

use crate::counters::Counters;
use crate::error::{Result, StatsError};
use crate::events::{CallId, ConnId, Event, EventKind, HandlerTable, ObjectRef, Payload};
use crate::metrics::{HistogramConfig, MetricChannel, ReplyRateSampler};
use crate::report::{BasicReport, ReportOptions, RunTotals};
use std::collections::HashMap;
use std::io::Write;
use tracing::debug;

/// Plugin contract between the event engine and a statistics collector.
pub trait StatCollector {
    fn name(&self) -> &'static str;

    /// Register handlers and prepare aggregate state. Called exactly once.
    fn init(&mut self) -> Result<()>;

    fn start(&mut self) {}

    fn stop(&mut self) {}

    /// Whether `init` registered interest in `kind`.
    fn wants(&self, kind: EventKind) -> bool;

    fn deliver(&mut self, event: &Event);

    /// Write the end-of-run report. Called exactly once, after the last event.
    fn dump(&mut self, run: &RunTotals, out: &mut dyn Write) -> Result<()>;
}

#[derive(Debug, Default)]
struct CallAux {
    send_start: Option<f64>,
    recv_start: Option<f64>,
}

#[derive(Debug, Default)]
struct ConnAux {
    connect_start: Option<f64>,
    completed_calls: u64,
    calls: HashMap<CallId, CallAux>,
}

/// Aggregate state of the basic collector.
#[derive(Debug)]
pub struct BasicStats {
    lifetime: MetricChannel,
    connect: MetricChannel,
    response: MetricChannel,
    transfer: MetricChannel,
    counters: Counters,
    reply_rate: ReplyRateSampler,
    conns: HashMap<ConnId, ConnAux>,
}

impl BasicStats {
    pub fn new(config: HistogramConfig) -> Self {
        Self {
            lifetime: MetricChannel::new(config),
            connect: MetricChannel::new(config),
            response: MetricChannel::new(config),
            transfer: MetricChannel::new(config),
            counters: Counters::new(),
            reply_rate: ReplyRateSampler::new(),
            conns: HashMap::new(),
        }
    }

    /// Connection lifetime, from connect start to destruction, for
    /// connections that completed at least one call.
    pub fn lifetime(&self) -> &MetricChannel {
        &self.lifetime
    }

    /// Handshake (connect) time.
    pub fn connect(&self) -> &MetricChannel {
        &self.connect
    }

    /// Time from the start of sending a request to the first reply byte.
    pub fn response(&self) -> &MetricChannel {
        &self.response
    }

    /// Time from the first to the last reply byte.
    pub fn transfer(&self) -> &MetricChannel {
        &self.transfer
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn reply_rate(&self) -> &ReplyRateSampler {
        &self.reply_rate
    }

    /// Connections with live side-table entries.
    pub fn tracked_conns(&self) -> usize {
        self.conns.len()
    }

    fn conn_aux(&mut self, conn: ConnId, kind: EventKind) -> &mut ConnAux {
        match self.conns.get_mut(&conn) {
            Some(aux) => aux,
            None => panic!("{} for unknown connection {:?}", kind, conn),
        }
    }

    fn connect_start(&mut self, conn: ConnId, kind: EventKind) -> f64 {
        match self.conn_aux(conn, kind).connect_start {
            Some(t) => t,
            None => panic!(
                "{} on connection {:?} before its connect start was recorded",
                kind, conn
            ),
        }
    }

    fn call_aux(&mut self, conn: ConnId, call: CallId, kind: EventKind) -> &mut CallAux {
        match self.conn_aux(conn, kind).calls.get_mut(&call) {
            Some(aux) => aux,
            None => panic!("{} for unknown call {:?} on {:?}", kind, call, conn),
        }
    }
}

fn conn_of(event: &Event) -> ConnId {
    match event.object {
        ObjectRef::Conn(conn) => conn,
        other => panic!("{} delivered for {:?}, expected a connection", event.kind, other),
    }
}

fn call_of(event: &Event) -> (ConnId, CallId) {
    match event.object {
        ObjectRef::Call { conn, call } => (conn, call),
        other => panic!("{} delivered for {:?}, expected a call", event.kind, other),
    }
}

fn bad_payload(event: &Event) -> ! {
    panic!("{} delivered with payload {:?}", event.kind, event.payload)
}

fn conn_created(stats: &mut BasicStats, event: &Event) {
    let conn = conn_of(event);
    stats.counters.conn_created();
    let previous = stats.conns.insert(conn, ConnAux::default());
    assert!(previous.is_none(), "connection {:?} created twice", conn);
}

fn conn_connecting(stats: &mut BasicStats, event: &Event) {
    let conn = conn_of(event);
    stats.conn_aux(conn, event.kind).connect_start = Some(event.now);
    stats.counters.conn_issued();
}

fn conn_connected(stats: &mut BasicStats, event: &Event) {
    let conn = conn_of(event);
    let start = stats.connect_start(conn, event.kind);
    stats.connect.update(event.now - start);
}

fn conn_destroyed(stats: &mut BasicStats, event: &Event) {
    let conn = conn_of(event);
    let aux = match stats.conns.remove(&conn) {
        Some(aux) => aux,
        None => panic!("{} for unknown connection {:?}", event.kind, conn),
    };
    if aux.completed_calls > 0 {
        let start = match aux.connect_start {
            Some(t) => t,
            None => panic!(
                "connection {:?} completed calls without a connect start",
                conn
            ),
        };
        stats.lifetime.update(event.now - start);
    }
    stats.counters.conn_destroyed();
}

fn conn_failed(stats: &mut BasicStats, event: &Event) {
    let Payload::ErrorCode(code) = event.payload else {
        bad_payload(event)
    };
    stats.counters.conn_failed(code);
}

fn conn_timeout(stats: &mut BasicStats, _event: &Event) {
    stats.counters.client_timeout();
}

fn send_start(stats: &mut BasicStats, event: &Event) {
    let (conn, call) = call_of(event);
    stats
        .conn_aux(conn, event.kind)
        .calls
        .entry(call)
        .or_default()
        .send_start = Some(event.now);
}

fn send_stop(stats: &mut BasicStats, event: &Event) {
    let Payload::RequestBytes(bytes) = event.payload else {
        bad_payload(event)
    };
    stats.counters.request_sent(bytes);
}

fn recv_start(stats: &mut BasicStats, event: &Event) {
    let (conn, call) = call_of(event);
    let aux = stats.call_aux(conn, call, event.kind);
    let Some(sent) = aux.send_start else {
        panic!("{} for call {:?} before its send start", event.kind, call)
    };
    aux.recv_start = Some(event.now);
    stats.response.update(event.now - sent);
}

fn recv_stop(stats: &mut BasicStats, event: &Event) {
    let (conn, call) = call_of(event);
    let Payload::Reply(reply) = event.payload else {
        bad_payload(event)
    };
    let Some(received) = stats.call_aux(conn, call, event.kind).recv_start else {
        panic!("{} for call {:?} before its receive start", event.kind, call)
    };
    stats.transfer.update(event.now - received);
    stats.counters.reply_received(reply.status, reply.bytes);
    stats.reply_rate.record_reply();

    let aux = stats.conn_aux(conn, event.kind);
    aux.completed_calls += 1;
    aux.calls.remove(&call);
}

fn perf_sample(stats: &mut BasicStats, event: &Event) {
    let Payload::SampleWeight(weight) = event.payload else {
        bad_payload(event)
    };
    let rate = stats.reply_rate.sample(weight);
    debug!("reply-rate = {:<8.1}", rate);
}

/// The standard collector: latency channels, counters and reply rate.
#[derive(Debug)]
pub struct BasicCollector {
    stats: BasicStats,
    handlers: HandlerTable<BasicStats>,
    options: ReportOptions,
    dumped: bool,
}

impl BasicCollector {
    pub fn new(config: HistogramConfig, options: ReportOptions) -> Self {
        Self {
            stats: BasicStats::new(config),
            handlers: HandlerTable::new(),
            options,
            dumped: false,
        }
    }

    pub fn stats(&self) -> &BasicStats {
        &self.stats
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }
}

impl StatCollector for BasicCollector {
    fn name(&self) -> &'static str {
        "Basic statistics"
    }

    fn init(&mut self) -> Result<()> {
        if !self.handlers.is_empty() {
            return Err(StatsError::AlreadyInitialized(self.name()));
        }

        let config = *self.stats.lifetime.config();
        self.stats = BasicStats::new(config);

        let table = &mut self.handlers;
        table.register(EventKind::PerformanceSample, perf_sample);
        table.register(EventKind::ConnectionFailed, conn_failed);
        table.register(EventKind::ConnectionTimeout, conn_timeout);
        table.register(EventKind::ConnectionCreated, conn_created);
        table.register(EventKind::ConnectionConnecting, conn_connecting);
        table.register(EventKind::ConnectionConnected, conn_connected);
        table.register(EventKind::ConnectionDestroyed, conn_destroyed);
        table.register(EventKind::CallSendStart, send_start);
        table.register(EventKind::CallSendStop, send_stop);
        table.register(EventKind::CallRecvStart, recv_start);
        table.register(EventKind::CallRecvStop, recv_stop);

        debug!(collector = self.name(), handlers = ?self.handlers, "registered");
        Ok(())
    }

    fn wants(&self, kind: EventKind) -> bool {
        self.handlers.is_registered(kind)
    }

    fn deliver(&mut self, event: &Event) {
        self.handlers.dispatch(&mut self.stats, event);
    }

    fn dump(&mut self, run: &RunTotals, out: &mut dyn Write) -> Result<()> {
        assert!(!self.dumped, "{} dumped twice", self.name());
        self.dumped = true;

        BasicReport::new(&self.stats)
            .write(run, &self.options, out)
            .map_err(StatsError::io("writing the basic statistics report"))
    }
}
