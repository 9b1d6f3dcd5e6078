//! # Lifecycle Event Contract
//!
//! Types shared between the event-dispatch side (whatever drives connections
//! and calls) and the statistics collectors:
//!
//! - `EventKind`: the closed set of lifecycle events a collector may register for
//! - `ObjectRef`: stable handle of the connection or call an event refers to
//! - `Payload`: the per-event argument (error code, sample weight, byte counts)
//! - `Event`: one delivery, stamped with the engine's monotonic time
//! - `HandlerTable`: the kind → handler registrations of one collector
//! - `Clock`: the timer query available while a handler runs
//!
//! Delivery is synchronous, in order and single-threaded; handlers never see
//! two events at once.

use crate::counters::ReplyBytes;
use std::fmt;
use std::time::Instant;

/// Stable identifier of a connection for the duration of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// Identifier of a call, unique within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

/// The object an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    /// Events that are about the run as a whole (performance samples).
    None,
    Conn(ConnId),
    /// A call always travels with the connection that owns it.
    Call { conn: ConnId, call: CallId },
}

impl ObjectRef {
    pub fn call(conn: u64, call: u64) -> Self {
        ObjectRef::Call {
            conn: ConnId(conn),
            call: CallId(call),
        }
    }

    pub fn conn(conn: u64) -> Self {
        ObjectRef::Conn(ConnId(conn))
    }
}

/// Lifecycle events observable by collectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionCreated,
    ConnectionConnecting,
    ConnectionConnected,
    ConnectionDestroyed,
    ConnectionFailed,
    ConnectionTimeout,
    CallSendStart,
    CallSendStop,
    CallRecvStart,
    CallRecvStop,
    PerformanceSample,
}

impl EventKind {
    pub const COUNT: usize = 11;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::ConnectionCreated,
        EventKind::ConnectionConnecting,
        EventKind::ConnectionConnected,
        EventKind::ConnectionDestroyed,
        EventKind::ConnectionFailed,
        EventKind::ConnectionTimeout,
        EventKind::CallSendStart,
        EventKind::CallSendStop,
        EventKind::CallRecvStart,
        EventKind::CallRecvStop,
        EventKind::PerformanceSample,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the engine knows about a reply once it has been fully received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyInfo {
    pub status: u16,
    pub bytes: ReplyBytes,
}

/// Per-event argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    Empty,
    /// Raw `errno` of a failed connection.
    ErrorCode(i32),
    /// Inverse of the elapsed sampling interval, in 1/s.
    SampleWeight(f64),
    /// Size of the request that was just written.
    RequestBytes(u64),
    Reply(ReplyInfo),
}

/// One event delivery.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub object: ObjectRef,
    pub payload: Payload,
    /// Engine time at delivery, in seconds.
    pub now: f64,
}

/// A registered event handler operating on a collector's state.
pub type Handler<S> = fn(&mut S, &Event);

/// Per-kind handler registrations of one collector.
///
/// Filled once during `init` and only read afterwards.
pub struct HandlerTable<S> {
    slots: [Vec<Handler<S>>; EventKind::COUNT],
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
        }
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler<S>) {
        self.slots[kind.index()].push(handler);
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        !self.slots[kind.index()].is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }

    /// Kinds with at least one handler, in declaration order.
    pub fn registered_kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        EventKind::ALL
            .into_iter()
            .filter(move |&kind| self.is_registered(kind))
    }

    /// Run every handler registered for `event.kind`, in registration order.
    pub fn dispatch(&self, state: &mut S, event: &Event) {
        for handler in &self.slots[event.kind.index()] {
            handler(state, event);
        }
    }
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.registered_kinds()).finish()
    }
}

/// Monotonic timer in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall-clock monotonic timer anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced timer for simulated runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualClock {
    now: f64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, now: f64) {
        assert!(
            now >= self.now,
            "manual clock moved backwards from {} to {}",
            self.now,
            now
        );
        self.now = now;
    }

    pub fn advance(&mut self, secs: f64) {
        self.set(self.now + secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now
    }
}
