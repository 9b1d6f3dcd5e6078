//! # Event Engine
//!
//! Owns the registered collectors and drives them through the run lifecycle:
//!
//! ```text
//! Created --init()--> Ready --start()--> Running --stop()--> Stopped --dump()--> Reported
//! ```
//!
//! While running, `deliver` stamps each event with the engine clock and hands
//! it to every collector that registered interest in its kind, in the order
//! the collectors were added. Test start and stop times, and the CPU time
//! consumed in between, are measured here and passed to the collectors when
//! they dump their reports.

use crate::collector::StatCollector;
use crate::error::Result;
use crate::events::{Clock, Event, EventKind, ObjectRef, Payload};
use crate::report::{CpuTimes, RunTotals};
use std::io::Write;
use tracing::{debug, info};

/// Lifecycle phase of an `EventEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Ready,
    Running,
    Stopped,
    Reported,
}

/// Synchronous, single-threaded event dispatcher.
pub struct EventEngine<C: Clock> {
    clock: C,
    collectors: Vec<Box<dyn StatCollector>>,
    /// Indices into `collectors`, per event kind.
    interest: [Vec<usize>; EventKind::COUNT],
    phase: Phase,
    started_at: f64,
    stopped_at: f64,
    cpu_at_start: CpuTimes,
    cpu_at_stop: CpuTimes,
    delivered: u64,
}

impl<C: Clock> EventEngine<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            collectors: Vec::new(),
            interest: Default::default(),
            phase: Phase::Created,
            started_at: 0.0,
            stopped_at: 0.0,
            cpu_at_start: CpuTimes::default(),
            cpu_at_stop: CpuTimes::default(),
            delivered: 0,
        }
    }

    /// Register a collector. Only possible before `init`.
    pub fn add_collector(&mut self, collector: Box<dyn StatCollector>) {
        self.expect_phase(Phase::Created, "add a collector");
        self.collectors.push(collector);
    }

    /// Initialize every collector and record which kinds each one wants.
    pub fn init(&mut self) -> Result<()> {
        self.expect_phase(Phase::Created, "initialize");
        for (index, collector) in self.collectors.iter_mut().enumerate() {
            collector.init()?;
            for kind in EventKind::ALL {
                if collector.wants(kind) {
                    self.interest[kind.index()].push(index);
                }
            }
            debug!(collector = collector.name(), "initialized");
        }
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Mark the test start: snapshot the clock and CPU usage, then start the
    /// collectors.
    pub fn start(&mut self) -> Result<()> {
        self.expect_phase(Phase::Ready, "start");
        self.cpu_at_start = CpuTimes::capture()?;
        self.started_at = self.clock.now();
        for collector in &mut self.collectors {
            collector.start();
        }
        self.phase = Phase::Running;
        info!(collectors = self.collectors.len(), "run started");
        Ok(())
    }

    /// Deliver one event, stamped with the current clock reading.
    ///
    /// # Panics
    ///
    /// If the engine is not running.
    pub fn deliver(&mut self, kind: EventKind, object: ObjectRef, payload: Payload) {
        self.expect_phase(Phase::Running, "deliver events");
        let event = Event {
            kind,
            object,
            payload,
            now: self.clock.now(),
        };
        for &index in &self.interest[kind.index()] {
            self.collectors[index].deliver(&event);
        }
        self.delivered += 1;
    }

    /// Mark the test stop and stop the collectors.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_phase(Phase::Running, "stop");
        self.stopped_at = self.clock.now();
        self.cpu_at_stop = CpuTimes::capture()?;
        for collector in &mut self.collectors {
            collector.stop();
        }
        self.phase = Phase::Stopped;
        info!(
            events = self.delivered,
            duration = self.stopped_at - self.started_at,
            "run stopped"
        );
        Ok(())
    }

    /// Have every collector write its report to `out`, in registration order.
    pub fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        self.expect_phase(Phase::Stopped, "dump");
        let run = self.run_totals();
        for collector in &mut self.collectors {
            collector.dump(&run, out)?;
        }
        self.phase = Phase::Reported;
        Ok(())
    }

    /// Duration and CPU usage of the run, valid once it has stopped.
    pub fn run_totals(&self) -> RunTotals {
        RunTotals {
            duration: (self.stopped_at - self.started_at).max(0.0),
            cpu: self.cpu_at_stop.since(&self.cpu_at_start),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Events delivered since `start`.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    fn expect_phase(&self, expected: Phase, action: &str) {
        assert!(
            self.phase == expected,
            "cannot {} while the engine is {:?} (expected {:?})",
            action,
            self.phase,
            expected
        );
    }
}
