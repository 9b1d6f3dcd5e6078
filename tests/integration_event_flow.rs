use http_load_stats::counters::ReplyBytes;
use http_load_stats::events::{Event, ReplyInfo};
use http_load_stats::report::ReportOptions;
use http_load_stats::{
    BasicCollector, EventEngine, EventKind, FailureCause, HistogramConfig, ManualClock, ObjectRef,
    Payload, StatCollector,
};

const MS: f64 = 1e-3;

fn deliver(collector: &mut BasicCollector, kind: EventKind, object: ObjectRef, payload: Payload, now: f64) {
    collector.deliver(&Event {
        kind,
        object,
        payload,
        now,
    });
}

fn reply(status: u16) -> Payload {
    Payload::Reply(ReplyInfo {
        status,
        bytes: ReplyBytes {
            header: 200,
            content: 1000,
            footer: 0,
        },
    })
}

/// Handshake times of 10, 20, 20 and 30 ms resolve to the expected bin midpoints.
#[test]
fn connect_time_distribution() {
    let mut collector = BasicCollector::new(HistogramConfig::default(), ReportOptions::default());
    collector.init().unwrap();

    for (id, connect_ms) in [10.0, 20.0, 20.0, 30.0].into_iter().enumerate() {
        let conn = ObjectRef::conn(id as u64);
        deliver(&mut collector, EventKind::ConnectionCreated, conn, Payload::Empty, 0.0);
        deliver(&mut collector, EventKind::ConnectionConnecting, conn, Payload::Empty, 0.0);
        deliver(&mut collector, EventKind::ConnectionConnected, conn, Payload::Empty, connect_ms * MS);
    }

    let stats = collector.stats().connect().finalize();
    assert_eq!(stats.count, 4);
    assert!((stats.avg - 20.0 * MS).abs() < 1e-9);
    assert!((stats.min - 10.0 * MS).abs() < 1e-9);
    assert!((stats.max - 30.0 * MS).abs() < 1e-9);
    assert!((stats.percentile(50) - 20.5 * MS).abs() < 1e-9);
    assert!((stats.percentile(100) - 30.5 * MS).abs() < 1e-9);
    assert_eq!(collector.stats().counters().max_conns(), 4);
}

/// Every lifecycle stage of a keep-alive connection feeds its own channel.
#[test]
fn keep_alive_connection_feeds_every_channel() {
    let mut collector = BasicCollector::new(HistogramConfig::default(), ReportOptions::default());
    collector.init().unwrap();

    let conn = ObjectRef::conn(42);
    deliver(&mut collector, EventKind::ConnectionCreated, conn, Payload::Empty, 0.0);
    deliver(&mut collector, EventKind::ConnectionConnecting, conn, Payload::Empty, 0.0);
    deliver(&mut collector, EventKind::ConnectionConnected, conn, Payload::Empty, 1.0 * MS);

    let mut now = 1.0 * MS;
    for (call, status) in [(1, 200), (2, 304), (3, 500)] {
        let object = ObjectRef::call(42, call);
        deliver(&mut collector, EventKind::CallSendStart, object, Payload::Empty, now);
        deliver(&mut collector, EventKind::CallSendStop, object, Payload::RequestBytes(100), now);
        now += 4.0 * MS;
        deliver(&mut collector, EventKind::CallRecvStart, object, Payload::Empty, now);
        now += 2.0 * MS;
        deliver(&mut collector, EventKind::CallRecvStop, object, reply(status), now);
    }
    deliver(&mut collector, EventKind::ConnectionDestroyed, conn, Payload::Empty, now);

    let stats = collector.stats();
    assert_eq!(stats.connect().count(), 1);
    assert_eq!(stats.response().count(), 3);
    assert_eq!(stats.transfer().count(), 3);
    assert_eq!(stats.lifetime().count(), 1);
    assert!((stats.lifetime().moments().sum() - 19.0 * MS).abs() < 1e-9);

    let counters = stats.counters();
    assert_eq!(counters.requests_sent(), 3);
    assert_eq!(counters.req_bytes_sent(), 300);
    assert_eq!(counters.replies(2), 1);
    assert_eq!(counters.replies(3), 1);
    assert_eq!(counters.replies(5), 1);
    assert_eq!(counters.received_bytes().content, 3000);
    assert_eq!(stats.tracked_conns(), 0);
}

/// A refused connection bumps only the refused bucket and no latency channel.
#[test]
fn refused_connection_is_classified() {
    let mut collector = BasicCollector::new(HistogramConfig::default(), ReportOptions::default());
    collector.init().unwrap();

    let conn = ObjectRef::conn(1);
    deliver(&mut collector, EventKind::ConnectionCreated, conn, Payload::Empty, 0.0);
    deliver(&mut collector, EventKind::ConnectionConnecting, conn, Payload::Empty, 0.0);
    deliver(
        &mut collector,
        EventKind::ConnectionFailed,
        conn,
        Payload::ErrorCode(nix::errno::Errno::ECONNREFUSED as i32),
        0.5 * MS,
    );
    deliver(&mut collector, EventKind::ConnectionDestroyed, conn, Payload::Empty, 0.5 * MS);

    let stats = collector.stats();
    assert_eq!(stats.counters().failures(FailureCause::ConnectionRefused), 1);
    assert_eq!(stats.counters().total_errors(), 1);
    assert_eq!(stats.connect().count(), 0);
    assert_eq!(stats.lifetime().count(), 0);
}

/// The engine stamps events with its clock and reports the elapsed run time.
#[test]
fn engine_reports_virtual_duration() {
    let mut engine = EventEngine::new(ManualClock::new());
    engine.add_collector(Box::new(BasicCollector::new(
        HistogramConfig::default(),
        ReportOptions::default(),
    )));
    engine.init().unwrap();
    engine.start().unwrap();

    let conn = ObjectRef::conn(1);
    engine.deliver(EventKind::ConnectionCreated, conn, Payload::Empty);
    engine.deliver(EventKind::ConnectionConnecting, conn, Payload::Empty);
    engine.clock_mut().advance(3.0 * MS);
    engine.deliver(EventKind::ConnectionConnected, conn, Payload::Empty);
    engine.clock_mut().advance(2.0);
    engine.deliver(
        EventKind::PerformanceSample,
        ObjectRef::None,
        Payload::SampleWeight(0.5),
    );
    engine.deliver(EventKind::ConnectionDestroyed, conn, Payload::Empty);
    engine.stop().unwrap();

    let mut out = Vec::new();
    engine.dump(&mut out).unwrap();
    let report = String::from_utf8(out).unwrap();

    assert!(report.contains("test-duration 2.003 s"), "{}", report);
    assert!(report.contains("Handshake time  [ms]     1    3.0"), "{}", report);
    assert!(report.contains("(1 samples)"), "{}", report);
}

/// Starting and stopping at the same instant still yields a finite report.
#[test]
fn zero_duration_run_prints_no_nan() {
    let mut engine = EventEngine::new(ManualClock::new());
    engine.add_collector(Box::new(BasicCollector::new(
        HistogramConfig::default(),
        ReportOptions {
            percentiles: true,
            summary: false,
            verbosity: 2,
        },
    )));
    engine.init().unwrap();
    engine.start().unwrap();
    engine.stop().unwrap();

    let mut out = Vec::new();
    engine.dump(&mut out).unwrap();
    let report = String::from_utf8(out).unwrap();

    assert!(!report.contains("NaN"), "{}", report);
    assert!(!report.contains("inf"), "{}", report);
    assert!(report.contains("Histogram - transfer time (ms):"));
    assert!(report.contains("Request rate: 0.0 req/s (0.0 ms/req)"));
}
