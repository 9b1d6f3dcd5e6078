//! Monotonic run counters and failure classification.
//!
//! Every lifecycle handler bumps one counter or a small fixed group of them.
//! Nothing here is ever reset during a run.

use nix::errno::Errno;
use std::fmt;
use tracing::{debug, warn};

/// Low-level reason a connection attempt or an established connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCause {
    /// Process ran out of file descriptors.
    FdUnavailable,
    /// System-wide file table is full.
    FileTableFull,
    ConnectionRefused,
    /// Socket-level timeout reported by the kernel.
    SocketTimeout,
    /// Peer reset the connection or the pipe broke.
    ConnectionReset,
    /// No local address/port left to bind.
    AddressUnavailable,
    Other,
}

impl FailureCause {
    pub const ALL: [FailureCause; 7] = [
        FailureCause::FdUnavailable,
        FailureCause::FileTableFull,
        FailureCause::ConnectionRefused,
        FailureCause::SocketTimeout,
        FailureCause::ConnectionReset,
        FailureCause::AddressUnavailable,
        FailureCause::Other,
    ];

    /// Map a raw `errno` value to its bucket. Total: unknown codes are `Other`.
    pub fn classify(code: i32) -> Self {
        match Errno::from_raw(code) {
            // Linux reports descriptor exhaustion on connect() as EINVAL.
            #[cfg(target_os = "linux")]
            Errno::EINVAL => FailureCause::FdUnavailable,
            Errno::EMFILE => FailureCause::FdUnavailable,
            Errno::ENFILE => FailureCause::FileTableFull,
            Errno::ECONNREFUSED => FailureCause::ConnectionRefused,
            Errno::ETIMEDOUT => FailureCause::SocketTimeout,
            Errno::ECONNRESET | Errno::EPIPE => FailureCause::ConnectionReset,
            Errno::EADDRNOTAVAIL => FailureCause::AddressUnavailable,
            _ => FailureCause::Other,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureCause::FdUnavailable => "fd-unavail",
            FailureCause::FileTableFull => "ftab-full",
            FailureCause::ConnectionRefused => "connrefused",
            FailureCause::SocketTimeout => "socket-timo",
            FailureCause::ConnectionReset => "connreset",
            FailureCause::AddressUnavailable => "addrunavail",
            FailureCause::Other => "other",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// HTTP status class (the leading digit of the status code).
///
/// # Panics
///
/// A status outside 100..=599 means the caller handed over a reply that was
/// never a valid HTTP reply; that is a defect upstream and aborts the run.
pub fn status_class(status: u16) -> usize {
    let class = usize::from(status / 100);
    assert!(
        (1..=5).contains(&class),
        "reply status {} has class {}xx, expected 1xx..5xx",
        status,
        class
    );
    class
}

/// Byte counts of a completed reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyBytes {
    pub header: u64,
    pub content: u64,
    pub footer: u64,
}

/// Flat block of run counters.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    conns_issued: u64,
    active_conns: u64,
    max_conns: u64,
    client_timeouts: u64,
    failures: [u64; FailureCause::ALL.len()],
    unexpected_error_reported: bool,

    requests_sent: u64,
    req_bytes_sent: u64,

    /// Index 0 is unused so that `replies[class]` reads naturally.
    replies: [u64; 6],
    received: ReplyBytes,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conn_created(&mut self) {
        self.active_conns += 1;
        if self.active_conns > self.max_conns {
            self.max_conns = self.active_conns;
        }
    }

    /// # Panics
    ///
    /// If no connection is currently active.
    pub fn conn_destroyed(&mut self) {
        assert!(
            self.active_conns > 0,
            "connection destroyed while no connection is active"
        );
        self.active_conns -= 1;
    }

    pub fn conn_issued(&mut self) {
        self.conns_issued += 1;
    }

    pub fn client_timeout(&mut self) {
        self.client_timeouts += 1;
    }

    /// Classify `code` and count it. The first unrecognized code of the run
    /// is reported once; later ones are only counted.
    pub fn conn_failed(&mut self, code: i32) -> FailureCause {
        let cause = FailureCause::classify(code);
        if cause == FailureCause::Other {
            if !self.unexpected_error_reported {
                self.unexpected_error_reported = true;
                warn!("connection failed with unexpected error {}", code);
            } else {
                debug!(code, "connection failed with unexpected error");
            }
        }
        self.failures[cause.slot()] += 1;
        cause
    }

    pub fn request_sent(&mut self, bytes: u64) {
        self.req_bytes_sent += bytes;
        self.requests_sent += 1;
    }

    /// Count a completed reply under its status class and add its bytes.
    pub fn reply_received(&mut self, status: u16, bytes: ReplyBytes) -> usize {
        let class = status_class(status);
        self.received.header += bytes.header;
        self.received.content += bytes.content;
        self.received.footer += bytes.footer;
        self.replies[class] += 1;
        class
    }

    pub fn conns_issued(&self) -> u64 {
        self.conns_issued
    }

    pub fn active_conns(&self) -> u64 {
        self.active_conns
    }

    /// Concurrent-connection high-water mark.
    pub fn max_conns(&self) -> u64 {
        self.max_conns
    }

    pub fn client_timeouts(&self) -> u64 {
        self.client_timeouts
    }

    pub fn failures(&self, cause: FailureCause) -> u64 {
        self.failures[cause.slot()]
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn req_bytes_sent(&self) -> u64 {
        self.req_bytes_sent
    }

    /// Replies with status class `class` (1..=5).
    pub fn replies(&self, class: usize) -> u64 {
        assert!((1..=5).contains(&class), "status class {} out of range", class);
        self.replies[class]
    }

    pub fn total_replies(&self) -> u64 {
        self.replies[1..].iter().sum()
    }

    pub fn received_bytes(&self) -> ReplyBytes {
        self.received
    }

    /// Client timeouts plus every classified socket failure.
    pub fn total_errors(&self) -> u64 {
        self.client_timeouts + self.failures.iter().sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(
            FailureCause::classify(raw(Errno::EMFILE)),
            FailureCause::FdUnavailable
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::ENFILE)),
            FailureCause::FileTableFull
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::ECONNREFUSED)),
            FailureCause::ConnectionRefused
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::ETIMEDOUT)),
            FailureCause::SocketTimeout
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::ECONNRESET)),
            FailureCause::ConnectionReset
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::EPIPE)),
            FailureCause::ConnectionReset
        );
        assert_eq!(
            FailureCause::classify(raw(Errno::EADDRNOTAVAIL)),
            FailureCause::AddressUnavailable
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_classify_linux_einval_as_fd_exhaustion() {
        assert_eq!(
            FailureCause::classify(raw(Errno::EINVAL)),
            FailureCause::FdUnavailable
        );
    }

    #[test]
    fn test_classify_is_total() {
        for code in [-1, 0, 9999, i32::MAX, i32::MIN] {
            assert_eq!(FailureCause::classify(code), FailureCause::Other);
        }
        assert_eq!(
            FailureCause::classify(raw(Errno::ENOENT)),
            FailureCause::Other
        );
    }

    #[test]
    fn test_refused_touches_only_its_bucket() {
        let mut counters = Counters::new();
        counters.conn_failed(raw(Errno::ECONNREFUSED));

        for cause in FailureCause::ALL {
            let expected = u64::from(cause == FailureCause::ConnectionRefused);
            assert_eq!(counters.failures(cause), expected, "{}", cause);
        }
        assert_eq!(counters.total_errors(), 1);
    }

    #[test]
    fn test_repeated_unknown_errors_are_all_counted() {
        let mut counters = Counters::new();
        for _ in 0..3 {
            counters.conn_failed(9999);
        }
        assert_eq!(counters.failures(FailureCause::Other), 3);
        assert!(counters.unexpected_error_reported);
    }

    #[test]
    fn test_status_404_counts_as_4xx() {
        let mut counters = Counters::new();
        let class = counters.reply_received(404, ReplyBytes::default());
        assert_eq!(class, 4);
        for c in 1..=5 {
            assert_eq!(counters.replies(c), u64::from(c == 4));
        }
        assert_eq!(counters.total_replies(), 1);
    }

    #[test]
    #[should_panic(expected = "expected 1xx..5xx")]
    fn test_status_class_zero_panics() {
        status_class(42);
    }

    #[test]
    #[should_panic(expected = "expected 1xx..5xx")]
    fn test_status_class_six_panics() {
        status_class(600);
    }

    #[test]
    fn test_high_water_mark() {
        let mut counters = Counters::new();
        counters.conn_created();
        counters.conn_created();
        counters.conn_destroyed();
        counters.conn_created();
        counters.conn_created();
        assert_eq!(counters.active_conns(), 3);
        assert_eq!(counters.max_conns(), 3);
        counters.conn_destroyed();
        assert_eq!(counters.max_conns(), 3);
    }

    #[test]
    #[should_panic(expected = "no connection is active")]
    fn test_destroy_without_active_connection_panics() {
        Counters::new().conn_destroyed();
    }

    #[test]
    fn test_byte_accounting() {
        let mut counters = Counters::new();
        counters.request_sent(120);
        counters.request_sent(80);
        counters.reply_received(
            200,
            ReplyBytes {
                header: 100,
                content: 1000,
                footer: 2,
            },
        );
        counters.reply_received(
            301,
            ReplyBytes {
                header: 50,
                content: 0,
                footer: 0,
            },
        );
        assert_eq!(counters.requests_sent(), 2);
        assert_eq!(counters.req_bytes_sent(), 200);
        assert_eq!(
            counters.received_bytes(),
            ReplyBytes {
                header: 150,
                content: 1000,
                footer: 2,
            }
        );
    }

    fn raw(errno: Errno) -> i32 {
        errno as i32
    }
}
