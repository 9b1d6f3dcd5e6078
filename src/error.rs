use thiserror::Error;

/// Errors surfaced by the statistics engine.
///
/// Only recoverable conditions live here. Violated event-ordering
/// preconditions (reading an auxiliary field before it was written, an
/// out-of-range status class) are caller defects and panic instead.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read process resource usage: {source}")]
    ResourceUsage {
        #[source]
        source: nix::Error,
    },

    #[error("collector `{0}` was already initialized")]
    AlreadyInitialized(&'static str),
}

impl StatsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StatsError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| StatsError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
