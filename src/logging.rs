use colored::*;
use std::fmt;
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Tracing event formatter for diagnostics printed next to a report.
///
/// Every line is prefixed with the program name, `"<prog>: <message>"`, and
/// coloured by level. No timestamps or level names are printed.
pub struct ProgramFormatter {
    program: &'static str,
}

impl ProgramFormatter {
    pub fn new(program: &'static str) -> Self {
        Self { program }
    }
}

impl<S, N> FormatEvent<S, N> for ProgramFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Fields are buffered so the whole line takes one colour.
        let mut buffer = format!("{}: ", self.program);
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Level enabled by `-v` repetitions: warn, info, then debug.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// `RUST_LOG` when set, otherwise the level chosen by `verbosity`.
pub fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy()
}

/// Install the global subscriber. Diagnostics go to stderr so that stdout
/// carries only the report.
pub fn init(program: &'static str, verbosity: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .event_format(ProgramFormatter::new(program))
        .init();
}
