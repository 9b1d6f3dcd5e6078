//! # HTTP Load Statistics - Main Entry Point
//!
//! Replays a synthetic connection workload through the basic statistics
//! collector and prints its end-of-run report.
//!
//! 1. **Parse arguments**: workload shape, histogram binning, report views
//! 2. **Initialize logging**: diagnostics on stderr, level from `-v`/`RUST_LOG`
//! 3. **Run**: initialize the engine, drive it with the generated events
//! 4. **Report**: dump every collector to stdout or to `--output`
//!
//! Errors are reported through `anyhow` with the failing step as context.

use anyhow::{Context, Result};
use clap::Parser;
use http_load_stats::{
    cli::Args,
    collector::BasicCollector,
    engine::EventEngine,
    events::ManualClock,
    logging, simulate,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing::info;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(env!("CARGO_PKG_NAME"), args.verbose);

    info!("Configuration: {:?}", args);

    let histogram = args
        .histogram_config()
        .context("Invalid histogram configuration")?;
    let workload = args
        .workload_config()
        .context("Invalid workload configuration")?;

    let mut engine = EventEngine::new(ManualClock::new());
    engine.add_collector(Box::new(BasicCollector::new(
        histogram,
        args.report_options(),
    )));
    engine.init().context("Failed to initialize collectors")?;

    let summary = simulate::run(&mut engine, &workload).context("Simulated run failed")?;
    info!(
        "Delivered {} events over {:.3} s of virtual time",
        summary.events, summary.duration
    );

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create report file {}", path.display()))?;
            let mut out = BufWriter::new(file);
            engine.dump(&mut out).context("Failed to write report")?;
            out.flush()
                .with_context(|| format!("Failed to flush report file {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            engine.dump(&mut out).context("Failed to write report")?;
            out.flush().context("Failed to flush stdout")?;
        }
    }

    Ok(())
}
