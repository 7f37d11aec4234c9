use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Pulsed radar session driver for the simulated radio")]
struct Args {
    /// Load a session profile from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 1e6)]
    sample_rate: f64,
    /// Pulse repetition frequency; omit for continuous transmission
    #[arg(long)]
    prf: Option<f64>,
    #[arg(long, default_value_t = 100)]
    pulse_len: usize,
    /// Seconds to stream before stopping
    #[arg(long, default_value_t = 1.0)]
    duration: f64,
    /// Write emitted records as JSON lines
    #[arg(long)]
    output: Option<PathBuf>,
    /// Calibration JSON keyed by radio model
    #[arg(long)]
    calibration: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let mut config = match args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => {
            WorkflowConfig::from_args(args.sample_rate, args.prf, args.pulse_len, args.duration)
        }
    };
    if args.output.is_some() {
        config.output = args.output;
    }
    if args.calibration.is_some() {
        config.calibration = args.calibration;
    }

    let summary = Runner::new(config).execute().context("running session")?;
    let report = &summary.report;
    println!(
        "mode={:?} pulses={} samples={} records={} tx_timeouts={} rx_timeouts={}",
        report.mode,
        report.pulses_sent,
        report.samples_sent,
        summary.records_written,
        report.metrics.tx_timeouts,
        report.metrics.rx_timeouts
    );
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("serializing session report")?
    );
    Ok(())
}
