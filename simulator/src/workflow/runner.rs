use crate::generator::pulse::build_event;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::{info, warn};
use pulsecore::device::{RadioDevice, SimulatedDevice};
use pulsecore::interface::{PulseRecord, PulseSink};
use pulsecore::session::SessionReport;
use pulsecore::RadarController;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub struct RunSummary {
    pub report: SessionReport,
    pub records_written: usize,
}

/// Appends each record as one JSON line; counts only when no file is set.
struct RecordWriter {
    file: Option<BufWriter<File>>,
    count: usize,
}

impl RecordWriter {
    fn create(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let file = File::create(path)
                    .with_context(|| format!("creating record log {}", path.display()))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };
        Ok(Self { file, count: 0 })
    }

    fn write(&mut self, record: &PulseRecord) -> anyhow::Result<()> {
        if let Some(file) = self.file.as_mut() {
            serde_json::to_writer(&mut *file, record).context("serializing pulse record")?;
            file.write_all(b"\n").context("writing pulse record")?;
        }
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().context("flushing record log")?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    fn build_controller(&self, sink: Arc<dyn PulseSink>) -> anyhow::Result<RadarController> {
        let cfg = &self.config;
        let device = SimulatedDevice::open(&cfg.device_args)
            .with_context(|| format!("opening simulated radio '{}'", cfg.device_args))?;
        let controller = RadarController::with_device(Arc::new(device), sink);

        controller.set_metadata_keys(
            &cfg.metadata_keys.center_freq,
            &cfg.metadata_keys.prf,
            &cfg.metadata_keys.sample_start,
        );
        controller
            .set_sample_rate(cfg.sample_rate)
            .context("setting sample rate")?;
        controller.set_tx_gain(cfg.tx_gain).context("setting tx gain")?;
        controller.set_rx_gain(cfg.rx_gain).context("setting rx gain")?;
        controller
            .set_tx_freq(cfg.tx_freq)
            .context("tuning transmitter")?;
        controller
            .set_rx_freq(cfg.rx_freq)
            .context("tuning receiver")?;
        controller.set_start_time(cfg.start_time);
        controller.set_burst_delay(cfg.burst_delay_s);
        controller.set_tx_thread_priority(cfg.tx_thread_priority);
        controller.set_rx_thread_priority(cfg.rx_thread_priority);

        if let Some(path) = &cfg.calibration {
            let delay = controller
                .read_calibration_file(path)
                .with_context(|| format!("reading calibration {}", path.display()))?;
            info!("calibration delay {} samples", delay);
        }
        Ok(controller)
    }

    /// Arms the generated pulse, streams for the configured duration (or
    /// until Ctrl+C) and writes every emitted record.
    pub fn execute(&self) -> anyhow::Result<RunSummary> {
        let (sender, mut records) = mpsc::unbounded_channel();
        let mut controller = self.build_controller(Arc::new(sender))?;
        let mut writer = RecordWriter::create(self.config.output.as_deref())?;

        let event = build_event(
            &self.config.pulse,
            self.config.prf,
            &self.config.metadata_keys.prf,
        )?;
        let mode = controller.handle_event(event).context("arming pulse")?;
        info!("armed {:?}", mode);
        controller.start().context("starting session")?;

        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .context("creating runtime for record collection")?;
        let streamed = runtime.block_on(self.collect(&mut records, &mut writer));
        let report = controller.stop().context("stopping session")?;
        streamed?;

        while let Ok(record) = records.try_recv() {
            writer.write(&record)?;
        }
        writer.finish()?;

        if let Some(err) = report.tx_error.as_ref().or(report.rx_error.as_ref()) {
            warn!("session reported an engine failure: {}", err);
        }
        Ok(RunSummary {
            report,
            records_written: writer.count,
        })
    }

    async fn collect(
        &self,
        records: &mut UnboundedReceiver<PulseRecord>,
        writer: &mut RecordWriter,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::sleep(Duration::from_secs_f64(self.config.duration.max(0.0)));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                interrupted = signal::ctrl_c() => {
                    interrupted.context("awaiting Ctrl+C")?;
                    info!("interrupted");
                    return Ok(());
                }
                received = records.recv() => match received {
                    Some(record) => writer.write(&record)?,
                    None => return Ok(()),
                },
            }
        }
    }
}
