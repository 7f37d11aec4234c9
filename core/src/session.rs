//! Session coordinator: starts TX and RX together from one time reference
//! and tears both down on stop.

use crate::context::{ControlState, SessionAnchor, SessionContext, ShutdownFlag};
use crate::device::{RadioDevice, TimeSpec};
use crate::interface::PulseSink;
use crate::prelude::{RadarError, RadarResult, WAIT_POLL_INTERVAL};
use crate::receive::ReceiveEngine;
use crate::telemetry::{LogManager, MetricsSnapshot, StreamMetrics};
use crate::transmit::{TransmitEngine, TxCounters};
use crate::waveform::TransmitMode;
use serde::Serialize;
use std::sync::Arc;
use std::thread;

/// Summary returned when a session ends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    /// A waveform was armed and the streams were started.
    pub started: bool,
    pub mode: Option<TransmitMode>,
    pub start_time: Option<TimeSpec>,
    pub record_length: usize,
    pub calibration_delay: u64,
    pub pulses_sent: u64,
    pub samples_sent: u64,
    pub metrics: MetricsSnapshot,
    pub tx_error: Option<String>,
    pub rx_error: Option<String>,
}

/// Owns the finished flag for one session. Counters and metrics are created
/// fresh with every coordinator, so restarting means building a new one.
pub struct SessionCoordinator {
    device: Arc<dyn RadioDevice>,
    control: Arc<ControlState>,
    sink: Arc<dyn PulseSink>,
    shutdown: ShutdownFlag,
    counters: Arc<TxCounters>,
    metrics: Arc<StreamMetrics>,
    logger: LogManager,
}

impl SessionCoordinator {
    pub fn new(
        device: Arc<dyn RadioDevice>,
        control: Arc<ControlState>,
        sink: Arc<dyn PulseSink>,
    ) -> Self {
        Self {
            device,
            control,
            sink,
            shutdown: ShutdownFlag::new(),
            counters: Arc::new(TxCounters::new()),
            metrics: Arc::new(StreamMetrics::new()),
            logger: LogManager::new("session"),
        }
    }

    pub fn counters(&self) -> &TxCounters {
        &self.counters
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Marks the session finished and wakes anything waiting for data.
    pub fn stop(&self) {
        self.shutdown.request();
        self.control.channel.wake_all();
    }

    /// Waits for a waveform, streams until [`stop`](Self::stop), and joins
    /// the transmit thread. Only setup failures are returned as errors;
    /// engine failures end up in the report.
    pub fn run(&self) -> RadarResult<SessionReport> {
        let mut report = SessionReport::default();
        if !self
            .control
            .channel
            .wait_until_armed(&self.shutdown, WAIT_POLL_INTERVAL)
        {
            self.logger.record("stopped before any waveform was armed");
            return Ok(report);
        }
        let shape = self
            .control
            .channel
            .latest()
            .ok_or_else(|| RadarError::InvalidWaveform("armed waveform disappeared".into()))?;

        let settings = self.control.settings();
        let record_len = shape.mode.record_length(settings.sample_rate, shape.len);
        if record_len == 0 {
            return Err(RadarError::InvalidConfig(format!(
                "{:?} at {} S/s yields an empty receive record",
                shape.mode, settings.sample_rate
            )));
        }
        let calibration_delay = self.control.calibration_delay(
            &self.device.model_name(),
            self.device.tx_rate(),
            self.device.master_clock_rate(),
        );

        let timed = settings.start_time > 0.0;
        let now = self.device.time_now();
        let anchor = SessionAnchor {
            time: if timed { now + settings.start_time } else { now },
            timed,
        };

        let tx_stream = self.device.tx_stream()?;
        let rx_stream = self.device.rx_stream()?;
        let context = Arc::new(SessionContext {
            control: self.control.clone(),
            device: self.device.clone(),
            settings,
            anchor,
            mode: shape.mode,
            calibration_delay,
            counters: self.counters.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        });
        self.logger.record(&format!(
            "starting {:?} session at {} ({}), {} sample records",
            shape.mode,
            anchor.time,
            if timed { "timed" } else { "now" },
            record_len
        ));

        let transmitter = TransmitEngine::new(context.clone(), tx_stream);
        let tx_thread = thread::Builder::new()
            .name("radar-tx".into())
            .spawn(move || transmitter.run())
            .map_err(|_| RadarError::ThreadSpawn("transmit".into()))?;

        let rx_result =
            ReceiveEngine::new(context.clone(), rx_stream, self.sink.clone(), record_len).run();
        if let Err(err) = &rx_result {
            self.logger.error(&format!("receive engine failed: {}", err));
            // Nothing is listening any more; bring the transmitter down too.
            self.stop();
        }

        let tx_result = match tx_thread.join() {
            Ok(result) => result,
            Err(_) => Err(RadarError::ThreadPanicked("transmit".into())),
        };
        if let Err(err) = &tx_result {
            self.logger.error(&format!("transmit engine failed: {}", err));
        }

        report.started = true;
        report.mode = Some(shape.mode);
        report.start_time = Some(anchor.time);
        report.record_length = record_len;
        report.calibration_delay = calibration_delay;
        report.pulses_sent = self.counters.pulses();
        report.samples_sent = self.counters.samples();
        report.metrics = self.metrics.snapshot();
        report.tx_error = tx_result.err().map(|e| e.to_string());
        report.rx_error = rx_result.err().map(|e| e.to_string());
        self.logger.record(&format!(
            "session finished: {} pulses, {} records",
            report.pulses_sent, report.metrics.records_emitted
        ));
        Ok(report)
    }
}
