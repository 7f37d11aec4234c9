//! Control-thread API: device setters, inbound waveform events, and session
//! start/stop.

use crate::calibration::CalibrationTable;
use crate::context::{ControlState, SessionSettings};
use crate::device::RadioDevice;
use crate::interface::{ControlEvent, PulseSink};
use crate::metadata::MetadataKeys;
use crate::prelude::{RadarError, RadarResult};
use crate::session::{SessionCoordinator, SessionReport};
use crate::telemetry::LogManager;
use crate::waveform::TransmitMode;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const LO_LOCK_POLL: Duration = Duration::from_millis(100);

struct RunningSession {
    coordinator: Arc<SessionCoordinator>,
    handle: JoinHandle<RadarResult<SessionReport>>,
}

pub struct RadarController {
    device: Arc<dyn RadioDevice>,
    control: Arc<ControlState>,
    sink: Arc<dyn PulseSink>,
    session: Option<RunningSession>,
    logger: LogManager,
}

impl RadarController {
    /// Opens the radio from a connection string. Failure here is fatal.
    pub fn open<D>(args: &str, sink: Arc<dyn PulseSink>) -> RadarResult<Self>
    where
        D: RadioDevice + 'static,
    {
        let device = D::open(args)?;
        Ok(Self::with_device(Arc::new(device), sink))
    }

    pub fn with_device(device: Arc<dyn RadioDevice>, sink: Arc<dyn PulseSink>) -> Self {
        let logger = LogManager::new("control");
        logger.record(&format!("using radio {}", device.model_name()));
        Self {
            device,
            control: Arc::new(ControlState::default()),
            sink,
            session: None,
            logger,
        }
    }

    pub fn device(&self) -> &Arc<dyn RadioDevice> {
        &self.device
    }

    pub fn settings(&self) -> SessionSettings {
        self.control.settings()
    }

    /// Sets TX and RX rate together.
    pub fn set_sample_rate(&self, rate: f64) -> RadarResult<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RadarError::InvalidConfig(format!("sample rate {}", rate)));
        }
        self.device.set_tx_rate(rate)?;
        self.device.set_rx_rate(rate)?;
        self.control.update_settings(|s| s.sample_rate = rate);
        Ok(())
    }

    pub fn set_tx_gain(&self, gain_db: f64) -> RadarResult<()> {
        self.device.set_tx_gain(gain_db)
    }

    pub fn set_rx_gain(&self, gain_db: f64) -> RadarResult<()> {
        self.device.set_rx_gain(gain_db)
    }

    /// Tunes TX and records the carrier in the capture metadata.
    pub fn set_tx_freq(&self, freq_hz: f64) -> RadarResult<()> {
        self.device.set_tx_freq(freq_hz)?;
        self.control.metadata().stamp_center_frequency(freq_hz);
        Ok(())
    }

    /// Tunes RX and waits for the LO to report lock, up to the configured
    /// lock timeout.
    pub fn set_rx_freq(&self, freq_hz: f64) -> RadarResult<()> {
        self.device.set_rx_freq(freq_hz)?;
        let limit = Duration::from_millis(self.control.settings().lo_lock_timeout_ms);
        let started = Instant::now();
        loop {
            if self.device.rx_lo_locked()? {
                self.logger
                    .detail(&format!("rx LO locked at {} Hz", freq_hz));
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= limit {
                return Err(RadarError::LoLockTimeout { freq_hz, waited });
            }
            thread::sleep(LO_LOCK_POLL.min(limit - waited));
        }
    }

    /// Start offset in seconds from "now"; zero streams immediately.
    pub fn set_start_time(&self, seconds: f64) {
        self.control.update_settings(|s| s.start_time = seconds);
    }

    pub fn set_tx_thread_priority(&self, priority: f64) {
        self.control
            .update_settings(|s| s.tx_thread_priority = priority);
    }

    pub fn set_rx_thread_priority(&self, priority: f64) {
        self.control
            .update_settings(|s| s.rx_thread_priority = priority);
    }

    pub fn set_burst_delay(&self, seconds: f64) {
        self.control.update_settings(|s| s.burst_delay_s = seconds);
    }

    pub fn set_lo_lock_timeout(&self, timeout: Duration) {
        self.control
            .update_settings(|s| s.lo_lock_timeout_ms = timeout.as_millis() as u64);
    }

    pub fn set_metadata_keys(&self, center_freq_key: &str, prf_key: &str, sample_start_key: &str) {
        self.control.metadata().set_keys(MetadataKeys {
            center_freq: center_freq_key.to_string(),
            prf: prf_key.to_string(),
            sample_start: sample_start_key.to_string(),
        });
    }

    pub fn metadata_keys(&self) -> MetadataKeys {
        self.control.metadata().keys().clone()
    }

    /// Loads calibration data and returns the delay that applies to the
    /// current radio configuration. A missing file leaves the delay at zero.
    pub fn read_calibration_file<P: AsRef<Path>>(&self, path: P) -> RadarResult<u64> {
        let table = CalibrationTable::load(path)?;
        self.control.set_calibration(table);
        let delay = self.control.calibration_delay(
            &self.device.model_name(),
            self.device.tx_rate(),
            self.device.master_clock_rate(),
        );
        self.logger
            .record(&format!("calibration delay {} samples", delay));
        Ok(delay)
    }

    /// Merges the event metadata and arms its waveform. A PRF in the merged
    /// session annotation selects burst mode; events without an annotation
    /// keep the current mode.
    pub fn handle_event(&self, event: ControlEvent) -> RadarResult<TransmitMode> {
        if event.samples.is_empty() {
            return Err(RadarError::InvalidWaveform("event carries no samples".into()));
        }
        let prf = self.control.metadata().merge_event(&event.metadata)?;
        let mode = TransmitMode::from_prf(prf);
        let len = event.samples.len();
        self.control.channel.arm(event.samples, mode)?;
        self.logger
            .detail(&format!("armed {} samples for {:?}", len, mode));
        Ok(mode)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Pulses sent by the running session, if any.
    pub fn pulses_sent(&self) -> Option<u64> {
        self.session
            .as_ref()
            .map(|s| s.coordinator.counters().pulses())
    }

    /// Launches a fresh session on its own thread. It streams once a
    /// waveform has been armed.
    pub fn start(&mut self) -> RadarResult<()> {
        if self.session.is_some() {
            return Err(RadarError::InvalidConfig("session already running".into()));
        }
        let coordinator = Arc::new(SessionCoordinator::new(
            self.device.clone(),
            self.control.clone(),
            self.sink.clone(),
        ));
        let runner = coordinator.clone();
        let handle = thread::Builder::new()
            .name("radar-session".into())
            .spawn(move || runner.run())
            .map_err(|_| RadarError::ThreadSpawn("session".into()))?;
        self.session = Some(RunningSession {
            coordinator,
            handle,
        });
        Ok(())
    }

    /// Finishes the running session and waits for both engines to exit.
    pub fn stop(&mut self) -> RadarResult<SessionReport> {
        let Some(session) = self.session.take() else {
            return Ok(SessionReport::default());
        };
        session.coordinator.stop();
        match session.handle.join() {
            Ok(result) => result,
            Err(_) => Err(RadarError::ThreadPanicked("session".into())),
        }
    }
}

impl Drop for RadarController {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(err) = self.stop() {
                self.logger.error(&format!("session ended with {}", err));
            }
        }
    }
}
