//! In-process radio used by the simulator driver and by tests.
//!
//! TX sends block until their time tag on a monotonic device clock, RX
//! delivers a ramp whose value is the absolute sample index since the stream
//! was started, and every call is written to a shared [`SimLog`].

use super::{
    RadioDevice, RecvOutcome, RxStream, StreamCommand, StreamMode, TimeSpec, TxMetadata, TxStream,
};
use crate::prelude::{RadarError, RadarResult, Sample};
use num_complex::Complex32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub model_name: String,
    pub master_clock_rate: f64,
    pub max_samples_per_call: usize,
    /// Extra latency applied to TX sends, cycled across calls.
    pub send_latency: Vec<Duration>,
    /// Number of leading `recv` calls that report a timeout.
    pub rx_timeouts: usize,
    /// Polls of the LO sensor before it reports lock; `None` never locks.
    pub lo_lock_polls: Option<u32>,
    /// Keep the samples of every TX send in the log.
    pub record_tx_samples: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            model_name: "X310".to_string(),
            master_clock_rate: 200e6,
            max_samples_per_call: 256,
            send_latency: Vec::new(),
            rx_timeouts: 0,
            lo_lock_polls: Some(0),
            record_tx_samples: false,
        }
    }
}

/// One TX `send` call as seen by the simulated radio.
#[derive(Debug, Clone)]
pub struct TxSendRecord {
    pub len: usize,
    pub metadata: TxMetadata,
    /// Device time at which the call returned.
    pub completed_at: TimeSpec,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Default)]
struct LogInner {
    tx_sends: Vec<TxSendRecord>,
    stream_commands: Vec<StreamCommand>,
    thread_priorities: Vec<f64>,
}

/// Shared record of everything the device was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimLog {
    inner: Arc<Mutex<LogInner>>,
}

impl SimLog {
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tx_sends(&self) -> Vec<TxSendRecord> {
        self.lock().tx_sends.clone()
    }

    pub fn tx_send_count(&self) -> usize {
        self.lock().tx_sends.len()
    }

    pub fn stream_commands(&self) -> Vec<StreamCommand> {
        self.lock().stream_commands.clone()
    }

    pub fn thread_priorities(&self) -> Vec<f64> {
        self.lock().thread_priorities.clone()
    }
}

#[derive(Debug)]
struct RadioState {
    tx_rate: f64,
    rx_rate: f64,
    tx_gain: f64,
    rx_gain: f64,
    tx_freq: f64,
    rx_freq: f64,
    lo_polls: u32,
}

pub struct SimulatedDevice {
    config: SimConfig,
    epoch: Instant,
    state: Arc<Mutex<RadioState>>,
    log: SimLog,
}

impl SimulatedDevice {
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            state: Arc::new(Mutex::new(RadioState {
                tx_rate: 1e6,
                rx_rate: 1e6,
                tx_gain: 0.0,
                rx_gain: 0.0,
                tx_freq: 0.0,
                rx_freq: 0.0,
                lo_polls: 0,
            })),
            log: SimLog::default(),
        }
    }

    pub fn log(&self) -> SimLog {
        self.log.clone()
    }

    pub fn gains(&self) -> (f64, f64) {
        let state = self.state();
        (state.tx_gain, state.rx_gain)
    }

    pub fn frequencies(&self) -> (f64, f64) {
        let state = self.state();
        (state.tx_freq, state.rx_freq)
    }

    pub fn rx_rate(&self) -> f64 {
        self.state().rx_rate
    }

    fn state(&self) -> MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn parse_args(args: &str) -> RadarResult<SimConfig> {
        let mut config = SimConfig::default();
        for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| RadarError::DeviceOpen {
                args: args.to_string(),
                reason: format!("expected key=value, got '{}'", pair),
            })?;
            match key.trim() {
                "type" | "model" => config.model_name = value.trim().to_string(),
                "master_clock_rate" => {
                    config.master_clock_rate =
                        value.trim().parse().map_err(|_| RadarError::DeviceOpen {
                            args: args.to_string(),
                            reason: format!("bad master_clock_rate '{}'", value),
                        })?;
                }
                "spp" => {
                    config.max_samples_per_call =
                        value.trim().parse().map_err(|_| RadarError::DeviceOpen {
                            args: args.to_string(),
                            reason: format!("bad spp '{}'", value),
                        })?;
                }
                other => {
                    return Err(RadarError::DeviceOpen {
                        args: args.to_string(),
                        reason: format!("unknown device argument '{}'", other),
                    })
                }
            }
        }
        if config.max_samples_per_call == 0 {
            return Err(RadarError::DeviceOpen {
                args: args.to_string(),
                reason: "spp must be positive".into(),
            });
        }
        Ok(config)
    }
}

fn clock_now(epoch: Instant) -> TimeSpec {
    TimeSpec::from_secs(epoch.elapsed().as_secs_f64())
}

fn sleep_until(epoch: Instant, target: TimeSpec) {
    let remaining = target - clock_now(epoch);
    if remaining > 0.0 {
        thread::sleep(Duration::from_secs_f64(remaining));
    }
}

impl RadioDevice for SimulatedDevice {
    fn open(args: &str) -> RadarResult<Self> {
        Ok(Self::with_config(Self::parse_args(args)?))
    }

    fn model_name(&self) -> String {
        self.config.model_name.clone()
    }

    fn time_now(&self) -> TimeSpec {
        clock_now(self.epoch)
    }

    fn set_tx_rate(&self, rate: f64) -> RadarResult<()> {
        if rate <= 0.0 {
            return Err(RadarError::Device(format!("invalid tx rate {}", rate)));
        }
        self.state().tx_rate = rate;
        Ok(())
    }

    fn set_rx_rate(&self, rate: f64) -> RadarResult<()> {
        if rate <= 0.0 {
            return Err(RadarError::Device(format!("invalid rx rate {}", rate)));
        }
        self.state().rx_rate = rate;
        Ok(())
    }

    fn tx_rate(&self) -> f64 {
        self.state().tx_rate
    }

    fn master_clock_rate(&self) -> f64 {
        self.config.master_clock_rate
    }

    fn set_tx_gain(&self, gain_db: f64) -> RadarResult<()> {
        self.state().tx_gain = gain_db;
        Ok(())
    }

    fn set_rx_gain(&self, gain_db: f64) -> RadarResult<()> {
        self.state().rx_gain = gain_db;
        Ok(())
    }

    fn set_tx_freq(&self, freq_hz: f64) -> RadarResult<()> {
        self.state().tx_freq = freq_hz;
        Ok(())
    }

    fn set_rx_freq(&self, freq_hz: f64) -> RadarResult<()> {
        let mut state = self.state();
        state.rx_freq = freq_hz;
        state.lo_polls = 0;
        Ok(())
    }

    fn rx_lo_locked(&self) -> RadarResult<bool> {
        let mut state = self.state();
        match self.config.lo_lock_polls {
            None => Ok(false),
            Some(needed) => {
                let locked = state.lo_polls >= needed;
                state.lo_polls = state.lo_polls.saturating_add(1);
                Ok(locked)
            }
        }
    }

    fn set_thread_priority(&self, priority: f64) -> RadarResult<()> {
        self.log.lock().thread_priorities.push(priority);
        Ok(())
    }

    fn tx_stream(&self) -> RadarResult<Box<dyn TxStream>> {
        Ok(Box::new(SimTxStream {
            epoch: self.epoch,
            state: self.state.clone(),
            log: self.log.clone(),
            latency: self.config.send_latency.clone(),
            sends: 0,
            record_samples: self.config.record_tx_samples,
        }))
    }

    fn rx_stream(&self) -> RadarResult<Box<dyn RxStream>> {
        Ok(Box::new(SimRxStream {
            epoch: self.epoch,
            state: self.state.clone(),
            log: self.log.clone(),
            max_samples: self.config.max_samples_per_call,
            timeouts_left: self.config.rx_timeouts,
            streaming: false,
            start_at: None,
            next_index: 0,
        }))
    }
}

struct SimTxStream {
    epoch: Instant,
    state: Arc<Mutex<RadioState>>,
    log: SimLog,
    latency: Vec<Duration>,
    sends: usize,
    record_samples: bool,
}

impl TxStream for SimTxStream {
    fn send(
        &mut self,
        samples: &[Sample],
        metadata: &TxMetadata,
        timeout: Duration,
    ) -> RadarResult<usize> {
        match metadata.time_spec {
            Some(at) => sleep_until(self.epoch, at),
            None if !samples.is_empty() => {
                let rate = self
                    .state
                    .lock()
                    .map(|s| s.tx_rate)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().tx_rate);
                thread::sleep(Duration::from_secs_f64(samples.len() as f64 / rate));
            }
            None => {}
        }

        let extra = if self.latency.is_empty() {
            Duration::ZERO
        } else {
            self.latency[self.sends % self.latency.len()]
        };
        self.sends += 1;
        if extra > timeout {
            thread::sleep(timeout);
            return Err(RadarError::Timeout("tx send".into()));
        }
        thread::sleep(extra);

        self.log.lock().tx_sends.push(TxSendRecord {
            len: samples.len(),
            metadata: *metadata,
            completed_at: clock_now(self.epoch),
            samples: if self.record_samples {
                samples.to_vec()
            } else {
                Vec::new()
            },
        });
        Ok(samples.len())
    }
}

struct SimRxStream {
    epoch: Instant,
    state: Arc<Mutex<RadioState>>,
    log: SimLog,
    max_samples: usize,
    timeouts_left: usize,
    streaming: bool,
    start_at: Option<TimeSpec>,
    next_index: u64,
}

impl RxStream for SimRxStream {
    fn issue_stream_cmd(&mut self, command: StreamCommand) -> RadarResult<()> {
        self.log.lock().stream_commands.push(command);
        match command.mode {
            StreamMode::StartContinuous => {
                self.streaming = true;
                self.start_at = command.time_spec;
                self.next_index = 0;
            }
            StreamMode::StopContinuous => self.streaming = false,
        }
        Ok(())
    }

    fn max_samples_per_call(&self) -> usize {
        self.max_samples
    }

    fn recv(&mut self, buffer: &mut [Sample], timeout: Duration) -> RadarResult<RecvOutcome> {
        if !self.streaming {
            thread::sleep(timeout.min(Duration::from_millis(1)));
            return Err(RadarError::Timeout("rx stream not started".into()));
        }
        if self.timeouts_left > 0 {
            self.timeouts_left -= 1;
            return Err(RadarError::Timeout("rx recv".into()));
        }
        if let Some(at) = self.start_at.take() {
            sleep_until(self.epoch, at);
        }

        let count = buffer.len().min(self.max_samples);
        let rate = self
            .state
            .lock()
            .map(|s| s.rx_rate)
            .unwrap_or_else(|poisoned| poisoned.into_inner().rx_rate);
        thread::sleep(Duration::from_secs_f64(count as f64 / rate));

        let first = self.next_index;
        for (offset, slot) in buffer[..count].iter_mut().enumerate() {
            *slot = Complex32::new((first + offset as u64) as f32, 0.0);
        }
        self.next_index += count as u64;
        Ok(RecvOutcome {
            num_samples: count,
            time_spec: Some(clock_now(self.epoch)),
            overflow: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_parses_connection_string() {
        let device = SimulatedDevice::open("type=B210, master_clock_rate=30.72e6").unwrap();
        assert_eq!(device.model_name(), "B210");
        assert_eq!(device.master_clock_rate(), 30.72e6);
    }

    #[test]
    fn open_rejects_unknown_arguments() {
        let err = SimulatedDevice::open("addr=192.168.10.2").err().unwrap();
        assert!(matches!(err, RadarError::DeviceOpen { .. }));
    }

    #[test]
    fn rx_stream_delivers_ramp_after_start() {
        let device = SimulatedDevice::with_config(SimConfig {
            max_samples_per_call: 8,
            ..Default::default()
        });
        let mut rx = device.rx_stream().unwrap();
        let mut buf = vec![Complex32::new(0.0, 0.0); 16];

        assert!(rx.recv(&mut buf, Duration::from_millis(1)).is_err());

        rx.issue_stream_cmd(StreamCommand::start(None)).unwrap();
        let first = rx.recv(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(first.num_samples, 8);
        let second = rx.recv(&mut buf[8..], Duration::from_millis(10)).unwrap();
        assert_eq!(second.num_samples, 8);
        assert_eq!(buf[15].re, 15.0);
        assert_eq!(device.log().stream_commands().len(), 1);
    }

    #[test]
    fn lo_lock_follows_configured_polls() {
        let device = SimulatedDevice::with_config(SimConfig {
            lo_lock_polls: Some(2),
            ..Default::default()
        });
        device.set_rx_freq(2.4e9).unwrap();
        assert!(!device.rx_lo_locked().unwrap());
        assert!(!device.rx_lo_locked().unwrap());
        assert!(device.rx_lo_locked().unwrap());
    }

    #[test]
    fn tx_send_past_timeout_reports_timeout() {
        let device = SimulatedDevice::with_config(SimConfig {
            send_latency: vec![Duration::from_millis(20)],
            ..Default::default()
        });
        let mut tx = device.tx_stream().unwrap();
        let err = tx
            .send(&[], &TxMetadata::default(), Duration::from_millis(1))
            .err()
            .unwrap();
        assert!(err.is_transient());
        assert_eq!(device.log().tx_send_count(), 0);
    }
}
