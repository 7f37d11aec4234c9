//! Capability interface over the radio front end.
//!
//! The coordinator never talks to a driver directly: it is handed an
//! `Arc<dyn RadioDevice>` at construction and asks it for exactly one TX
//! stream and one RX stream per session. Each stream is moved onto the thread
//! that drives it and is never shared.

pub mod sim;

use crate::prelude::{RadarResult, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

pub use sim::{SimConfig, SimLog, SimulatedDevice, TxSendRecord};

/// Point on the device clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct TimeSpec(f64);

impl TimeSpec {
    pub fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn secs(self) -> f64 {
        self.0
    }
}

impl Add<f64> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: f64) -> TimeSpec {
        TimeSpec(self.0 + rhs)
    }
}

impl Sub for TimeSpec {
    type Output = f64;

    fn sub(self, rhs: TimeSpec) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.0)
    }
}

/// Per-send flags attached to a TX call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TxMetadata {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    /// `None` sends as soon as possible.
    pub time_spec: Option<TimeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
}

/// Command issued to an RX stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamCommand {
    pub mode: StreamMode,
    /// `None` means stream now.
    pub time_spec: Option<TimeSpec>,
}

impl StreamCommand {
    pub fn start(time_spec: Option<TimeSpec>) -> Self {
        Self {
            mode: StreamMode::StartContinuous,
            time_spec,
        }
    }

    pub fn stop_now() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            time_spec: None,
        }
    }

    pub fn stream_now(&self) -> bool {
        self.time_spec.is_none()
    }
}

/// Result of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RecvOutcome {
    pub num_samples: usize,
    pub time_spec: Option<TimeSpec>,
    /// Samples were dropped by the host or the device before this packet.
    pub overflow: bool,
}

pub trait TxStream: Send {
    /// Sends `samples` and returns how many were accepted. A send that runs
    /// past `timeout` returns `RadarError::Timeout`.
    fn send(
        &mut self,
        samples: &[Sample],
        metadata: &TxMetadata,
        timeout: Duration,
    ) -> RadarResult<usize>;
}

pub trait RxStream: Send {
    fn issue_stream_cmd(&mut self, command: StreamCommand) -> RadarResult<()>;

    /// Largest number of samples a single `recv` call will deliver.
    fn max_samples_per_call(&self) -> usize;

    /// Fills the front of `buffer`. Returns `RadarError::Timeout` when nothing
    /// arrived within `timeout`.
    fn recv(&mut self, buffer: &mut [Sample], timeout: Duration) -> RadarResult<RecvOutcome>;
}

/// Radio front end shared between the control thread and the session.
pub trait RadioDevice: Send + Sync {
    /// Opens a device from a driver connection string.
    fn open(args: &str) -> RadarResult<Self>
    where
        Self: Sized;

    /// Motherboard name used to key calibration data.
    fn model_name(&self) -> String;

    fn time_now(&self) -> TimeSpec;

    fn set_tx_rate(&self, rate: f64) -> RadarResult<()>;
    fn set_rx_rate(&self, rate: f64) -> RadarResult<()>;
    fn tx_rate(&self) -> f64;
    fn master_clock_rate(&self) -> f64;

    fn set_tx_gain(&self, gain_db: f64) -> RadarResult<()>;
    fn set_rx_gain(&self, gain_db: f64) -> RadarResult<()>;
    fn set_tx_freq(&self, freq_hz: f64) -> RadarResult<()>;
    fn set_rx_freq(&self, freq_hz: f64) -> RadarResult<()>;

    /// Reads the `lo_locked` RX sensor.
    fn rx_lo_locked(&self) -> RadarResult<bool>;

    /// Applies a scheduling priority to the calling thread.
    fn set_thread_priority(&self, priority: f64) -> RadarResult<()>;

    fn tx_stream(&self) -> RadarResult<Box<dyn TxStream>>;
    fn rx_stream(&self) -> RadarResult<Box<dyn RxStream>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_spec_arithmetic() {
        let t = TimeSpec::from_secs(1.0) + 0.25;
        assert_eq!(t.secs(), 1.25);
        assert_eq!(t - TimeSpec::from_secs(1.0), 0.25);
    }

    #[test]
    fn stream_command_without_time_streams_now() {
        assert!(StreamCommand::start(None).stream_now());
        assert!(!StreamCommand::start(Some(TimeSpec::from_secs(0.5))).stream_now());
        assert_eq!(StreamCommand::stop_now().mode, StreamMode::StopContinuous);
    }
}
