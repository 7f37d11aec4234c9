use num_complex::Complex32;
use std::time::Duration;

/// Complex baseband sample exchanged with the radio (fc32 on the host side).
pub type Sample = Complex32;

/// Zero-valued sample used for padding and burst trailers.
pub const ZERO_SAMPLE: Sample = Complex32 { re: 0.0, im: 0.0 };

/// Leading-edge cut-off measured on the X310 for timed bursts (seconds).
pub const DEFAULT_BURST_DELAY_S: f64 = 1.5e-6;

/// Timeout for each burst send.
pub const BURST_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for each continuous-mode send.
pub const CONTINUOUS_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Base timeout for each receive call.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll interval used while waiting for armed data.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Common error type for device, calibration and session operations.
#[derive(thiserror::Error, Debug)]
pub enum RadarError {
    #[error("failed to open device '{args}': {reason}")]
    DeviceOpen { args: String, reason: String },
    #[error("device failure: {0}")]
    Device(String),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("rx LO did not lock at {freq_hz} Hz within {waited:?}")]
    LoLockTimeout { freq_hz: f64, waited: Duration },
    #[error("calibration data invalid: {0}")]
    Calibration(String),
    #[error("invalid waveform: {0}")]
    InvalidWaveform(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("pulse record consumer has gone away")]
    SinkClosed,
    #[error("failed to spawn {0} thread")]
    ThreadSpawn(String),
    #[error("{0} thread panicked")]
    ThreadPanicked(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RadarError {
    /// Transient conditions that the streaming loops ride through.
    pub fn is_transient(&self) -> bool {
        matches!(self, RadarError::Timeout(_))
    }
}

pub type RadarResult<T> = Result<T, RadarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_transient() {
        assert!(RadarError::Timeout("recv".into()).is_transient());
        assert!(!RadarError::Device("gone".into()).is_transient());
        assert!(!RadarError::LoLockTimeout {
            freq_hz: 1e9,
            waited: Duration::from_secs(1)
        }
        .is_transient());
    }
}
