pub mod channel;

pub use channel::{ArmedWaveform, WaveformChannel, WaveformShape};

use serde::{Deserialize, Serialize};

/// How the armed waveform is put on the air.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransmitMode {
    /// Discrete timed pulses repeated at `prf` Hz.
    Burst { prf: f64 },
    /// One unbroken stream repeating the buffer.
    Continuous,
}

impl TransmitMode {
    pub fn from_prf(prf: Option<f64>) -> Self {
        match prf {
            Some(prf) => TransmitMode::Burst { prf },
            None => TransmitMode::Continuous,
        }
    }

    pub fn prf(&self) -> Option<f64> {
        match self {
            TransmitMode::Burst { prf } => Some(*prf),
            TransmitMode::Continuous => None,
        }
    }

    pub fn is_burst(&self) -> bool {
        matches!(self, TransmitMode::Burst { .. })
    }

    /// Same state machine, regardless of PRF.
    pub fn same_kind(&self, other: &TransmitMode) -> bool {
        self.is_burst() == other.is_burst()
    }

    /// Samples in one receive record: one PRI in burst mode, one buffer
    /// otherwise.
    pub fn record_length(&self, sample_rate: f64, waveform_len: usize) -> usize {
        match self {
            TransmitMode::Burst { prf } => (sample_rate / prf).round() as usize,
            TransmitMode::Continuous => waveform_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_selects_mode() {
        assert_eq!(
            TransmitMode::from_prf(Some(500.0)),
            TransmitMode::Burst { prf: 500.0 }
        );
        assert_eq!(TransmitMode::from_prf(None), TransmitMode::Continuous);
        assert!(TransmitMode::Burst { prf: 1.0 }.same_kind(&TransmitMode::Burst { prf: 2.0 }));
        assert!(!TransmitMode::Continuous.same_kind(&TransmitMode::Burst { prf: 2.0 }));
    }

    #[test]
    fn record_length_follows_mode() {
        assert_eq!(
            TransmitMode::Burst { prf: 1000.0 }.record_length(1e6, 100),
            1000
        );
        assert_eq!(TransmitMode::Continuous.record_length(1e6, 500), 500);
    }
}
