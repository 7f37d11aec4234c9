use super::TransmitMode;
use crate::prelude::{RadarError, RadarResult, Sample, DEFAULT_BURST_DELAY_S, ZERO_SAMPLE};
use crate::context::ShutdownFlag;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Waveform handed to the transmit engine by `claim`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmedWaveform {
    pub samples: Vec<Sample>,
    pub mode: TransmitMode,
}

/// Length and mode of the most recently armed waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformShape {
    /// Length as transmitted, padding included.
    pub len: usize,
    pub mode: TransmitMode,
}

#[derive(Debug, Clone, Copy)]
struct Padding {
    sample_rate: f64,
    burst_delay_s: f64,
}

impl Padding {
    fn prefix_len(&self) -> usize {
        (self.sample_rate * self.burst_delay_s).round().max(0.0) as usize
    }
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Arc<ArmedWaveform>>,
    armed: bool,
}

/// Single-slot hand-off between the control thread and the transmit engine.
///
/// At most one armed waveform is pending at a time; arming again replaces
/// it. Buffers are immutable once published and swapped as a whole under the
/// slot lock, so a claimer sees either the previous or the newest waveform,
/// never a mix.
#[derive(Debug)]
pub struct WaveformChannel {
    slot: Mutex<Slot>,
    armed: Condvar,
    padding: Mutex<Padding>,
}

impl WaveformChannel {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            armed: Condvar::new(),
            padding: Mutex::new(Padding {
                sample_rate,
                burst_delay_s: DEFAULT_BURST_DELAY_S,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn padding(&self) -> MutexGuard<'_, Padding> {
        self.padding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.padding().sample_rate = sample_rate;
    }

    pub fn set_burst_delay(&self, burst_delay_s: f64) {
        self.padding().burst_delay_s = burst_delay_s;
    }

    /// Zero samples prepended to burst-mode waveforms.
    pub fn burst_prefix_len(&self) -> usize {
        self.padding().prefix_len()
    }

    /// Publishes a new waveform, replacing any armed-but-unclaimed one.
    /// Burst waveforms get the leading-edge zero prefix before they become
    /// visible.
    pub fn arm(&self, samples: Vec<Sample>, mode: TransmitMode) -> RadarResult<()> {
        if samples.is_empty() {
            return Err(RadarError::InvalidWaveform("waveform has no samples".into()));
        }
        let samples = if mode.is_burst() {
            let prefix = self.burst_prefix_len();
            let mut padded = Vec::with_capacity(prefix + samples.len());
            padded.resize(prefix, ZERO_SAMPLE);
            padded.extend_from_slice(&samples);
            padded
        } else {
            samples
        };

        let waveform = Arc::new(ArmedWaveform { samples, mode });
        {
            let mut slot = self.slot();
            if slot.armed {
                log::debug!("replacing unclaimed waveform");
            }
            slot.latest = Some(waveform);
            slot.armed = true;
        }
        self.armed.notify_all();
        Ok(())
    }

    /// Takes the armed waveform, clearing the armed state. `None` when
    /// nothing new was armed since the last claim.
    pub fn claim(&self) -> Option<Arc<ArmedWaveform>> {
        let mut slot = self.slot();
        if !slot.armed {
            return None;
        }
        slot.armed = false;
        slot.latest.clone()
    }

    /// Takes the most recent waveform whether or not it was already claimed.
    /// Used when a new session starts streaming.
    pub fn claim_latest(&self) -> Option<Arc<ArmedWaveform>> {
        let mut slot = self.slot();
        slot.armed = false;
        slot.latest.clone()
    }

    pub fn is_armed(&self) -> bool {
        self.slot().armed
    }

    pub fn latest(&self) -> Option<WaveformShape> {
        self.slot().latest.as_ref().map(|w| WaveformShape {
            len: w.samples.len(),
            mode: w.mode,
        })
    }

    /// Blocks until a waveform has been armed at least once. Returns `false`
    /// if `shutdown` was requested first; the flag is re-checked every `poll`.
    pub fn wait_until_armed(&self, shutdown: &ShutdownFlag, poll: Duration) -> bool {
        let mut slot = self.slot();
        loop {
            if slot.latest.is_some() {
                return true;
            }
            if shutdown.is_requested() {
                return false;
            }
            slot = match self.armed.wait_timeout(slot, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wakes every waiter so it can re-check the shutdown flag.
    pub fn wake_all(&self) {
        let _slot = self.slot();
        self.armed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;
    use std::sync::Arc;
    use std::thread;

    fn constant(value: f32, len: usize) -> Vec<Sample> {
        vec![Complex32::new(value, -value); len]
    }

    #[test]
    fn continuous_arm_is_not_padded() {
        let channel = WaveformChannel::new(1e6);
        channel
            .arm(constant(1.0, 500), TransmitMode::Continuous)
            .unwrap();
        assert!(channel.is_armed());
        let claimed = channel.claim().unwrap();
        assert_eq!(claimed.samples.len(), 500);
        assert!(!channel.is_armed());
        assert!(channel.claim().is_none());
    }

    #[test]
    fn burst_arm_prepends_zero_prefix() {
        let channel = WaveformChannel::new(10e6);
        channel.set_burst_delay(2e-6);
        assert_eq!(channel.burst_prefix_len(), 20);
        channel
            .arm(constant(1.0, 100), TransmitMode::Burst { prf: 1000.0 })
            .unwrap();
        let claimed = channel.claim().unwrap();
        assert_eq!(claimed.samples.len(), 120);
        assert!(claimed.samples[..20].iter().all(|s| *s == ZERO_SAMPLE));
        assert!(claimed.samples[20..].iter().all(|s| s.re == 1.0));
        assert_eq!(channel.latest().unwrap().len, 120);
    }

    #[test]
    fn rearm_replaces_unclaimed_waveform() {
        let channel = WaveformChannel::new(1e6);
        channel.arm(constant(1.0, 10), TransmitMode::Continuous).unwrap();
        channel.arm(constant(2.0, 20), TransmitMode::Continuous).unwrap();
        let claimed = channel.claim().unwrap();
        assert_eq!(claimed.samples.len(), 20);
        assert!(channel.claim().is_none());
    }

    #[test]
    fn claim_latest_returns_already_claimed_waveform() {
        let channel = WaveformChannel::new(1e6);
        assert!(channel.claim_latest().is_none());
        channel.arm(constant(3.0, 8), TransmitMode::Continuous).unwrap();
        let first = channel.claim().unwrap();
        let again = channel.claim_latest().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!channel.is_armed());
    }

    #[test]
    fn empty_waveform_is_rejected() {
        let channel = WaveformChannel::new(1e6);
        assert!(channel.arm(Vec::new(), TransmitMode::Continuous).is_err());
        assert!(channel.latest().is_none());
    }

    #[test]
    fn claims_never_observe_mixed_buffers() {
        let channel = Arc::new(WaveformChannel::new(1e6));
        channel.arm(constant(0.0, 64), TransmitMode::Continuous).unwrap();

        let writer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for round in 1..=500 {
                    let len = 32 + (round % 7) * 16;
                    channel
                        .arm(constant(round as f32, len), TransmitMode::Continuous)
                        .unwrap();
                }
            })
        };

        let mut last_seen = 0.0f32;
        while !writer.is_finished() || channel.is_armed() {
            if let Some(claimed) = channel.claim() {
                let first = claimed.samples[0];
                assert!(claimed.samples.iter().all(|s| *s == first));
                assert!(first.re >= last_seen);
                last_seen = first.re;
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn wait_returns_false_on_shutdown() {
        let channel = Arc::new(WaveformChannel::new(1e6));
        let shutdown = ShutdownFlag::new();
        let waiter = {
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || channel.wait_until_armed(&shutdown, Duration::from_millis(5)))
        };
        shutdown.request();
        channel.wake_all();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn wait_wakes_on_arm() {
        let channel = Arc::new(WaveformChannel::new(1e6));
        let shutdown = ShutdownFlag::new();
        let waiter = {
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || channel.wait_until_armed(&shutdown, Duration::from_secs(5)))
        };
        channel.arm(constant(1.0, 4), TransmitMode::Continuous).unwrap();
        assert!(waiter.join().unwrap());
        // Waiting does not consume the waveform.
        assert!(channel.is_armed());
    }
}
