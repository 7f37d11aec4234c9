//! Transmit engine: owns the TX stream and runs the burst or continuous
//! state machine against the waveform channel.

mod burst;
mod continuous;

pub use burst::BurstTransmitter;
pub use continuous::ContinuousTransmitter;

use crate::context::SessionContext;
use crate::device::TxStream;
use crate::prelude::{RadarResult, WAIT_POLL_INTERVAL};
use crate::telemetry::LogManager;
use crate::waveform::{ArmedWaveform, TransmitMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session totals, never reset while the session runs.
#[derive(Debug, Default)]
pub struct TxCounters {
    pulses: AtomicU64,
    samples: AtomicU64,
}

impl TxCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, samples: usize) {
        self.pulses.fetch_add(1, Ordering::AcqRel);
        self.samples.fetch_add(samples as u64, Ordering::AcqRel);
    }

    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Acquire)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Acquire)
    }
}

enum TxState {
    WaitingForData,
    Burst(BurstTransmitter),
    Continuous(ContinuousTransmitter),
}

pub struct TransmitEngine {
    context: Arc<SessionContext>,
    stream: Box<dyn TxStream>,
    logger: LogManager,
}

impl TransmitEngine {
    pub fn new(context: Arc<SessionContext>, stream: Box<dyn TxStream>) -> Self {
        Self {
            context,
            stream,
            logger: LogManager::new("tx"),
        }
    }

    /// Runs until the session is finished. The pulse or buffer in flight is
    /// always completed before returning.
    pub fn run(mut self) -> RadarResult<()> {
        let priority = self.context.settings.tx_thread_priority;
        if priority != 0.0 {
            if let Err(err) = self.context.device.set_thread_priority(priority) {
                self.logger
                    .warn(&format!("could not apply priority {}: {}", priority, err));
            }
        }

        let mut state = TxState::WaitingForData;
        while !self.context.shutdown.is_requested() {
            state = self.step(state)?;
        }

        if let TxState::Continuous(mut transmitter) = state {
            transmitter.finish(self.stream.as_mut())?;
        }
        self.logger.record(&format!(
            "stopped after {} pulses / {} samples",
            self.context.counters.pulses(),
            self.context.counters.samples()
        ));
        Ok(())
    }

    fn step(&mut self, state: TxState) -> RadarResult<TxState> {
        let ctx = self.context.clone();
        match state {
            TxState::WaitingForData => {
                if !ctx
                    .control
                    .channel
                    .wait_until_armed(&ctx.shutdown, WAIT_POLL_INTERVAL)
                {
                    return Ok(TxState::WaitingForData);
                }
                match ctx.control.channel.claim_latest() {
                    Some(waveform) => Ok(self.begin(waveform)),
                    None => Ok(TxState::WaitingForData),
                }
            }
            TxState::Burst(mut transmitter) => {
                if let Some(waveform) = ctx.control.channel.claim() {
                    self.open_annotation();
                    self.warn_on_mode_change(&waveform.mode);
                    transmitter.adopt(waveform);
                }
                transmitter.transmit_pulse(self.stream.as_mut(), &ctx.counters, &ctx.metrics)?;
                Ok(TxState::Burst(transmitter))
            }
            TxState::Continuous(mut transmitter) => {
                if let Some(waveform) = ctx.control.channel.claim() {
                    self.open_annotation();
                    self.warn_on_mode_change(&waveform.mode);
                    transmitter.adopt(waveform);
                }
                transmitter.transmit(self.stream.as_mut(), &ctx.counters, &ctx.metrics)?;
                Ok(TxState::Continuous(transmitter))
            }
        }
    }

    /// Leaves WaitingForData. The state machine follows the session mode,
    /// which was latched from the waveform armed when the session started.
    fn begin(&self, waveform: Arc<ArmedWaveform>) -> TxState {
        self.open_annotation();
        let anchor = self.context.anchor;
        match self.context.mode {
            TransmitMode::Burst { prf } => {
                let prf = waveform.mode.prf().unwrap_or(prf);
                self.logger.record(&format!(
                    "burst mode: {} samples per pulse at {} Hz from {}",
                    waveform.samples.len(),
                    prf,
                    anchor.time
                ));
                TxState::Burst(BurstTransmitter::new(waveform, prf, anchor.time))
            }
            TransmitMode::Continuous => {
                self.logger.record(&format!(
                    "continuous mode: {} sample buffer",
                    waveform.samples.len()
                ));
                let first = anchor.timed.then_some(anchor.time);
                TxState::Continuous(ContinuousTransmitter::new(waveform, first))
            }
        }
    }

    fn open_annotation(&self) {
        let sample_count = self.context.counters.samples();
        self.context
            .control
            .metadata()
            .start_annotation(sample_count);
    }

    fn warn_on_mode_change(&self, mode: &TransmitMode) {
        if !mode.same_kind(&self.context.mode) {
            self.logger.warn(&format!(
                "armed {:?} while running {:?}; mode change needs a session restart",
                mode, self.context.mode
            ));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{anchor_of, harness};
    use super::*;
    use crate::context::SessionSettings;
    use crate::device::{RadioDevice, SimConfig};
    use crate::prelude::ZERO_SAMPLE;
    use num_complex::Complex32;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn pulse(len: usize) -> Vec<crate::prelude::Sample> {
        (0..len).map(|i| Complex32::new(1.0 + i as f32, 0.0)).collect()
    }

    fn unpadded_settings() -> SessionSettings {
        SessionSettings {
            burst_delay_s: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn counters_accumulate() {
        let counters = TxCounters::new();
        counters.record(100);
        counters.record(100);
        assert_eq!(counters.pulses(), 2);
        assert_eq!(counters.samples(), 200);
    }

    #[test]
    fn burst_pulses_follow_prf_cadence() {
        let mode = TransmitMode::Burst { prf: 1000.0 };
        let h = harness(SimConfig::default(), unpadded_settings(), mode, 0);
        h.context.control.channel.arm(pulse(100), mode).unwrap();
        let log = h.device.log();

        let engine = TransmitEngine::new(h.context.clone(), h.device.tx_stream().unwrap());
        let worker = thread::spawn(move || engine.run());
        wait_for(|| h.context.counters.pulses() >= 2);
        h.shutdown.request();
        worker.join().unwrap().unwrap();

        let sends = log.tx_sends();
        let pulses: Vec<_> = sends.iter().filter(|s| s.metadata.start_of_burst).collect();
        let start = anchor_of(&h).secs();
        let t0 = pulses[0].metadata.time_spec.unwrap().secs();
        let t1 = pulses[1].metadata.time_spec.unwrap().secs();
        assert!((t0 - start).abs() < 1e-12);
        assert!((t1 - t0 - 1e-3).abs() < 1e-9);
        assert_eq!(pulses[0].len, 100);

        // Every pulse is closed by a tenth-length zero trailer.
        assert!(sends[1].metadata.end_of_burst);
        assert!(sends[1].metadata.time_spec.is_none());
        assert_eq!(sends[1].len, 10);

        let pulses_sent = h.context.counters.pulses();
        assert_eq!(h.context.counters.samples(), pulses_sent * 100);
    }

    #[test]
    fn two_burst_cycles_count_two_pulses() {
        let mode = TransmitMode::Burst { prf: 1000.0 };
        let h = harness(SimConfig::default(), unpadded_settings(), mode, 0);
        h.context.control.channel.arm(pulse(100), mode).unwrap();
        let waveform = h.context.control.channel.claim_latest().unwrap();

        let mut stream = h.device.tx_stream().unwrap();
        let mut transmitter = BurstTransmitter::new(waveform, 1000.0, anchor_of(&h));
        for _ in 0..2 {
            transmitter
                .transmit_pulse(stream.as_mut(), &h.context.counters, &h.context.metrics)
                .unwrap();
        }
        assert_eq!(h.context.counters.pulses(), 2);
        assert_eq!(h.context.counters.samples(), 200);
        assert!((transmitter.next_pulse_time() - anchor_of(&h) - 2e-3).abs() < 1e-9);
    }

    #[test]
    fn burst_cadence_ignores_send_latency() {
        let mode = TransmitMode::Burst { prf: 100.0 };
        let config = SimConfig {
            send_latency: vec![
                Duration::from_micros(100),
                Duration::ZERO,
                Duration::from_millis(4),
                Duration::ZERO,
                Duration::from_millis(1),
                Duration::ZERO,
            ],
            ..Default::default()
        };
        let h = harness(config, unpadded_settings(), mode, 0);
        h.context.control.channel.arm(pulse(50), mode).unwrap();
        let waveform = h.context.control.channel.claim_latest().unwrap();

        let mut stream = h.device.tx_stream().unwrap();
        let mut transmitter = BurstTransmitter::new(waveform, 100.0, anchor_of(&h));
        for _ in 0..6 {
            transmitter
                .transmit_pulse(stream.as_mut(), &h.context.counters, &h.context.metrics)
                .unwrap();
        }
        let tags: Vec<f64> = h
            .device
            .log()
            .tx_sends()
            .iter()
            .filter_map(|s| s.metadata.time_spec)
            .map(|t| t.secs())
            .collect();
        assert_eq!(tags.len(), 6);
        for (n, tag) in tags.iter().enumerate() {
            let expected = anchor_of(&h).secs() + n as f64 / 100.0;
            assert!((tag - expected).abs() < 1e-9, "pulse {} drifted", n);
        }
    }

    #[test]
    fn burst_rearm_swaps_buffer_and_opens_annotation() {
        let mode = TransmitMode::Burst { prf: 2000.0 };
        let settings = SessionSettings {
            sample_rate: 10e6,
            burst_delay_s: 1e-6,
            ..Default::default()
        };
        let config = SimConfig {
            record_tx_samples: true,
            ..Default::default()
        };
        let h = harness(config, settings, mode, 0);
        let channel = &h.context.control.channel;
        channel.arm(pulse(40), mode).unwrap();

        let mut stream = h.device.tx_stream().unwrap();
        let mut transmitter =
            BurstTransmitter::new(channel.claim_latest().unwrap(), 2000.0, anchor_of(&h));
        transmitter
            .transmit_pulse(stream.as_mut(), &h.context.counters, &h.context.metrics)
            .unwrap();

        channel
            .arm(vec![Complex32::new(-1.0, 0.0); 30], TransmitMode::Burst { prf: 1000.0 })
            .unwrap();
        let waveform = channel.claim().unwrap();
        transmitter.adopt(waveform);
        transmitter
            .transmit_pulse(stream.as_mut(), &h.context.counters, &h.context.metrics)
            .unwrap();

        let sends = h.device.log().tx_sends();
        let second = &sends[2];
        assert_eq!(second.len, 40);
        assert!(second.samples[..10].iter().all(|s| *s == ZERO_SAMPLE));
        assert!(second.samples[10..].iter().all(|s| s.re == -1.0));
        // Re-anchored at the slot that was already scheduled, then 1 ms apart.
        assert!((transmitter.next_pulse_time() - anchor_of(&h) - 0.5e-3 - 1e-3).abs() < 1e-9);
    }

    #[test]
    fn continuous_stream_marks_only_first_send() {
        let settings = SessionSettings {
            start_time: 0.01,
            ..Default::default()
        };
        let h = harness(SimConfig::default(), settings, TransmitMode::Continuous, 0);
        h.context
            .control
            .channel
            .arm(pulse(500), TransmitMode::Continuous)
            .unwrap();
        let log = h.device.log();

        let engine = TransmitEngine::new(h.context.clone(), h.device.tx_stream().unwrap());
        let worker = thread::spawn(move || engine.run());
        wait_for(|| log.tx_send_count() >= 3);
        h.shutdown.request();
        worker.join().unwrap().unwrap();

        let sends = log.tx_sends();
        let (last, data) = sends.split_last().unwrap();
        assert!(data.iter().all(|s| s.len == 500));
        assert!(data[0].metadata.start_of_burst);
        assert_eq!(data[0].metadata.time_spec, Some(anchor_of(&h)));
        assert!(data[1..]
            .iter()
            .all(|s| !s.metadata.start_of_burst && s.metadata.time_spec.is_none()));
        assert_eq!(last.len, 0);
        assert!(last.metadata.end_of_burst);
    }

    #[test]
    fn shutdown_while_waiting_returns_cleanly() {
        let h = harness(
            SimConfig::default(),
            SessionSettings::default(),
            TransmitMode::Continuous,
            0,
        );
        let engine = TransmitEngine::new(h.context.clone(), h.device.tx_stream().unwrap());
        let worker = thread::spawn(move || engine.run());
        thread::sleep(Duration::from_millis(5));
        h.shutdown.request();
        h.context.control.channel.wake_all();
        worker.join().unwrap().unwrap();
        assert_eq!(h.device.log().tx_send_count(), 0);
    }

    #[test]
    fn tx_priority_is_applied_on_engine_thread() {
        let settings = SessionSettings {
            tx_thread_priority: 0.75,
            ..Default::default()
        };
        let h = harness(SimConfig::default(), settings, TransmitMode::Continuous, 0);
        h.shutdown.request();
        TransmitEngine::new(h.context.clone(), h.device.tx_stream().unwrap())
            .run()
            .unwrap();
        assert_eq!(h.device.log().thread_priorities(), vec![0.75]);
    }
}
