use crate::device::{TimeSpec, TxMetadata, TxStream};
use crate::prelude::{RadarResult, Sample, BURST_SEND_TIMEOUT, ZERO_SAMPLE};
use crate::telemetry::{LogManager, StreamMetrics};
use crate::transmit::TxCounters;
use crate::waveform::ArmedWaveform;
use std::sync::Arc;

/// Timed pulses at a fixed PRF, each closed by a short zero trailer.
///
/// Pulse `n` after the last re-anchor is tagged `anchor + n / prf`, so send
/// latency never accumulates into the schedule.
pub struct BurstTransmitter {
    waveform: Arc<ArmedWaveform>,
    trailer: Vec<Sample>,
    prf: f64,
    anchor: TimeSpec,
    pulses_since_anchor: u64,
    logger: LogManager,
}

impl BurstTransmitter {
    pub fn new(waveform: Arc<ArmedWaveform>, prf: f64, first_pulse: TimeSpec) -> Self {
        let trailer = vec![ZERO_SAMPLE; waveform.samples.len() / 10];
        Self {
            waveform,
            trailer,
            prf,
            anchor: first_pulse,
            pulses_since_anchor: 0,
            logger: LogManager::new("tx"),
        }
    }

    /// Time tag the next pulse will carry.
    pub fn next_pulse_time(&self) -> TimeSpec {
        self.anchor + self.pulses_since_anchor as f64 / self.prf
    }

    /// Switches to a newly claimed waveform from the next pulse on. A new
    /// PRF takes effect from the slot that is already scheduled.
    pub fn adopt(&mut self, waveform: Arc<ArmedWaveform>) {
        if let Some(prf) = waveform.mode.prf() {
            if prf != self.prf {
                self.anchor = self.next_pulse_time();
                self.pulses_since_anchor = 0;
                self.prf = prf;
            }
        }
        self.trailer.resize(waveform.samples.len() / 10, ZERO_SAMPLE);
        self.logger.detail(&format!(
            "adopted {} sample pulse at {} Hz",
            waveform.samples.len(),
            self.prf
        ));
        self.waveform = waveform;
    }

    /// Sends one pulse and its end-of-burst trailer, then advances the
    /// schedule by one PRI.
    pub fn transmit_pulse(
        &mut self,
        stream: &mut dyn TxStream,
        counters: &TxCounters,
        metrics: &StreamMetrics,
    ) -> RadarResult<usize> {
        let pulse = TxMetadata {
            start_of_burst: true,
            end_of_burst: false,
            time_spec: Some(self.next_pulse_time()),
        };
        let sent = match stream.send(&self.waveform.samples, &pulse, BURST_SEND_TIMEOUT) {
            Ok(sent) => {
                if sent < self.waveform.samples.len() {
                    self.logger.warn(&format!(
                        "short pulse send: {} of {} samples",
                        sent,
                        self.waveform.samples.len()
                    ));
                }
                sent
            }
            Err(err) if err.is_transient() => {
                metrics.record_tx_timeout();
                self.logger.warn(&format!("pulse send: {}", err));
                0
            }
            Err(err) => return Err(err),
        };

        let trailer = TxMetadata {
            start_of_burst: false,
            end_of_burst: true,
            time_spec: None,
        };
        if let Err(err) = stream.send(&self.trailer, &trailer, BURST_SEND_TIMEOUT) {
            if !err.is_transient() {
                return Err(err);
            }
            metrics.record_tx_timeout();
            self.logger.warn(&format!("burst trailer send: {}", err));
        }

        self.pulses_since_anchor += 1;
        counters.record(sent);
        Ok(sent)
    }
}
