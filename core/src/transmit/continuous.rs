use crate::device::{TimeSpec, TxMetadata, TxStream};
use crate::prelude::{RadarResult, CONTINUOUS_SEND_TIMEOUT};
use crate::telemetry::{LogManager, StreamMetrics};
use crate::transmit::TxCounters;
use crate::waveform::ArmedWaveform;
use std::sync::Arc;

/// One unbroken stream repeating the buffer. Only the first send starts the
/// burst and carries a time tag.
pub struct ContinuousTransmitter {
    waveform: Arc<ArmedWaveform>,
    metadata: TxMetadata,
    logger: LogManager,
}

impl ContinuousTransmitter {
    pub fn new(waveform: Arc<ArmedWaveform>, first_send: Option<TimeSpec>) -> Self {
        Self {
            waveform,
            metadata: TxMetadata {
                start_of_burst: true,
                end_of_burst: false,
                time_spec: first_send,
            },
            logger: LogManager::new("tx"),
        }
    }

    /// Swaps buffers between two sends; the stream itself is not interrupted.
    pub fn adopt(&mut self, waveform: Arc<ArmedWaveform>) {
        self.logger.detail(&format!(
            "adopted {} sample buffer",
            waveform.samples.len()
        ));
        self.waveform = waveform;
    }

    pub fn transmit(
        &mut self,
        stream: &mut dyn TxStream,
        counters: &TxCounters,
        metrics: &StreamMetrics,
    ) -> RadarResult<usize> {
        let sent = match stream.send(
            &self.waveform.samples,
            &self.metadata,
            CONTINUOUS_SEND_TIMEOUT,
        ) {
            Ok(sent) => sent,
            Err(err) if err.is_transient() => {
                metrics.record_tx_timeout();
                self.logger.warn(&format!("continuous send: {}", err));
                0
            }
            Err(err) => return Err(err),
        };
        self.metadata.time_spec = None;
        self.metadata.start_of_burst = false;
        counters.record(sent);
        Ok(sent)
    }

    /// Closes the stream with an empty end-of-burst send.
    pub fn finish(&mut self, stream: &mut dyn TxStream) -> RadarResult<()> {
        let end = TxMetadata {
            start_of_burst: false,
            end_of_burst: true,
            time_spec: None,
        };
        stream.send(&[], &end, CONTINUOUS_SEND_TIMEOUT)?;
        Ok(())
    }
}
