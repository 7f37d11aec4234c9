//! Receive engine: drives the RX stream and frames it into PRI records.

use crate::context::SessionContext;
use crate::device::{RxStream, StreamCommand};
use crate::interface::{PulseRecord, PulseSink};
use crate::prelude::{RadarError, RadarResult, Sample, RECV_TIMEOUT, ZERO_SAMPLE};
use crate::telemetry::LogManager;
use std::sync::Arc;
use std::time::Duration;

/// Cuts a continuous sample stream into fixed-length records, dropping the
/// calibration delay from the very start of the stream once.
#[derive(Debug)]
pub struct RecordFramer {
    buffer: Vec<Sample>,
    cursor: usize,
    pending_discard: u64,
    framed: u64,
}

impl RecordFramer {
    pub fn new(record_len: usize, discard: u64) -> Self {
        Self {
            buffer: vec![ZERO_SAMPLE; record_len],
            cursor: 0,
            pending_discard: discard,
            framed: 0,
        }
    }

    pub fn record_len(&self) -> usize {
        self.buffer.len()
    }

    /// Samples handed out in completed records so far.
    pub fn samples_framed(&self) -> u64 {
        self.framed
    }

    /// Delay samples still to be dropped.
    pub fn pending_discard(&self) -> u64 {
        self.pending_discard
    }

    /// Free space in the current record, capped at `max` samples.
    pub fn window(&mut self, max: usize) -> &mut [Sample] {
        let end = (self.cursor + max).min(self.buffer.len());
        &mut self.buffer[self.cursor..end]
    }

    /// Accounts for `received` samples written into the last window.
    pub fn commit(&mut self, received: usize) {
        let skip = (self.pending_discard.min(received as u64)) as usize;
        if skip > 0 {
            let start = self.cursor;
            self.buffer
                .copy_within(start + skip..start + received, start);
            self.pending_discard -= skip as u64;
        }
        self.cursor += received - skip;
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.buffer.len()
    }

    /// Copies out the completed record and rewinds the write cursor.
    pub fn take(&mut self) -> Option<Vec<Sample>> {
        if !self.is_complete() {
            return None;
        }
        self.cursor = 0;
        self.framed += self.buffer.len() as u64;
        Some(self.buffer.clone())
    }
}

pub struct ReceiveEngine {
    context: Arc<SessionContext>,
    stream: Box<dyn RxStream>,
    sink: Arc<dyn PulseSink>,
    framer: RecordFramer,
    logger: LogManager,
    resize_warned: bool,
    sink_warned: bool,
}

impl ReceiveEngine {
    pub fn new(
        context: Arc<SessionContext>,
        stream: Box<dyn RxStream>,
        sink: Arc<dyn PulseSink>,
        record_len: usize,
    ) -> Self {
        Self {
            context,
            stream,
            sink,
            framer: RecordFramer::new(record_len, 0),
            logger: LogManager::new("rx"),
            resize_warned: false,
            sink_warned: false,
        }
    }

    /// Start command for this session. Burst sessions start late by the
    /// leading-edge delay so the full first pulse lands in the first record.
    fn start_command(&self) -> StreamCommand {
        let anchor = self.context.anchor;
        if !anchor.timed {
            return StreamCommand::start(None);
        }
        let mut at = anchor.time;
        if self.context.mode.is_burst() {
            at = at + self.context.settings.burst_delay_s;
        }
        StreamCommand::start(Some(at))
    }

    /// Streams until the session is finished, then stops the RX stream.
    pub fn run(mut self) -> RadarResult<()> {
        let priority = self.context.settings.rx_thread_priority;
        if priority != 0.0 {
            if let Err(err) = self.context.device.set_thread_priority(priority) {
                self.logger
                    .warn(&format!("could not apply priority {}: {}", priority, err));
            }
        }

        let command = self.start_command();
        // The calibration delay is only deterministic for timed starts.
        if !command.stream_now() && self.context.calibration_delay > 0 {
            self.framer =
                RecordFramer::new(self.framer.record_len(), self.context.calibration_delay);
        }
        self.stream.issue_stream_cmd(command)?;
        self.logger.record(&format!(
            "streaming {} sample records, calibration delay {}",
            self.framer.record_len(),
            self.framer.pending_discard()
        ));

        let result = self.stream_loop();

        let stopped = self.stream.issue_stream_cmd(StreamCommand::stop_now());
        self.logger.record(&format!(
            "stopped after {} records",
            self.context.metrics.snapshot().records_emitted
        ));
        result.and(stopped)
    }

    fn stream_loop(&mut self) -> RadarResult<()> {
        let max = self.stream.max_samples_per_call().max(1);
        let start_offset = Duration::from_secs_f64(self.context.settings.start_time.max(0.0));
        let mut timeout = RECV_TIMEOUT + start_offset;
        let mut first_packet = true;

        while !self.context.shutdown.is_requested() {
            let window = self.framer.window(max);
            match self.stream.recv(window, timeout) {
                Ok(outcome) => {
                    timeout = RECV_TIMEOUT;
                    if first_packet {
                        first_packet = false;
                        if let Some(at) = outcome.time_spec {
                            self.logger.detail(&format!("first samples at {}", at));
                        }
                    }
                    if outcome.overflow {
                        self.context.metrics.record_rx_overflow();
                        self.logger.detail("overflow");
                    }
                    self.framer.commit(outcome.num_samples);
                }
                Err(err) if err.is_transient() => {
                    self.context.metrics.record_rx_timeout();
                    self.logger.warn(&format!("recv: {}", err));
                    continue;
                }
                Err(err) => return Err(err),
            }

            if let Some(samples) = self.framer.take() {
                self.emit(samples);
            }
        }
        Ok(())
    }

    fn emit(&mut self, samples: Vec<Sample>) {
        let metadata = self
            .context
            .control
            .metadata()
            .take_for_record(self.framer.samples_framed());
        match self.sink.publish(PulseRecord::new(metadata, samples)) {
            Ok(()) => self.context.metrics.record_emitted(),
            Err(RadarError::SinkClosed) if !self.sink_warned => {
                self.sink_warned = true;
                self.logger.warn("record consumer closed; dropping records");
            }
            Err(RadarError::SinkClosed) => {}
            Err(err) => self.logger.warn(&format!("publish: {}", err)),
        }
        self.check_record_length();
    }

    fn check_record_length(&mut self) {
        if self.resize_warned {
            return;
        }
        let Some(shape) = self.context.control.channel.latest() else {
            return;
        };
        let wanted = shape
            .mode
            .record_length(self.context.settings.sample_rate, shape.len);
        if shape.mode.same_kind(&self.context.mode) && wanted != self.framer.record_len() {
            self.resize_warned = true;
            self.logger.warn(&format!(
                "armed waveform needs {} sample records but this session frames {}; \
                 restart to apply",
                wanted,
                self.framer.record_len()
            ));
        }
    }
}
