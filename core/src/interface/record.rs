use crate::metadata::PulseMetadata;
use crate::prelude::{RadarError, RadarResult, Sample};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// One completed pulse-repetition interval and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseRecord {
    pub metadata: PulseMetadata,
    pub samples: Vec<Sample>,
}

impl PulseRecord {
    pub fn new(metadata: PulseMetadata, samples: Vec<Sample>) -> Self {
        Self { metadata, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Outbound transport for completed records.
pub trait PulseSink: Send + Sync {
    fn publish(&self, record: PulseRecord) -> RadarResult<()>;
}

impl PulseSink for UnboundedSender<PulseRecord> {
    fn publish(&self, record: PulseRecord) -> RadarResult<()> {
        self.send(record).map_err(|_| RadarError::SinkClosed)
    }
}

/// Adapts a closure into a [`PulseSink`].
pub struct FnSink<F>(pub F);

impl<F> PulseSink for FnSink<F>
where
    F: Fn(PulseRecord) + Send + Sync,
{
    fn publish(&self, record: PulseRecord) -> RadarResult<()> {
        (self.0)(record);
        Ok(())
    }
}
