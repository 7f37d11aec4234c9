use serde::Serialize;
use std::sync::Mutex;

/// Streaming anomalies and output counts for one session.
pub struct StreamMetrics {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub tx_timeouts: u64,
    pub rx_timeouts: u64,
    pub rx_overflows: u64,
    pub records_emitted: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_tx_timeout(&self) {
        self.update(|m| m.tx_timeouts += 1);
    }

    pub fn record_rx_timeout(&self) {
        self.update(|m| m.rx_timeouts += 1);
    }

    pub fn record_rx_overflow(&self) {
        self.update(|m| m.rx_overflows += 1);
    }

    pub fn record_emitted(&self) {
        self.update(|m| m.records_emitted += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}
