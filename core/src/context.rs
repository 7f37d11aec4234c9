//! State shared between the control thread and the streaming threads.

use crate::calibration::CalibrationTable;
use crate::device::{RadioDevice, TimeSpec};
use crate::metadata::{MetadataKeys, MetadataStore};
use crate::prelude::DEFAULT_BURST_DELAY_S;
use crate::telemetry::StreamMetrics;
use crate::transmit::TxCounters;
use crate::waveform::{TransmitMode, WaveformChannel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Tunables read once at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub sample_rate: f64,
    /// Offset from "now" at which streaming starts; zero starts immediately.
    pub start_time: f64,
    pub tx_thread_priority: f64,
    pub rx_thread_priority: f64,
    /// Zero prefix and RX start offset compensating the burst leading-edge
    /// cut-off.
    pub burst_delay_s: f64,
    pub lo_lock_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sample_rate: 1e6,
            start_time: 0.0,
            tx_thread_priority: 0.0,
            rx_thread_priority: 0.0,
            burst_delay_s: DEFAULT_BURST_DELAY_S,
            lo_lock_timeout_ms: 5_000,
        }
    }
}

/// Long-lived state owned by the control facade. Survives session restarts.
#[derive(Debug)]
pub struct ControlState {
    pub channel: WaveformChannel,
    metadata: Mutex<MetadataStore>,
    calibration: Mutex<CalibrationTable>,
    settings: Mutex<SessionSettings>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ControlState {
    pub fn new(settings: SessionSettings, keys: MetadataKeys) -> Self {
        let channel = WaveformChannel::new(settings.sample_rate);
        channel.set_burst_delay(settings.burst_delay_s);
        Self {
            channel,
            metadata: Mutex::new(MetadataStore::new(keys)),
            calibration: Mutex::new(CalibrationTable::default()),
            settings: Mutex::new(settings),
        }
    }

    pub fn metadata(&self) -> MutexGuard<'_, MetadataStore> {
        relock(&self.metadata)
    }

    pub fn settings(&self) -> SessionSettings {
        relock(&self.settings).clone()
    }

    pub fn update_settings(&self, apply: impl FnOnce(&mut SessionSettings)) {
        let mut settings = relock(&self.settings);
        apply(&mut settings);
        self.channel.set_sample_rate(settings.sample_rate);
        self.channel.set_burst_delay(settings.burst_delay_s);
    }

    pub fn set_calibration(&self, table: CalibrationTable) {
        *relock(&self.calibration) = table;
    }

    pub fn calibration_delay(&self, model: &str, sample_rate: f64, master_clock_rate: f64) -> u64 {
        relock(&self.calibration).lookup(model, sample_rate, master_clock_rate)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(SessionSettings::default(), MetadataKeys::default())
    }
}

/// Session-finished flag. Only the coordinator raises it; engines poll it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn request(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Shared hardware time reference both engines start from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionAnchor {
    pub time: TimeSpec,
    /// Streams were started with timed commands rather than "now".
    pub timed: bool,
}

/// Everything one session's engines need, passed explicitly to each.
pub struct SessionContext {
    pub control: Arc<ControlState>,
    pub device: Arc<dyn RadioDevice>,
    pub settings: SessionSettings,
    pub anchor: SessionAnchor,
    pub mode: TransmitMode,
    pub calibration_delay: u64,
    pub counters: Arc<TxCounters>,
    pub metrics: Arc<StreamMetrics>,
    pub shutdown: ShutdownFlag,
}
