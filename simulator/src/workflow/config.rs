use crate::generator::pulse::PulseConfig;
use anyhow::Context;
use pulsecore::metadata::MetadataKeys;
use pulsecore::prelude::DEFAULT_BURST_DELAY_S;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Session profile driven by the simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub device_args: String,
    pub sample_rate: f64,
    pub tx_gain: f64,
    pub rx_gain: f64,
    pub tx_freq: f64,
    pub rx_freq: f64,
    pub start_time: f64,
    pub tx_thread_priority: f64,
    pub rx_thread_priority: f64,
    pub burst_delay_s: f64,
    /// Pulse repetition frequency; absent means continuous transmission.
    pub prf: Option<f64>,
    /// Seconds to stream before stopping.
    pub duration: f64,
    pub calibration: Option<PathBuf>,
    /// JSON-lines file receiving the emitted records.
    pub output: Option<PathBuf>,
    pub metadata_keys: MetadataKeys,
    pub pulse: PulseConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            device_args: "type=X310".into(),
            sample_rate: 1e6,
            tx_gain: 0.0,
            rx_gain: 0.0,
            tx_freq: 1e9,
            rx_freq: 1e9,
            start_time: 0.0,
            tx_thread_priority: 0.0,
            rx_thread_priority: 0.0,
            burst_delay_s: DEFAULT_BURST_DELAY_S,
            prf: Some(1e3),
            duration: 1.0,
            calibration: None,
            output: None,
            metadata_keys: MetadataKeys::default(),
            pulse: PulseConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(sample_rate: f64, prf: Option<f64>, pulse_len: usize, duration: f64) -> Self {
        Self {
            sample_rate,
            prf,
            duration,
            pulse: PulseConfig {
                pulse_len,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
