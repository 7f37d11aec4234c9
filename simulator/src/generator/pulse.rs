use anyhow::ensure;
use num_complex::Complex32;
use pulsecore::interface::ControlEvent;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::f32::consts::PI;

/// Configuration for generating a synthetic phase-coded pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub pulse_len: usize,
    /// Number of phase chips across the pulse.
    pub chips: usize,
    pub amplitude: f32,
    pub seed: u64,
    pub label: Option<String>,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            pulse_len: 100,
            chips: 13,
            amplitude: 0.7,
            seed: 0,
            label: None,
        }
    }
}

/// Random binary phase code, held constant over each chip.
pub fn build_pulse(config: &PulseConfig) -> anyhow::Result<Vec<Complex32>> {
    ensure!(config.pulse_len > 0, "pulse length must be positive");
    let chips = config.chips.clamp(1, config.pulse_len);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let code: Vec<f32> = (0..chips)
        .map(|_| if rng.gen_bool(0.5) { 0.0 } else { PI })
        .collect();

    let chip_len = config.pulse_len.div_ceil(chips);
    Ok((0..config.pulse_len)
        .map(|i| Complex32::from_polar(config.amplitude, code[(i / chip_len).min(chips - 1)]))
        .collect())
}

/// Wraps a generated pulse in a control event. A PRF selects burst mode.
pub fn build_event(
    config: &PulseConfig,
    prf: Option<f64>,
    prf_key: &str,
) -> anyhow::Result<ControlEvent> {
    let samples = build_pulse(config)?;
    let mut event = match prf {
        Some(prf) => ControlEvent::burst(samples, prf_key, prf),
        None => ControlEvent::continuous(samples),
    };

    let mut global = Map::new();
    global.insert("core:datatype".into(), json!("cf32_le"));
    if let Some(label) = &config.label {
        global.insert("core:description".into(), Value::from(label.clone()));
    }
    event.metadata.insert("global".into(), Value::Object(global));
    Ok(event)
}
