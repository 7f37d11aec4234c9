use crate::metadata::ANNOTATIONS_KEY;
use crate::prelude::Sample;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound message carrying a new waveform and its metadata.
///
/// The PRF entry of the `annotations` object, when present, selects burst
/// mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub samples: Vec<Sample>,
}

impl ControlEvent {
    pub fn new(samples: Vec<Sample>, metadata: Map<String, Value>) -> Self {
        Self { metadata, samples }
    }

    /// Event whose annotation carries no PRF; transmitted continuously.
    pub fn continuous(samples: Vec<Sample>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(ANNOTATIONS_KEY.to_string(), Value::Object(Map::new()));
        Self::new(samples, metadata)
    }

    /// Event that only replaces the waveform; the session keeps its mode.
    pub fn waveform_only(samples: Vec<Sample>) -> Self {
        Self::new(samples, Map::new())
    }

    /// Event whose annotation carries `prf` under `prf_key`.
    pub fn burst(samples: Vec<Sample>, prf_key: &str, prf: f64) -> Self {
        let mut annotation = Map::new();
        annotation.insert(prf_key.to_string(), Value::from(prf));
        let mut metadata = Map::new();
        metadata.insert(ANNOTATIONS_KEY.to_string(), Value::Object(annotation));
        Self::new(samples, metadata)
    }
}
