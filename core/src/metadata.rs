//! SigMF-style metadata carried alongside waveforms and pulse records.

use crate::prelude::{RadarError, RadarResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CAPTURES_KEY: &str = "captures";
pub const ANNOTATIONS_KEY: &str = "annotations";

/// Field names used inside the capture and annotation objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataKeys {
    pub center_freq: String,
    pub prf: String,
    pub sample_start: String,
}

impl Default for MetadataKeys {
    fn default() -> Self {
        Self {
            center_freq: "core:frequency".to_string(),
            prf: "radar:prf".to_string(),
            sample_start: "core:sample_start".to_string(),
        }
    }
}

/// Metadata attached to one emitted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseMetadata {
    #[serde(rename = "captures", default)]
    pub capture: Map<String, Value>,
    #[serde(rename = "annotations", default)]
    pub annotation: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PulseMetadata {
    fn starting_at(keys: &MetadataKeys, sample_start: u64) -> Self {
        let mut annotation = Map::new();
        annotation.insert(keys.sample_start.clone(), Value::from(sample_start));
        Self {
            annotation,
            ..Default::default()
        }
    }
}

/// Session-wide metadata accumulated until the next record is emitted.
///
/// The control thread merges inbound metadata and capture stamps, the
/// transmit thread opens a new annotation whenever it adopts a waveform, and
/// the receive thread takes the whole thing when a record completes.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    keys: MetadataKeys,
    pending: PulseMetadata,
    /// Last `annotations` object received; kept across records.
    session_annotation: Option<Map<String, Value>>,
}

impl MetadataStore {
    pub fn new(keys: MetadataKeys) -> Self {
        let mut pending = PulseMetadata::starting_at(&keys, 0);
        pending
            .capture
            .insert(keys.sample_start.clone(), Value::from(0u64));
        Self {
            keys,
            pending,
            session_annotation: None,
        }
    }

    pub fn keys(&self) -> &MetadataKeys {
        &self.keys
    }

    /// Switches the field vocabulary. Pending sample-start entries move to
    /// the new key.
    pub fn set_keys(&mut self, keys: MetadataKeys) {
        if keys.sample_start != self.keys.sample_start {
            for map in [&mut self.pending.capture, &mut self.pending.annotation] {
                if let Some(start) = map.remove(&self.keys.sample_start) {
                    map.insert(keys.sample_start.clone(), start);
                }
            }
        }
        self.keys = keys;
    }

    /// Merges inbound metadata and returns the PRF of the merged session
    /// annotation, if any.
    ///
    /// An `annotations` object replaces the previous one. Events without one
    /// keep the last annotation, so a waveform-only update stays in the
    /// current mode.
    pub fn merge_event(&mut self, incoming: &Map<String, Value>) -> RadarResult<Option<f64>> {
        let annotation = incoming
            .get(ANNOTATIONS_KEY)
            .and_then(Value::as_object)
            .or(self.session_annotation.as_ref());
        let prf = match annotation.and_then(|a| a.get(&self.keys.prf)) {
            Some(value) => Some(parse_prf(&self.keys.prf, value)?),
            None => None,
        };

        for (key, value) in incoming {
            match (key.as_str(), value) {
                (CAPTURES_KEY, Value::Object(capture)) => self.pending.capture = capture.clone(),
                (ANNOTATIONS_KEY, Value::Object(annotation)) => {
                    self.session_annotation = Some(annotation.clone())
                }
                _ => {
                    self.pending.extra.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(annotation) = &self.session_annotation {
            self.pending.annotation = annotation.clone();
        }
        Ok(prf)
    }

    pub fn stamp_center_frequency(&mut self, freq_hz: f64) {
        self.pending
            .capture
            .insert(self.keys.center_freq.clone(), Value::from(freq_hz));
    }

    /// Marks the start of a new pulse annotation at `sample_count`.
    pub fn start_annotation(&mut self, sample_count: u64) {
        self.pending
            .annotation
            .insert(self.keys.sample_start.clone(), Value::from(sample_count));
    }

    /// Hands over the accumulated metadata and resets to an empty
    /// capture/annotation pair whose annotation starts at `next_sample_start`.
    pub fn take_for_record(&mut self, next_sample_start: u64) -> PulseMetadata {
        let fresh = PulseMetadata::starting_at(&self.keys, next_sample_start);
        std::mem::replace(&mut self.pending, fresh)
    }

    pub fn snapshot(&self) -> PulseMetadata {
        self.pending.clone()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new(MetadataKeys::default())
    }
}

fn parse_prf(key: &str, value: &Value) -> RadarResult<f64> {
    match value.as_f64() {
        Some(prf) if prf.is_finite() && prf > 0.0 => Ok(prf),
        _ => Err(RadarError::InvalidConfig(format!(
            "'{}' must be a positive number, got {}",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_reads_prf_from_annotation() {
        let mut store = MetadataStore::default();
        let prf = store
            .merge_event(&as_map(json!({
                "annotations": {"radar:prf": 1000.0, "radar:bandwidth": 5e6},
                "global": {"core:datatype": "cf32_le"}
            })))
            .unwrap();
        assert_eq!(prf, Some(1000.0));
        let snap = store.snapshot();
        assert_eq!(snap.annotation["radar:bandwidth"], json!(5e6));
        assert!(snap.extra.contains_key("global"));
    }

    #[test]
    fn merge_without_prf_selects_none() {
        let mut store = MetadataStore::default();
        let prf = store
            .merge_event(&as_map(json!({"annotations": {"label": "cw"}})))
            .unwrap();
        assert_eq!(prf, None);
        assert_eq!(store.merge_event(&Map::new()).unwrap(), None);
    }

    #[test]
    fn waveform_only_event_keeps_session_prf() {
        let mut store = MetadataStore::default();
        store
            .merge_event(&as_map(json!({"annotations": {"radar:prf": 1000.0}})))
            .unwrap();
        store.take_for_record(100);

        let prf = store
            .merge_event(&as_map(json!({"global": {"core:datatype": "cf32_le"}})))
            .unwrap();
        assert_eq!(prf, Some(1000.0));
        assert_eq!(store.snapshot().annotation["radar:prf"], json!(1000.0));

        let prf = store
            .merge_event(&as_map(json!({"annotations": {}})))
            .unwrap();
        assert_eq!(prf, None);
    }

    #[test]
    fn new_sample_start_key_rekeys_pending_metadata() {
        let mut store = MetadataStore::default();
        store.set_keys(MetadataKeys {
            sample_start: "start".into(),
            ..Default::default()
        });
        let snap = store.snapshot();
        assert_eq!(snap.annotation["start"], json!(0));
        assert_eq!(snap.capture["start"], json!(0));
        assert!(!snap.annotation.contains_key("core:sample_start"));
    }

    #[test]
    fn merge_rejects_non_positive_prf() {
        let mut store = MetadataStore::default();
        let err = store
            .merge_event(&as_map(json!({"annotations": {"radar:prf": 0.0}})))
            .unwrap_err();
        assert!(matches!(err, RadarError::InvalidConfig(_)));
    }

    #[test]
    fn custom_keys_are_honoured() {
        let mut store = MetadataStore::new(MetadataKeys {
            center_freq: "fc".into(),
            prf: "prf".into(),
            sample_start: "start".into(),
        });
        store.stamp_center_frequency(3.2e9);
        let prf = store
            .merge_event(&as_map(json!({"annotations": {"prf": 250.0}})))
            .unwrap();
        assert_eq!(prf, Some(250.0));
        assert_eq!(store.snapshot().capture["fc"], json!(3.2e9));
    }

    #[test]
    fn take_resets_to_fresh_annotation() {
        let mut store = MetadataStore::default();
        store.stamp_center_frequency(1e9);
        store.start_annotation(42);

        let taken = store.take_for_record(1_000);
        assert_eq!(taken.capture["core:frequency"], json!(1e9));
        assert_eq!(taken.annotation["core:sample_start"], json!(42));

        let next = store.snapshot();
        assert!(next.capture.is_empty());
        assert_eq!(next.annotation["core:sample_start"], json!(1_000));
    }

    #[test]
    fn pulse_metadata_serializes_sigmf_layout() {
        let mut store = MetadataStore::default();
        store.stamp_center_frequency(2e9);
        let value = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(value["captures"]["core:frequency"], json!(2e9));
        assert_eq!(value["annotations"]["core:sample_start"], json!(0));
    }
}
