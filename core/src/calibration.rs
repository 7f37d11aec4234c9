use crate::prelude::{RadarError, RadarResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// One measured TX-to-RX delay for a clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub samp_rate: f64,
    pub master_clock_rate: f64,
    pub delay: u64,
}

/// Per-radio-model table of sample delays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable {
    models: HashMap<String, Vec<CalibrationEntry>>,
}

impl CalibrationTable {
    pub fn from_json(contents: &str) -> RadarResult<Self> {
        serde_json::from_str(contents).map_err(|err| RadarError::Calibration(err.to_string()))
    }

    /// Loads a calibration file. A missing file yields an empty table.
    pub fn load<P: AsRef<Path>>(path: P) -> RadarResult<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!("No calibration file found at {}", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn insert(&mut self, model: &str, entry: CalibrationEntry) {
        self.models.entry(model.to_string()).or_default().push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Delay in samples for an exact rate match, or zero.
    pub fn lookup(&self, model: &str, sample_rate: f64, master_clock_rate: f64) -> u64 {
        let found = self.models.get(model).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.samp_rate == sample_rate && e.master_clock_rate == master_clock_rate)
        });
        match found {
            Some(entry) => entry.delay,
            None => {
                log::info!(
                    "No calibration data for radio {} at {} S/s with a {} Hz master clock",
                    model,
                    sample_rate,
                    master_clock_rate
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "X310": [
            {"samp_rate": 10e6, "master_clock_rate": 200e6, "delay": 57},
            {"samp_rate": 20e6, "master_clock_rate": 200e6, "delay": 63},
            {"samp_rate": 20e6, "master_clock_rate": 200e6, "delay": 99}
        ],
        "B210": [
            {"samp_rate": 10e6, "master_clock_rate": 30.72e6, "delay": 12}
        ]
    }"#;

    #[test]
    fn lookup_returns_first_exact_match() {
        let table = CalibrationTable::from_json(SAMPLE).unwrap();
        assert_eq!(table.lookup("X310", 10e6, 200e6), 57);
        assert_eq!(table.lookup("X310", 20e6, 200e6), 63);
        assert_eq!(table.lookup("B210", 10e6, 30.72e6), 12);
    }

    #[test]
    fn lookup_without_match_is_zero() {
        let table = CalibrationTable::from_json(SAMPLE).unwrap();
        assert_eq!(table.lookup("X310", 5e6, 200e6), 0);
        assert_eq!(table.lookup("N210", 10e6, 100e6), 0);
    }

    #[test]
    fn missing_file_is_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = CalibrationTable::load(dir.path().join("calibration.json")).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.lookup("X310", 10e6, 200e6), 0);
    }

    #[test]
    fn load_reads_file_and_rejects_garbage() {
        let mut good = NamedTempFile::new().unwrap();
        good.write_all(SAMPLE.as_bytes()).unwrap();
        let table = CalibrationTable::load(good.path()).unwrap();
        assert_eq!(table.lookup("X310", 10e6, 200e6), 57);

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"{\"X310\": 7}").unwrap();
        assert!(matches!(
            CalibrationTable::load(bad.path()),
            Err(RadarError::Calibration(_))
        ));
    }
}
