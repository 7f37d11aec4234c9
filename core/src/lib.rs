//! Core of the pulsed/continuous radar streaming engine.
//!
//! A control facade arms waveforms and tunes the radio; a session runs a
//! transmit engine and a receive engine from one hardware time reference and
//! publishes fixed-length receive records with their metadata.

pub mod calibration;
pub mod context;
pub mod controller;
pub mod device;
pub mod interface;
pub mod metadata;
pub mod prelude;
pub mod receive;
pub mod session;
pub mod telemetry;
pub mod transmit;
pub mod waveform;

pub use controller::RadarController;
pub use interface::{ControlEvent, PulseRecord, PulseSink};
pub use prelude::{RadarError, RadarResult, Sample};
pub use session::SessionReport;
