pub mod event;
pub mod record;

pub use event::ControlEvent;
pub use record::{FnSink, PulseRecord, PulseSink};
