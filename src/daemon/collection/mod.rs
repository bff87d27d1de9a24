//! Turns browser observations into attributed seconds. [tracker::TrackerModule] owns the
//! [sampler::Sampler] and processes signals, commands and timer ticks one at a time.

pub mod domain;
pub mod idle;
pub mod sampler;
pub mod signals;
pub mod tracker;
