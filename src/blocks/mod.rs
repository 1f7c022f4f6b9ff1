//! Minimal block library
//!
//! Enough sources, transforms, and sinks to exercise every runtime
//! operation end-to-end. A full DSP block library (filters, mixers,
//! demodulators) lives outside this crate and builds on the same
//! [`Block`](crate::runtime::Block) contract.

mod gain;
mod multiply;
mod sinks;
mod sources;
mod throttle;

pub use gain::Gain;
pub use multiply::Multiply;
pub use sinks::{JsonSink, VectorSink};
pub use sources::{PacketSource, VectorSource};
pub use throttle::Throttle;
