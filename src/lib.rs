//! Flow-graph DSP runtime with typed sample streams
//!
//! This library runs directed graphs of signal-processing blocks at
//! software-defined-radio rates. Blocks declare candidate type signatures;
//! at `start()` the runtime resolves one concrete signature per block,
//! propagates sample rates from the sources, allocates a back-pressured
//! ring per edge, and drives every block from its own worker thread.
//!
//! # Architecture
//!
//! - **Type registry**: fixed numeric records and variable-sized structured
//!   objects, registered once and referenced by name
//! - **Signature resolver**: narrows each block's declared candidates to
//!   one concrete signature, or rejects the graph
//! - **Streams**: single-writer rings with per-reader cursors; fan-out
//!   shares one ring, the slowest reader gates the producer
//! - **Scheduler**: one worker thread per block, cooperative shutdown over
//!   a control channel
//!
//! # Example
//!
//! ```no_run
//! use sigflow::blocks::{Gain, VectorSink, VectorSource};
//! use sigflow::runtime::{Graph, types::REAL32};
//!
//! let mut graph = Graph::new();
//! let sink = VectorSink::<f32>::new(REAL32);
//! let collected = sink.values();
//!
//! graph.add("src", VectorSource::new(REAL32, 48_000.0, vec![1.0f32, 2.0, 3.0]))?;
//! graph.add("gain", Gain::new(2.0))?;
//! graph.add("snk", sink)?;
//! graph.connect("src", 0, "gain", 0)?;
//! graph.connect("gain", 0, "snk", 0)?;
//!
//! let mut controller = graph.start()?;
//! controller.wait()?;
//! println!("{:?}", collected.lock().unwrap());
//! # Ok::<(), sigflow::FlowError>(())
//! ```

pub mod blocks;
pub mod runtime;

// Re-export the graph-user surface
pub use runtime::{
    Advance, Block, BlockFault, Controller, FlowError, Frame, Graph, InputStream, ObjectCodec,
    OutputStream, PortPattern, ResolvedSignature, Signature, Status, WorkError, WorkResult,
    add_capability, feature, register_fixed, register_json_object, register_object,
};
