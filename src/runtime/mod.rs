//! Runtime support for flow graphs of sample-processing blocks

pub mod block;
pub mod control;
pub mod errors;
pub mod features;
pub mod graph;
pub mod monitor;
pub mod ports;
pub mod rates;
pub mod resolver;
pub mod scheduler;
pub mod stream;
pub mod types;

pub use block::{Advance, Block, PortPattern, ResolvedSignature, Signature};
pub use control::{ControlMessage, Status};
pub use errors::{BlockFault, FlowError, StreamClosed, WorkError, WorkResult};
pub use features::feature;
pub use graph::{BlockId, Edge, Graph};
pub use monitor::StallMonitor;
pub use ports::{InputStream, OutputStream};
pub use rates::BlockRates;
pub use resolver::Resolution;
pub use scheduler::Controller;
pub use stream::{StreamReader, StreamWriter};
pub use types::{
    Frame, ObjectCodec, TypeInfo, TypeKind, add_capability, register_fixed, register_json_object,
    register_object,
};
