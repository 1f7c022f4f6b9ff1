//! Error types for the flow-graph runtime

use std::fmt;

/// A fatal failure reported by one worker, carried in the aggregate
/// [`FlowError::RuntimeFailure`] result of `Controller::wait()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFault {
    pub block: String,
    pub detail: String,
}

impl fmt::Display for BlockFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.block, self.detail)
    }
}

/// Errors raised synchronously while building or starting a graph, plus the
/// aggregate runtime result surfaced by `wait()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    #[error("sample type '{name}' already registered with a different definition")]
    TypeConflict { name: String },

    #[error("unknown sample type '{name}'")]
    UnknownType { name: String },

    #[error("no compatible signature for edge {edge}")]
    SignatureMismatch { edge: String },

    #[error("block '{block}' has multiple viable signatures and no neighbor to disambiguate")]
    AmbiguousSignature { block: String },

    #[error("input {port} of block '{block}' already has a producer")]
    FanInConflict { block: String, port: usize },

    #[error("connecting {edge} would create a cycle")]
    CycleDetected { edge: String },

    #[error("block '{block}' input {port} carries {got} Hz but input 0 carries {expected} Hz")]
    RateMismatch {
        block: String,
        port: usize,
        expected: f64,
        got: f64,
    },

    #[error("block '{block}' rejected its resolved signature or rate: {detail}")]
    BlockInitFailed { block: String, detail: String },

    #[error("{} worker(s) failed: {}", .failures.len(), format_faults(.failures))]
    RuntimeFailure { failures: Vec<BlockFault> },

    #[error("a block named '{name}' already exists")]
    DuplicateBlock { name: String },

    #[error("no block named '{name}'")]
    UnknownBlock { name: String },

    #[error("port {port} out of range for block '{block}'")]
    PortOutOfRange { block: String, port: usize },

    #[error("input {port} of block '{block}' is not connected")]
    UnconnectedInput { block: String, port: usize },

    #[error("source block '{block}' declares no sample rate")]
    MissingRate { block: String },

    #[error("block '{block}' declares no candidate signatures")]
    NoSignatures { block: String },

    #[error("block '{block}' declares signatures with inconsistent port counts")]
    InconsistentArity { block: String },
}

impl FlowError {
    /// Stable machine-readable tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::TypeConflict { .. } => "TypeConflict",
            FlowError::UnknownType { .. } => "UnknownType",
            FlowError::SignatureMismatch { .. } => "SignatureMismatch",
            FlowError::AmbiguousSignature { .. } => "AmbiguousSignature",
            FlowError::FanInConflict { .. } => "FanInConflict",
            FlowError::CycleDetected { .. } => "CycleDetected",
            FlowError::RateMismatch { .. } => "RateMismatch",
            FlowError::BlockInitFailed { .. } => "BlockInitFailed",
            FlowError::RuntimeFailure { .. } => "BlockRuntimeError",
            FlowError::DuplicateBlock { .. } => "DuplicateBlock",
            FlowError::UnknownBlock { .. } => "UnknownBlock",
            FlowError::PortOutOfRange { .. } => "PortOutOfRange",
            FlowError::UnconnectedInput { .. } => "UnconnectedInput",
            FlowError::MissingRate { .. } => "MissingRate",
            FlowError::NoSignatures { .. } => "NoSignatures",
            FlowError::InconsistentArity { .. } => "InconsistentArity",
        }
    }
}

fn format_faults(failures: &[BlockFault]) -> String {
    failures
        .iter()
        .map(BlockFault::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The upstream or downstream end of a stream has terminated.
///
/// This is the normal end-of-stream signal. Workers consume it internally
/// and shut down cleanly; it never reaches the graph user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream closed")]
pub struct StreamClosed;

/// Error type for block work functions
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// A stream this block reads or writes has closed. Treated by the
    /// scheduler as end-of-stream, not as a failure.
    #[error("stream closed: {0}")]
    Stream(#[from] StreamClosed),

    /// Fatal block-specific error. Relayed to the supervisor as a
    /// `BlockRuntimeError` and aborts the graph.
    #[error("{0}")]
    Block(String),

    /// Shutdown was requested while the block was working.
    #[error("shutdown signal received")]
    Shutdown,
}

/// Result type for block work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
