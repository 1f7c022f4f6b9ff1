//! Block contract
//!
//! A block declares its candidate signatures up front; the resolver picks
//! one concrete signature per block at `start()`, the rate propagator calls
//! `initialize` with it, and the scheduler then drives `process` from a
//! dedicated worker.

use super::errors::WorkResult;
use super::ports::{InputStream, OutputStream};
use super::types;

/// Accepted types for one input port: a concrete type name, or a predicate
/// over the producer type's registered capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortPattern {
    Type(String),
    Capability(String),
}

impl PortPattern {
    pub fn of(type_name: impl Into<String>) -> Self {
        PortPattern::Type(type_name.into())
    }

    pub fn capability(capability: impl Into<String>) -> Self {
        PortPattern::Capability(capability.into())
    }

    /// Whether a concrete producer type satisfies this pattern.
    pub fn accepts(&self, type_name: &str) -> bool {
        match self {
            PortPattern::Type(t) => t == type_name,
            PortPattern::Capability(c) => types::has_capability(type_name, c),
        }
    }
}

/// One candidate assignment of types to a block's ports, with an optional
/// rate-scaling factor per output (default 1.0).
#[derive(Debug, Clone)]
pub struct Signature {
    pub inputs: Vec<PortPattern>,
    pub outputs: Vec<String>,
    pub rate_scale: Vec<f64>,
}

impl Signature {
    pub fn new(inputs: Vec<PortPattern>, outputs: Vec<String>) -> Self {
        let rate_scale = vec![1.0; outputs.len()];
        Self {
            inputs,
            outputs,
            rate_scale,
        }
    }

    /// Shorthand for a signature over concrete type names only.
    pub fn typed(inputs: &[&str], outputs: &[&str]) -> Self {
        Self::new(
            inputs.iter().map(|t| PortPattern::of(*t)).collect(),
            outputs.iter().map(|t| t.to_string()).collect(),
        )
    }

    pub fn with_rate_scale(mut self, rate_scale: Vec<f64>) -> Self {
        assert_eq!(
            rate_scale.len(),
            self.outputs.len(),
            "one rate-scale factor per output port"
        );
        self.rate_scale = rate_scale;
        self
    }
}

/// The signature chosen for one block: concrete type per port. For a
/// predicate-typed input, the concrete type is the producer's output type.
#[derive(Debug, Clone)]
pub struct ResolvedSignature {
    /// Index into the block's declared candidate list
    pub index: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub rate_scale: Vec<f64>,
}

/// Outcome of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Items moved this call (producer accounting only)
    Items(usize),
    /// Not enough input buffered to make progress yet
    NeedMore,
    /// No more output will ever be produced; shut downstream cleanly
    Finished,
}

/// A unit of computation in the flow graph.
///
/// Sources have no inputs and must declare a nominal sample rate; sinks
/// have no outputs. Any state is private to the block and touched only by
/// its own worker.
pub trait Block: Send {
    /// Debug name for this block
    fn name(&self) -> &str;

    /// Candidate signatures, declaration order significant (earliest wins
    /// resolver tie-breaks)
    fn signatures(&self) -> Vec<Signature>;

    /// Nominal sample rate; required for sources, ignored elsewhere
    fn sample_rate(&self) -> Option<f64> {
        None
    }

    /// Called once after signature resolution and rate propagation, before
    /// any `process` call. Rate-dependent state belongs here.
    fn initialize(&mut self, _resolved: &ResolvedSignature, _input_rate: f64) -> WorkResult {
        Ok(())
    }

    /// Move samples: read from `inputs`, write to `outputs`.
    fn process(
        &mut self,
        inputs: &mut [InputStream],
        outputs: &mut [OutputStream],
    ) -> WorkResult<Advance>;
}
