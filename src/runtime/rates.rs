//! Sample-rate propagation
//!
//! Runs once at `start()`, after signature resolution. Rates flow from
//! sources downstream in topological order: a block's nominal input rate is
//! the rate of the edge feeding its first input port, every other input
//! must carry exactly the same rate, and each output rate is the input rate
//! scaled by the resolved signature's factor for that port. `initialize` is
//! called the moment a block's rate is known so it can precompute
//! rate-dependent coefficients.

use std::collections::HashMap;

use tracing::debug;

use super::errors::FlowError;
use super::graph::{BlockId, Graph};
use super::resolver::Resolution;

/// Rates assigned to one block's ports.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRates {
    /// Nominal input rate; for sources, the declared sample rate
    pub input: f64,
    /// Per-output rate, `input * rate_scale[port]`
    pub outputs: Vec<f64>,
}

/// Assign rates to every block and call `initialize` on each, in
/// topological order.
pub fn propagate(
    graph: &mut Graph,
    resolution: &Resolution,
) -> Result<HashMap<BlockId, BlockRates>, FlowError> {
    let mut rates: HashMap<BlockId, BlockRates> = HashMap::new();

    for id in graph.topological() {
        let name = graph.name_of(id).to_string();
        let n_inputs = graph.n_inputs(id);

        let input = if n_inputs == 0 {
            graph
                .block(id)
                .sample_rate()
                .ok_or(FlowError::MissingRate { block: name.clone() })?
        } else {
            let mut first = None;
            for port in 0..n_inputs {
                let edge = graph
                    .inbound(id, port)
                    .ok_or_else(|| FlowError::UnconnectedInput {
                        block: name.clone(),
                        port,
                    })?;
                let upstream = &rates[&edge.from];
                let rate = upstream.outputs[edge.from_port];
                match first {
                    None => first = Some(rate),
                    Some(expected) if rate != expected => {
                        return Err(FlowError::RateMismatch {
                            block: name,
                            port,
                            expected,
                            got: rate,
                        });
                    }
                    Some(_) => {}
                }
            }
            first.expect("n_inputs > 0")
        };

        let resolved = resolution.signature(id);
        let outputs: Vec<f64> = resolved
            .rate_scale
            .iter()
            .map(|scale| input * scale)
            .collect();
        debug!(
            "rates for '{}': in {} Hz, out {:?}",
            name, input, outputs
        );

        graph
            .block_mut(id)
            .initialize(resolved, input)
            .map_err(|e| FlowError::BlockInitFailed {
                block: name,
                detail: e.to_string(),
            })?;

        rates.insert(id, BlockRates { input, outputs });
    }

    Ok(rates)
}
