//! Flow-graph model
//!
//! Mutable while the user builds it, frozen by `start()`. Connections are
//! validated eagerly: unknown blocks and ports, duplicate fan-in, and
//! cycles are all rejected at `connect` time so `start()` only has the
//! signature and rate phases left to fail.

use std::collections::HashMap;

use tracing::debug;

use super::block::{Block, Signature};
use super::errors::FlowError;

/// Unique identifier for a block in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// A directed connection from one output port to one input port
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: BlockId,
    pub from_port: usize,
    pub to: BlockId,
    pub to_port: usize,
    /// Ring capacity override in items; `None` uses the type's default
    pub capacity: Option<usize>,
}

struct BlockEntry {
    name: String,
    block: Box<dyn Block>,
    signatures: Vec<Signature>,
    n_inputs: usize,
    n_outputs: usize,
}

/// A set of blocks and the edges connecting them
pub struct Graph {
    entries: Vec<Option<BlockEntry>>,
    names: HashMap<String, BlockId>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            names: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Add a block under a unique name. The block's candidate signatures are
    /// sampled here and must agree on port counts.
    pub fn add(&mut self, name: impl Into<String>, block: impl Block + 'static) -> Result<BlockId, FlowError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(FlowError::DuplicateBlock { name });
        }

        let signatures = block.signatures();
        let Some(first) = signatures.first() else {
            return Err(FlowError::NoSignatures { block: name });
        };
        let n_inputs = first.inputs.len();
        let n_outputs = first.outputs.len();
        let consistent = signatures.iter().all(|s| {
            s.inputs.len() == n_inputs
                && s.outputs.len() == n_outputs
                && s.rate_scale.len() == n_outputs
        });
        if !consistent {
            return Err(FlowError::InconsistentArity { block: name });
        }

        let id = BlockId(self.entries.len());
        debug!("adding block '{}' as {:?}", name, id);
        self.names.insert(name.clone(), id);
        self.entries.push(Some(BlockEntry {
            name,
            block: Box::new(block),
            signatures,
            n_inputs,
            n_outputs,
        }));
        Ok(id)
    }

    /// Connect an output port to an input port.
    pub fn connect(
        &mut self,
        from: &str,
        from_port: usize,
        to: &str,
        to_port: usize,
    ) -> Result<(), FlowError> {
        self.link(from, from_port, to, to_port, None)
    }

    /// Connect with an explicit ring capacity (in items) for this edge's
    /// stream.
    pub fn connect_with_capacity(
        &mut self,
        from: &str,
        from_port: usize,
        to: &str,
        to_port: usize,
        capacity: usize,
    ) -> Result<(), FlowError> {
        self.link(from, from_port, to, to_port, Some(capacity))
    }

    fn link(
        &mut self,
        from: &str,
        from_port: usize,
        to: &str,
        to_port: usize,
        capacity: Option<usize>,
    ) -> Result<(), FlowError> {
        let from_id = self.id_of(from)?;
        let to_id = self.id_of(to)?;

        let from_entry = self.entry(from_id);
        if from_port >= from_entry.n_outputs {
            return Err(FlowError::PortOutOfRange {
                block: from.to_string(),
                port: from_port,
            });
        }
        let to_entry = self.entry(to_id);
        if to_port >= to_entry.n_inputs {
            return Err(FlowError::PortOutOfRange {
                block: to.to_string(),
                port: to_port,
            });
        }

        // One producer per input port
        if self
            .edges
            .iter()
            .any(|e| e.to == to_id && e.to_port == to_port)
        {
            return Err(FlowError::FanInConflict {
                block: to.to_string(),
                port: to_port,
            });
        }

        // Adding from -> to closes a loop iff `from` is reachable from `to`
        if from_id == to_id || self.reachable(to_id, from_id) {
            return Err(FlowError::CycleDetected {
                edge: format!("{from}.out{from_port} -> {to}.in{to_port}"),
            });
        }

        debug!(
            "connecting {}.out{} -> {}.in{}",
            from, from_port, to, to_port
        );
        self.edges.push(Edge {
            from: from_id,
            from_port,
            to: to_id,
            to_port,
            capacity,
        });
        Ok(())
    }

    /// Remove a block and every edge touching it. Returns the block.
    pub fn remove(&mut self, name: &str) -> Result<Box<dyn Block>, FlowError> {
        let id = self.id_of(name)?;
        self.names.remove(name);
        self.edges.retain(|e| e.from != id && e.to != id);
        let entry = self.entries[id.0].take().expect("live id");
        Ok(entry.block)
    }

    /// Blocks with no input ports
    pub fn sources(&self) -> Vec<BlockId> {
        self.live_ids()
            .filter(|id| self.entry(*id).n_inputs == 0)
            .collect()
    }

    /// Blocks with no output ports
    pub fn sinks(&self) -> Vec<BlockId> {
        self.live_ids()
            .filter(|id| self.entry(*id).n_outputs == 0)
            .collect()
    }

    /// Blocks ordered so every producer precedes its consumers
    pub fn topological(&self) -> Vec<BlockId> {
        let ids: Vec<BlockId> = self.live_ids().collect();
        let mut indegree: HashMap<BlockId, usize> = ids.iter().map(|id| (*id, 0)).collect();
        for edge in &self.edges {
            *indegree.get_mut(&edge.to).expect("edge targets live block") += 1;
        }

        let mut ready: Vec<BlockId> = ids
            .iter()
            .copied()
            .filter(|id| indegree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(ids.len());
        while let Some(id) = ready.first().copied() {
            ready.remove(0);
            order.push(id);
            for edge in self.edges.iter().filter(|e| e.from == id) {
                let d = indegree.get_mut(&edge.to).expect("live block");
                *d -= 1;
                if *d == 0 {
                    ready.push(edge.to);
                    ready.sort();
                }
            }
        }
        debug_assert_eq!(order.len(), ids.len(), "connect() keeps the graph acyclic");
        order
    }

    /// Blocks ordered so every consumer precedes its producers
    pub fn reverse_topological(&self) -> Vec<BlockId> {
        let mut order = self.topological();
        order.reverse();
        order
    }

    pub fn num_blocks(&self) -> usize {
        self.names.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The edge feeding one input port, if connected
    pub fn inbound(&self, id: BlockId, port: usize) -> Option<&Edge> {
        self.edges.iter().find(|e| e.to == id && e.to_port == port)
    }

    /// All edges leaving one output port
    pub fn outbound(&self, id: BlockId, port: usize) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.from == id && e.from_port == port)
            .collect()
    }

    pub fn name_of(&self, id: BlockId) -> &str {
        &self.entry(id).name
    }

    pub fn edge_label(&self, edge: &Edge) -> String {
        format!(
            "{}.out{} -> {}.in{}",
            self.name_of(edge.from),
            edge.from_port,
            self.name_of(edge.to),
            edge.to_port
        )
    }

    pub(crate) fn live_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_some())
            .map(|(i, _)| BlockId(i))
    }

    pub(crate) fn signatures_of(&self, id: BlockId) -> &[Signature] {
        &self.entry(id).signatures
    }

    pub(crate) fn n_inputs(&self, id: BlockId) -> usize {
        self.entry(id).n_inputs
    }

    pub(crate) fn n_outputs(&self, id: BlockId) -> usize {
        self.entry(id).n_outputs
    }

    pub(crate) fn block(&self, id: BlockId) -> &dyn Block {
        self.entry(id).block.as_ref()
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut (dyn Block + 'static) {
        self.entries[id.0]
            .as_mut()
            .expect("live id")
            .block
            .as_mut()
    }

    /// Tear the graph apart for the scheduler: blocks with their identity
    /// and port counts, plus the edge list.
    pub(crate) fn into_parts(self) -> (Vec<(BlockId, String, Box<dyn Block>, usize, usize)>, Vec<Edge>) {
        let blocks = self
            .entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, e)| {
                e.map(|entry| {
                    (
                        BlockId(i),
                        entry.name,
                        entry.block,
                        entry.n_inputs,
                        entry.n_outputs,
                    )
                })
            })
            .collect();
        (blocks, self.edges)
    }

    fn id_of(&self, name: &str) -> Result<BlockId, FlowError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::UnknownBlock { name: name.to_string() })
    }

    fn entry(&self, id: BlockId) -> &BlockEntry {
        self.entries[id.0].as_ref().expect("live id")
    }

    /// Whether `target` is reachable from `start` along edges
    fn reachable(&self, start: BlockId, target: BlockId) -> bool {
        let mut stack = vec![start];
        let mut seen = vec![false; self.entries.len()];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen[id.0] {
                continue;
            }
            seen[id.0] = true;
            for edge in self.edges.iter().filter(|e| e.from == id) {
                stack.push(edge.to);
            }
        }
        false
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
