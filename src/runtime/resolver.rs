//! Signature resolver
//!
//! Assigns one candidate signature to every block so that each edge carries
//! one concrete type accepted by both ends. Blocks with a single candidate
//! seed the process; elimination passes then sweep the graph in
//! reverse-topological and topological order, dropping candidates that
//! conflict with already-resolved neighbors. Surviving ties are broken by
//! agreement with the majority of resolved neighbors, then by declaration
//! order, which makes resolution deterministic and keeps an upstream
//! block's choice stable when new blocks are attached downstream.
//!
//! Capability predicates on input ports are tested against concrete
//! producer types only; they never eliminate producer candidates. Every
//! edge is re-validated once resolution completes, so an unsatisfied
//! predicate still surfaces as a `SignatureMismatch` naming that edge.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::block::{PortPattern, ResolvedSignature};
use super::errors::FlowError;
use super::graph::{BlockId, Graph};

/// The outcome of signature resolution: one concrete signature per block
/// and one concrete type per edge.
#[derive(Debug)]
pub struct Resolution {
    signatures: HashMap<BlockId, ResolvedSignature>,
    /// Concrete type names, parallel to `Graph::edges()`
    edge_types: Vec<String>,
}

impl Resolution {
    pub fn signature(&self, id: BlockId) -> &ResolvedSignature {
        &self.signatures[&id]
    }

    pub fn edge_type(&self, edge_index: usize) -> &str {
        &self.edge_types[edge_index]
    }
}

/// Resolve the whole graph or explain why it cannot be resolved.
pub fn resolve(graph: &Graph) -> Result<Resolution, FlowError> {
    let topo = graph.topological();
    let rev: Vec<BlockId> = topo.iter().rev().copied().collect();

    let mut candidates: HashMap<BlockId, Vec<usize>> = topo
        .iter()
        .map(|id| (*id, (0..graph.signatures_of(*id).len()).collect()))
        .collect();
    let mut chosen: HashMap<BlockId, usize> = HashMap::new();
    let mut last_kill: HashMap<BlockId, String> = HashMap::new();

    // Seed: a single declared candidate is already a resolution
    for &id in &topo {
        if candidates[&id].len() == 1 {
            chosen.insert(id, candidates[&id][0]);
            trace!("seeded {} with its only signature", graph.name_of(id));
        }
    }

    // Elimination passes until nothing changes
    loop {
        let mut progress = false;
        for order in [&rev, &topo] {
            for &id in order.iter() {
                if chosen.contains_key(&id) {
                    continue;
                }
                progress |= eliminate(graph, id, &mut candidates, &chosen, &mut last_kill)?;
                if candidates[&id].len() == 1 {
                    chosen.insert(id, candidates[&id][0]);
                    progress = true;
                }
            }
        }
        if !progress {
            break;
        }
    }

    // Tie-break blocks anchored to at least one resolved neighbor, in
    // topological order, re-eliminating after each choice
    loop {
        let mut progress = false;
        for &id in &topo {
            if chosen.contains_key(&id) {
                continue;
            }
            eliminate(graph, id, &mut candidates, &chosen, &mut last_kill)?;
            if candidates[&id].len() == 1 {
                chosen.insert(id, candidates[&id][0]);
                progress = true;
                continue;
            }
            if !has_resolved_neighbor(graph, id, &chosen) {
                continue;
            }
            let pick = tie_break(graph, id, &candidates[&id], &chosen);
            debug!(
                "tie-break: {} takes signature {}",
                graph.name_of(id),
                pick
            );
            chosen.insert(id, pick);
            progress = true;
        }
        if !progress {
            break;
        }
    }

    if let Some(&id) = topo.iter().find(|id| !chosen.contains_key(id)) {
        return Err(FlowError::AmbiguousSignature {
            block: graph.name_of(id).to_string(),
        });
    }

    finish(graph, &topo, &chosen)
}

/// Drop candidates of `id` that conflict with resolved neighbors.
/// Returns whether anything was eliminated.
fn eliminate(
    graph: &Graph,
    id: BlockId,
    candidates: &mut HashMap<BlockId, Vec<usize>>,
    chosen: &HashMap<BlockId, usize>,
    last_kill: &mut HashMap<BlockId, String>,
) -> Result<bool, FlowError> {
    let sigs = graph.signatures_of(id);
    let list = candidates.get_mut(&id).expect("known block");
    let before = list.len();

    let mut survivors = Vec::with_capacity(list.len());
    'candidate: for &s in list.iter() {
        for edge in graph.edges() {
            if edge.to == id {
                if let Some(&p) = chosen.get(&edge.from) {
                    let produced = &graph.signatures_of(edge.from)[p].outputs[edge.from_port];
                    if !sigs[s].inputs[edge.to_port].accepts(produced) {
                        last_kill.insert(id, graph.edge_label(edge));
                        continue 'candidate;
                    }
                }
            }
            if edge.from == id {
                if let Some(&c) = chosen.get(&edge.to) {
                    // A capability predicate never back-constrains the producer
                    if let PortPattern::Type(t) =
                        &graph.signatures_of(edge.to)[c].inputs[edge.to_port]
                        && &sigs[s].outputs[edge.from_port] != t
                    {
                        last_kill.insert(id, graph.edge_label(edge));
                        continue 'candidate;
                    }
                }
            }
        }
        survivors.push(s);
    }

    if survivors.is_empty() {
        let edge = last_kill
            .get(&id)
            .cloned()
            .unwrap_or_else(|| graph.name_of(id).to_string());
        return Err(FlowError::SignatureMismatch { edge });
    }
    let removed = survivors.len() < before;
    *list = survivors;
    Ok(removed)
}

fn has_resolved_neighbor(graph: &Graph, id: BlockId, chosen: &HashMap<BlockId, usize>) -> bool {
    graph.edges().iter().any(|e| {
        (e.to == id && chosen.contains_key(&e.from))
            || (e.from == id && chosen.contains_key(&e.to))
    })
}

/// Prefer the candidate agreeing with the most resolved neighbors; among
/// equals, the one declared earliest.
fn tie_break(
    graph: &Graph,
    id: BlockId,
    candidates: &[usize],
    chosen: &HashMap<BlockId, usize>,
) -> usize {
    let sigs = graph.signatures_of(id);
    let mut best = candidates[0];
    let mut best_score = -1i64;
    for &s in candidates {
        let mut score = 0i64;
        for edge in graph.edges() {
            if edge.to == id
                && let Some(&p) = chosen.get(&edge.from)
            {
                let produced = &graph.signatures_of(edge.from)[p].outputs[edge.from_port];
                if matches!(&sigs[s].inputs[edge.to_port], PortPattern::Type(t) if t == produced) {
                    score += 1;
                }
            }
            if edge.from == id
                && let Some(&c) = chosen.get(&edge.to)
            {
                if matches!(
                    &graph.signatures_of(edge.to)[c].inputs[edge.to_port],
                    PortPattern::Type(t) if t == &sigs[s].outputs[edge.from_port]
                ) {
                    score += 1;
                }
            }
        }
        // Strictly-greater keeps the earliest declared candidate on ties
        if score > best_score {
            best_score = score;
            best = s;
        }
    }
    best
}

/// Materialize concrete signatures and edge types, validating every edge.
fn finish(
    graph: &Graph,
    topo: &[BlockId],
    chosen: &HashMap<BlockId, usize>,
) -> Result<Resolution, FlowError> {
    let mut edge_types = Vec::with_capacity(graph.edges().len());
    for edge in graph.edges() {
        let p = chosen[&edge.from];
        let produced = graph.signatures_of(edge.from)[p].outputs[edge.from_port].clone();
        let c = chosen[&edge.to];
        let pattern = &graph.signatures_of(edge.to)[c].inputs[edge.to_port];
        if !pattern.accepts(&produced) {
            return Err(FlowError::SignatureMismatch {
                edge: graph.edge_label(edge),
            });
        }
        edge_types.push(produced);
    }

    let mut signatures = HashMap::new();
    for &id in topo {
        let s = chosen[&id];
        let sig = &graph.signatures_of(id)[s];
        let mut inputs = Vec::with_capacity(sig.inputs.len());
        for (port, pattern) in sig.inputs.iter().enumerate() {
            let concrete = match pattern {
                PortPattern::Type(t) => t.clone(),
                PortPattern::Capability(_) => {
                    // The predicate's concrete type is whatever the
                    // producer puts on the edge
                    let edge = graph.inbound(id, port).ok_or_else(|| {
                        FlowError::UnconnectedInput {
                            block: graph.name_of(id).to_string(),
                            port,
                        }
                    })?;
                    let p = chosen[&edge.from];
                    graph.signatures_of(edge.from)[p].outputs[edge.from_port].clone()
                }
            };
            inputs.push(concrete);
        }
        signatures.insert(
            id,
            ResolvedSignature {
                index: s,
                inputs,
                outputs: sig.outputs.clone(),
                rate_scale: sig.rate_scale.clone(),
            },
        );
    }

    Ok(Resolution {
        signatures,
        edge_types,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::block::{Advance, Block, PortPattern, Signature};
    use crate::runtime::errors::WorkResult;
    use crate::runtime::ports::{InputStream, OutputStream};
    use crate::runtime::types::{self, COMPLEX32, REAL32};

    struct Candidates {
        name: &'static str,
        sigs: Vec<Signature>,
    }

    impl Candidates {
        fn new(name: &'static str, sigs: Vec<Signature>) -> Self {
            Self { name, sigs }
        }
    }

    impl Block for Candidates {
        fn name(&self) -> &str {
            self.name
        }

        fn signatures(&self) -> Vec<Signature> {
            self.sigs.clone()
        }

        fn sample_rate(&self) -> Option<f64> {
            Some(1_000.0)
        }

        fn process(
            &mut self,
            _inputs: &mut [InputStream],
            _outputs: &mut [OutputStream],
        ) -> WorkResult<Advance> {
            Ok(Advance::Finished)
        }
    }

    fn real_source(name: &'static str) -> Candidates {
        Candidates::new(name, vec![Signature::typed(&[], &[REAL32])])
    }

    fn real_sink(name: &'static str) -> Candidates {
        Candidates::new(name, vec![Signature::typed(&[REAL32], &[])])
    }

    fn overloaded_multiply(name: &'static str) -> Candidates {
        Candidates::new(
            name,
            vec![
                Signature::typed(&[COMPLEX32, COMPLEX32], &[COMPLEX32]),
                Signature::typed(&[REAL32, REAL32], &[REAL32]),
            ],
        )
    }

    #[test]
    fn test_overload_narrowed_by_real_sources() {
        let mut graph = Graph::new();
        graph.add("s1", real_source("s1")).unwrap();
        graph.add("s2", real_source("s2")).unwrap();
        graph.add("mul", overloaded_multiply("mul")).unwrap();
        graph.add("snk", real_sink("snk")).unwrap();
        graph.connect("s1", 0, "mul", 0).unwrap();
        graph.connect("s2", 0, "mul", 1).unwrap();
        graph.connect("mul", 0, "snk", 0).unwrap();

        let res = resolve(&graph).unwrap();
        let mul = graph.topological()[2];
        assert_eq!(graph.name_of(mul), "mul");
        assert_eq!(res.signature(mul).index, 1);
        assert_eq!(res.signature(mul).outputs, vec![REAL32.to_string()]);
    }

    #[test]
    fn test_incompatible_edge_is_named() {
        let complex_source =
            Candidates::new("cs", vec![Signature::typed(&[], &[COMPLEX32])]);
        let mut graph = Graph::new();
        graph.add("cs", complex_source).unwrap();
        graph.add("snk", real_sink("snk")).unwrap();
        graph.connect("cs", 0, "snk", 0).unwrap();

        let err = resolve(&graph).unwrap_err();
        assert_eq!(err.kind(), "SignatureMismatch");
        assert!(err.to_string().contains("cs.out0 -> snk.in0"));
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // Converter compatible with its source under either candidate
        let forward = Candidates::new(
            "conv",
            vec![
                Signature::typed(&[REAL32], &[REAL32]),
                Signature::typed(&[REAL32], &[COMPLEX32]),
            ],
        );
        let mut graph = Graph::new();
        graph.add("src", real_source("src")).unwrap();
        graph.add("conv", forward).unwrap();
        graph.connect("src", 0, "conv", 0).unwrap();

        let res = resolve(&graph).unwrap();
        let conv = graph.topological()[1];
        assert_eq!(res.signature(conv).index, 0);
        assert_eq!(res.signature(conv).outputs, vec![REAL32.to_string()]);

        // Swapping the declaration order flips the choice
        let flipped = Candidates::new(
            "conv",
            vec![
                Signature::typed(&[REAL32], &[COMPLEX32]),
                Signature::typed(&[REAL32], &[REAL32]),
            ],
        );
        let mut graph = Graph::new();
        graph.add("src", real_source("src")).unwrap();
        graph.add("conv", flipped).unwrap();
        graph.connect("src", 0, "conv", 0).unwrap();

        let res = resolve(&graph).unwrap();
        let conv = graph.topological()[1];
        assert_eq!(res.signature(conv).index, 0);
        assert_eq!(res.signature(conv).outputs, vec![COMPLEX32.to_string()]);
    }

    #[test]
    fn test_unanchored_ambiguity_fails() {
        let source = Candidates::new(
            "src",
            vec![
                Signature::typed(&[], &[REAL32]),
                Signature::typed(&[], &[COMPLEX32]),
            ],
        );
        let sink = Candidates::new(
            "snk",
            vec![
                Signature::typed(&[REAL32], &[]),
                Signature::typed(&[COMPLEX32], &[]),
            ],
        );
        let mut graph = Graph::new();
        graph.add("src", source).unwrap();
        graph.add("snk", sink).unwrap();
        graph.connect("src", 0, "snk", 0).unwrap();

        let err = resolve(&graph).unwrap_err();
        assert_eq!(err.kind(), "AmbiguousSignature");
    }

    #[test]
    fn test_predicate_input_accepts_capable_producer_only() {
        types::register_json_object::<Vec<u32>>("test_resolver_burst").unwrap();

        let object_source = Candidates::new(
            "osrc",
            vec![Signature::typed(&[], &["test_resolver_burst"])],
        );
        let json_sink = Candidates::new(
            "jsnk",
            vec![Signature::new(
                vec![PortPattern::capability("json")],
                vec![],
            )],
        );
        let mut graph = Graph::new();
        graph.add("osrc", object_source).unwrap();
        graph.add("jsnk", json_sink).unwrap();
        graph.connect("osrc", 0, "jsnk", 0).unwrap();

        let res = resolve(&graph).unwrap();
        let snk = graph.topological()[1];
        // Predicate input resolves to the producer's concrete type
        assert_eq!(
            res.signature(snk).inputs,
            vec!["test_resolver_burst".to_string()]
        );

        // A producer without the capability fails on that edge
        let mut graph = Graph::new();
        graph.add("src", real_source("src")).unwrap();
        graph
            .add(
                "jsnk",
                Candidates::new(
                    "jsnk",
                    vec![Signature::new(
                        vec![PortPattern::capability("json")],
                        vec![],
                    )],
                ),
            )
            .unwrap();
        graph.connect("src", 0, "jsnk", 0).unwrap();

        let err = resolve(&graph).unwrap_err();
        assert_eq!(err.kind(), "SignatureMismatch");
        assert!(err.to_string().contains("src.out0 -> jsnk.in0"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        for _ in 0..5 {
            let mut graph = Graph::new();
            graph.add("s1", real_source("s1")).unwrap();
            graph.add("s2", real_source("s2")).unwrap();
            graph.add("mul", overloaded_multiply("mul")).unwrap();
            graph.add("snk", real_sink("snk")).unwrap();
            graph.connect("s1", 0, "mul", 0).unwrap();
            graph.connect("s2", 0, "mul", 1).unwrap();
            graph.connect("mul", 0, "snk", 0).unwrap();

            let a = resolve(&graph).unwrap();
            let b = resolve(&graph).unwrap();
            for id in graph.topological() {
                assert_eq!(a.signature(id).index, b.signature(id).index);
            }
            for i in 0..graph.edges().len() {
                assert_eq!(a.edge_type(i), b.edge_type(i));
            }
        }
    }
}
