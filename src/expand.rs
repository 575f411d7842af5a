//! Nested Expansion (S2): unroll bounded `repeat` loops and recursively
//! flatten any loops nested inside `if`/`else` branches.
//!
//! `if`/`else` nodes themselves are *not* flattened here — per §4.2 their two
//! branches are carried independently through S3/S4 and only joined into a
//! single AST `if { } else { }` at S5 (see `merge`). Expansion's job for them
//! is limited to flattening any `repeat` nodes nested inside each branch.

use thiserror::Error;

use crate::graph::{
    Edge, Graph, IfElsePayload, IngestError, Node, NodeId, NodeKind, PortIndex, PortType,
    RepeatPayload,
};
use crate::idgen::derive_unrolled_node_id;

/// Knobs controlling unroll behavior.
#[derive(Clone, Debug)]
pub struct ExpandOptions {
    /// Reject `repeat(k)` with `k` above this ceiling.
    pub max_unroll: u32,
    /// Off by default. When set, reproduces the source repository's
    /// apparent index-swap between an iteration exit node's loop-carried
    /// inputs, treated here as a bug rather than an intentional rotation
    /// (see SPEC_FULL.md §4.2's decision on the first Open Question).
    pub rotate_loop_carry: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            max_unroll: 1024,
            rotate_loop_carry: false,
        }
    }
}

/// Failure while unrolling nested control structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("node {node}: repeat count {iterations} exceeds the configured unroll bound {max}")]
    UnrollBoundExceeded {
        node: NodeId,
        iterations: u32,
        max: u32,
    },
    #[error("node {0}: malformed nested subgraph: {1}")]
    Ingest(NodeId, IngestError),
}

/// Flatten every `repeat` in `graph`, recursing into `if`/`else` branches.
pub fn expand(graph: Graph, opts: &ExpandOptions) -> Result<Graph, ExpandError> {
    let mut nodes = Vec::new();
    let mut edges = graph.edges.clone();

    for node in graph.nodes {
        match node.kind {
            NodeKind::Repeat(payload) => {
                let unrolled = unroll_repeat(&node.id, &node.inputs, &node.outputs, payload, opts)?;
                retarget_repeat_edges(&node.id, &unrolled, &mut edges);
                edges.extend(unrolled.edges);
                nodes.extend(unrolled.nodes);
            }
            NodeKind::IfThenElse(payload) => {
                let then_branch = Box::new(expand((*payload.then_branch).clone(), opts)?);
                let else_branch = Box::new(expand((*payload.else_branch).clone(), opts)?);
                nodes.push(Node {
                    id: node.id,
                    kind: NodeKind::IfThenElse(IfElsePayload {
                        then_branch,
                        else_branch,
                        ..payload
                    }),
                    inputs: node.inputs,
                    outputs: node.outputs,
                    snippet: node.snippet,
                });
            }
            other => nodes.push(Node {
                id: node.id,
                kind: other,
                inputs: node.inputs,
                outputs: node.outputs,
                snippet: node.snippet,
            }),
        }
    }

    Ok(Graph { nodes, edges })
}

struct Unrolled {
    nodes: Vec<Node>,
    /// Edges wholly internal to the unrolled iterations (entry -> inner
    /// copy -> exit, and exit[i] -> entry[i+1] loop-carry threading).
    edges: Vec<Edge>,
    /// For each loop-carried wire (by original repeat-node output port), the
    /// `(node, port)` that now produces the final iteration's value.
    final_outputs: Vec<(PortIndex, (NodeId, PortIndex))>,
    /// For each loop-carried wire (by original repeat-node input port), the
    /// `(node, port)` that should receive the value formerly feeding the
    /// repeat node directly.
    first_inputs: Vec<(PortIndex, (NodeId, PortIndex))>,
    /// For each pass-through wire, every `(node, port)` across all iterations
    /// that should receive the value formerly feeding the repeat node.
    passthrough_targets: Vec<(PortIndex, Vec<(NodeId, PortIndex)>)>,
}

fn unroll_repeat(
    repeat_id: &NodeId,
    outer_inputs: &[PortType],
    outer_outputs: &[PortType],
    payload: RepeatPayload,
    opts: &ExpandOptions,
) -> Result<Unrolled, ExpandError> {
    if payload.iterations > opts.max_unroll {
        return Err(ExpandError::UnrollBoundExceeded {
            node: repeat_id.clone(),
            iterations: payload.iterations,
            max: opts.max_unroll,
        });
    }

    let template = expand((*payload.inner).clone(), opts)?;

    let mut nodes = Vec::new();
    let mut edges_within = Vec::new();
    let mut first_inputs = Vec::new();
    let mut passthrough_targets: Vec<(PortIndex, Vec<(NodeId, PortIndex)>)> = payload
        .passthrough
        .iter()
        .map(|pt| (pt.outer_input, Vec::new()))
        .collect();

    // `prev_exit_outputs[j]` is where iteration i-1 left loop-carry wire j.
    let mut prev_exit_outputs: Option<Vec<(NodeId, PortIndex)>> = None;
    let mut final_outputs = Vec::new();

    for iter in 0..payload.iterations {
        let rename = |inner_id: &str| derive_unrolled_node_id(&repeat_id.0, iter, inner_id);

        let copy = rename_graph_ids(template.clone(), &rename);
        let entry_id = NodeId(derive_unrolled_node_id(&repeat_id.0, iter, "__entry"));
        let exit_id = NodeId(derive_unrolled_node_id(&repeat_id.0, iter, "__exit"));

        let carry_types: Vec<PortType> = payload
            .loop_carried
            .iter()
            .map(|lc| outer_inputs[lc.outer_input.as_usize()])
            .collect();

        let entry_node = Node {
            id: entry_id.clone(),
            kind: NodeKind::Passthrough,
            inputs: carry_types.clone(),
            outputs: carry_types.clone(),
            snippet: None,
        };
        let exit_node = Node {
            id: exit_id.clone(),
            kind: NodeKind::Passthrough,
            inputs: carry_types.clone(),
            outputs: carry_types,
            snippet: None,
        };

        for (j, lc) in payload.loop_carried.iter().enumerate() {
            let inner_entry = (
                NodeId(rename(&lc.inner_entry.0 .0)),
                lc.inner_entry.1,
            );
            let inner_exit = (NodeId(rename(&lc.inner_exit.0 .0)), lc.inner_exit.1);

            edges_within.push(Edge {
                src: (entry_id.clone(), PortIndex(j as u32)),
                dst: inner_entry,
            });
            edges_within.push(Edge {
                src: inner_exit,
                dst: (exit_id.clone(), PortIndex(j as u32)),
            });

            match &prev_exit_outputs {
                None => first_inputs.push((lc.outer_input, (entry_id.clone(), PortIndex(j as u32)))),
                Some(prev) => {
                    let src_j = if opts.rotate_loop_carry {
                        prev[(j + 1) % prev.len()].clone()
                    } else {
                        prev[j].clone()
                    };
                    edges_within.push(Edge {
                        src: src_j,
                        dst: (entry_id.clone(), PortIndex(j as u32)),
                    });
                }
            }
        }

        for (k, pt) in payload.passthrough.iter().enumerate() {
            let inner_target = (NodeId(rename(&pt.inner_target.0 .0)), pt.inner_target.1);
            passthrough_targets[k].1.push(inner_target);
        }

        prev_exit_outputs = Some(
            (0..payload.loop_carried.len())
                .map(|j| (exit_id.clone(), PortIndex(j as u32)))
                .collect(),
        );

        nodes.extend(copy.nodes);
        edges_within.extend(copy.edges);
        nodes.push(entry_node);
        nodes.push(exit_node);
    }

    if let Some(final_exits) = prev_exit_outputs {
        for (j, lc) in payload.loop_carried.iter().enumerate() {
            final_outputs.push((lc.outer_output, final_exits[j].clone()));
        }
    }
    let _ = outer_outputs;

    Ok(Unrolled {
        nodes,
        edges: edges_within,
        final_outputs,
        first_inputs,
        passthrough_targets,
    })
}

/// Redirect edges that used to target/originate from the (now-removed)
/// `repeat` node's outer ports to the unrolled iterations' boundary nodes.
fn retarget_repeat_edges(repeat_id: &NodeId, unrolled: &Unrolled, edges: &mut Vec<Edge>) {
    for e in edges.iter_mut() {
        if &e.dst.0 == repeat_id {
            if let Some((_, target)) = unrolled
                .first_inputs
                .iter()
                .find(|(p, _)| *p == e.dst.1)
            {
                e.dst = target.clone();
            }
        }
    }

    let mut extra = Vec::new();
    edges.retain(|e| {
        if &e.dst.0 == repeat_id {
            if let Some((_, targets)) = unrolled
                .passthrough_targets
                .iter()
                .find(|(p, _)| *p == e.dst.1)
            {
                for t in targets {
                    extra.push(Edge {
                        src: e.src.clone(),
                        dst: t.clone(),
                    });
                }
                return false;
            }
        }
        true
    });
    edges.extend(extra);

    for e in edges.iter_mut() {
        if &e.src.0 == repeat_id {
            if let Some((_, source)) = unrolled
                .final_outputs
                .iter()
                .find(|(p, _)| *p == e.src.1)
            {
                e.src = source.clone();
            }
        }
    }
}

fn rename_graph_ids(graph: Graph, f: &dyn Fn(&str) -> String) -> Graph {
    let rn = |id: &NodeId| NodeId(f(&id.0));
    let nodes = graph
        .nodes
        .into_iter()
        .map(|mut n| {
            n.id = rn(&n.id);
            match &mut n.kind {
                NodeKind::Repeat(r) => {
                    r.inner = Box::new(rename_graph_ids((*r.inner).clone(), f));
                    for lc in &mut r.loop_carried {
                        lc.inner_entry.0 = rn(&lc.inner_entry.0);
                        lc.inner_exit.0 = rn(&lc.inner_exit.0);
                    }
                    for pt in &mut r.passthrough {
                        pt.inner_target.0 = rn(&pt.inner_target.0);
                    }
                }
                NodeKind::IfThenElse(p) => {
                    p.then_branch = Box::new(rename_graph_ids((*p.then_branch).clone(), f));
                    p.else_branch = Box::new(rename_graph_ids((*p.else_branch).clone(), f));
                    for b in &mut p.shared_inputs {
                        b.then_target.0 = rn(&b.then_target.0);
                        b.else_target.0 = rn(&b.else_target.0);
                    }
                    for o in &mut p.outputs {
                        o.then_source.0 = rn(&o.then_source.0);
                        o.else_source.0 = rn(&o.else_source.0);
                    }
                }
                _ => {}
            }
            n
        })
        .collect();
    let edges = graph
        .edges
        .into_iter()
        .map(|e| Edge {
            src: (rn(&e.src.0), e.src.1),
            dst: (rn(&e.dst.0), e.dst.1),
        })
        .collect();
    Graph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LoopCarry, PassThroughBinding};

    fn inner_h_graph() -> Graph {
        Graph {
            nodes: vec![Node {
                id: NodeId("body".into()),
                kind: NodeKind::Gate,
                inputs: vec![PortType::Qubit(1)],
                outputs: vec![PortType::Qubit(1)],
                snippet: Some("qubit[1] q;\nh q;\n".into()),
            }],
            edges: vec![],
        }
    }

    #[test]
    fn unrolls_fixed_iteration_count_into_distinct_node_ids() {
        let repeat = Node {
            id: NodeId("rep".into()),
            kind: NodeKind::Repeat(RepeatPayload {
                iterations: 3,
                loop_carried: vec![LoopCarry {
                    outer_input: PortIndex(0),
                    outer_output: PortIndex(0),
                    inner_entry: (NodeId("body".into()), PortIndex(0)),
                    inner_exit: (NodeId("body".into()), PortIndex(0)),
                }],
                passthrough: vec![],
                inner: Box::new(inner_h_graph()),
            }),
            inputs: vec![PortType::Qubit(1)],
            outputs: vec![PortType::Qubit(1)],
            snippet: None,
        };
        let src = Node {
            id: NodeId("q0".into()),
            kind: NodeKind::Qubit,
            inputs: vec![],
            outputs: vec![PortType::Qubit(1)],
            snippet: Some("qubit[1] q;\n@leqo.output 0\nlet out = q;\n".into()),
        };
        let graph = Graph {
            nodes: vec![src, repeat],
            edges: vec![Edge {
                src: (NodeId("q0".into()), PortIndex(0)),
                dst: (NodeId("rep".into()), PortIndex(0)),
            }],
        };
        let expanded = expand(graph, &ExpandOptions::default()).unwrap();
        // 3 iterations * (1 body + entry + exit) + q0 = 10 nodes.
        assert_eq!(expanded.nodes.len(), 10);
        let body_ids: std::collections::HashSet<_> = expanded
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Gate))
            .map(|n| n.id.clone())
            .collect();
        assert_eq!(body_ids.len(), 3);
    }

    #[test]
    fn rejects_iteration_count_above_bound() {
        let repeat = Node {
            id: NodeId("rep".into()),
            kind: NodeKind::Repeat(RepeatPayload {
                iterations: 5,
                loop_carried: vec![],
                passthrough: vec![],
                inner: Box::new(inner_h_graph()),
            }),
            inputs: vec![],
            outputs: vec![],
            snippet: None,
        };
        let graph = Graph {
            nodes: vec![repeat],
            edges: vec![],
        };
        let opts = ExpandOptions {
            max_unroll: 4,
            ..Default::default()
        };
        assert!(matches!(
            expand(graph, &opts).unwrap_err(),
            ExpandError::UnrollBoundExceeded { .. }
        ));
    }

    #[test]
    fn passthrough_input_broadcasts_to_every_iteration() {
        let inner = Graph {
            nodes: vec![Node {
                id: NodeId("body".into()),
                kind: NodeKind::GateWithParam,
                inputs: vec![PortType::Qubit(1), PortType::Float],
                outputs: vec![PortType::Qubit(1)],
                snippet: Some("qubit[1] q;\n@leqo.input 0\nrz(0.1) q;\n".into()),
            }],
            edges: vec![],
        };
        let repeat = Node {
            id: NodeId("rep".into()),
            kind: NodeKind::Repeat(RepeatPayload {
                iterations: 2,
                loop_carried: vec![LoopCarry {
                    outer_input: PortIndex(0),
                    outer_output: PortIndex(0),
                    inner_entry: (NodeId("body".into()), PortIndex(0)),
                    inner_exit: (NodeId("body".into()), PortIndex(0)),
                }],
                passthrough: vec![PassThroughBinding {
                    outer_input: PortIndex(1),
                    inner_target: (NodeId("body".into()), PortIndex(1)),
                }],
                inner: Box::new(inner),
            }),
            inputs: vec![PortType::Qubit(1), PortType::Float],
            outputs: vec![PortType::Qubit(1)],
            snippet: None,
        };
        let q0 = Node {
            id: NodeId("q0".into()),
            kind: NodeKind::Qubit,
            inputs: vec![],
            outputs: vec![PortType::Qubit(1)],
            snippet: Some("qubit[1] q;\n@leqo.output 0\nlet out = q;\n".into()),
        };
        let theta = Node {
            id: NodeId("theta".into()),
            kind: NodeKind::ClassicalLiteral,
            inputs: vec![],
            outputs: vec![PortType::Float],
            snippet: None,
        };
        let graph = Graph {
            nodes: vec![q0, theta, repeat],
            edges: vec![
                Edge {
                    src: (NodeId("q0".into()), PortIndex(0)),
                    dst: (NodeId("rep".into()), PortIndex(0)),
                },
                Edge {
                    src: (NodeId("theta".into()), PortIndex(0)),
                    dst: (NodeId("rep".into()), PortIndex(1)),
                },
            ],
        };
        let expanded = expand(graph, &ExpandOptions::default()).unwrap();
        let theta_fanout = expanded
            .edges
            .iter()
            .filter(|e| e.src.0 == NodeId("theta".into()))
            .count();
        assert_eq!(theta_fanout, 2);
    }
}
