//! Program graph model and Graph Ingest (the first pipeline stage).
//!
//! Index newtypes (`NodeId`, `PortIndex`) follow the crate's small-newtype
//! convention for anything that indexes into a per-request arena, so a
//! misplaced raw `usize` can never be passed where a node or port was meant.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, caller-assigned node identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an input or output port on a node, 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortIndex(pub u32);

impl PortIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The declared type and width of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortType {
    Qubit(u32),
    Bit(u32),
    Int,
    Float,
}

impl PortType {
    pub fn is_quantum(&self) -> bool {
        matches!(self, PortType::Qubit(_))
    }

    pub fn size(&self) -> Option<u32> {
        match self {
            PortType::Qubit(n) | PortType::Bit(n) => Some(*n),
            PortType::Int | PortType::Float => None,
        }
    }
}

/// A single loop-carried wire: one `repeat` node input/output port pair
/// (same logical wire, before and after one iteration) and the inner
/// subgraph ports that feed/produce it each iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopCarry {
    pub outer_input: PortIndex,
    pub outer_output: PortIndex,
    /// Inner node/port that should receive this iteration's incoming value.
    pub inner_entry: (NodeId, PortIndex),
    /// Inner node/port that produces this iteration's outgoing value.
    pub inner_exit: (NodeId, PortIndex),
}

/// A classical value broadcast, unchanged, to every iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PassThroughBinding {
    pub outer_input: PortIndex,
    pub inner_target: (NodeId, PortIndex),
}

/// A `repeat(k)` node's loop-carried/pass-through wiring and inner subgraph
/// template (one iteration's body).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepeatPayload {
    pub iterations: u32,
    pub loop_carried: Vec<LoopCarry>,
    pub passthrough: Vec<PassThroughBinding>,
    pub inner: Box<Graph>,
}

/// One outer input shared, unchanged, by both branches of an `if`/`else`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfInputBinding {
    pub outer_input: PortIndex,
    pub then_target: (NodeId, PortIndex),
    pub else_target: (NodeId, PortIndex),
}

/// One outer output produced by whichever branch actually runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfOutputBinding {
    pub outer_output: PortIndex,
    pub then_source: (NodeId, PortIndex),
    pub else_source: (NodeId, PortIndex),
}

/// An `if`/`else` node's two mutually exclusive subgraphs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IfElsePayload {
    pub condition_input: PortIndex,
    pub shared_inputs: Vec<IfInputBinding>,
    pub outputs: Vec<IfOutputBinding>,
    pub then_branch: Box<Graph>,
    pub else_branch: Box<Graph>,
}

/// The closed set of node kinds the pipeline understands.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    Qubit,
    ClassicalLiteral,
    Gate,
    GateWithParam,
    Measurement,
    Operator,
    Encoder,
    Custom,
    Repeat(RepeatPayload),
    IfThenElse(IfElsePayload),
    Ancilla,
    Passthrough,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Qubit => "qubit",
            NodeKind::ClassicalLiteral => "classical-literal",
            NodeKind::Gate => "gate",
            NodeKind::GateWithParam => "gate-with-param",
            NodeKind::Measurement => "measurement",
            NodeKind::Operator => "operator",
            NodeKind::Encoder => "encoder",
            NodeKind::Custom => "custom",
            NodeKind::Repeat(_) => "repeat",
            NodeKind::IfThenElse(_) => "if-then-else",
            NodeKind::Ancilla => "ancilla",
            NodeKind::Passthrough => "passthrough",
        }
    }
}

/// A single vertex of the program graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<PortType>,
    pub outputs: Vec<PortType>,
    /// Caller-supplied OpenQASM snippet, if any (absent means S1 must fetch
    /// one from the out-of-scope catalogue/enricher).
    pub snippet: Option<String>,
}

/// A directed edge from one node's output port to another's input port.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub src: (NodeId, PortIndex),
    pub dst: (NodeId, PortIndex),
}

/// The program graph submitted for compilation (or a nested `repeat`/`if`
/// subgraph).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Failure while validating or scheduling a program graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("node {0} is declared more than once")]
    DuplicateNode(NodeId),
    #[error("edge references unknown node {0}")]
    DanglingNode(NodeId),
    #[error("edge references out-of-range port {port} on node {node}")]
    DanglingPort { node: NodeId, port: u32 },
    #[error("input port {port} on node {node} has {count} incoming edges, expected exactly 1")]
    PortFanInViolation {
        node: NodeId,
        port: u32,
        count: usize,
    },
    #[error("quantum output port {port} on node {node} feeds more than one sink")]
    QuantumFanOutViolation { node: NodeId, port: u32 },
    #[error("port type/size mismatch on edge into {node}:{port}: expected {expected:?}, got {found:?}")]
    PortTypeMismatch {
        node: NodeId,
        port: u32,
        expected: PortType,
        found: PortType,
    },
    #[error("graph contains a cycle reachable from node {0}")]
    CyclicGraph(NodeId),
}

/// A graph after S0 validation: nodes in a deterministic topological order.
#[derive(Clone, Debug)]
pub struct ScheduledGraph {
    pub graph: Graph,
    /// Node ids in topological order, ties broken lexicographically.
    pub order: Vec<NodeId>,
}

impl ScheduledGraph {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.graph.nodes.iter().find(|n| &n.id == id)
    }
}

/// Validate port cardinalities/types and compute a deterministic topological
/// order for `graph`. Nested `repeat`/`if-then-else` subgraphs are validated
/// independently by the caller once unrolled (S2); ingest only checks the
/// flat edge list it is given.
pub fn ingest(graph: Graph) -> Result<ScheduledGraph, IngestError> {
    let mut seen = HashSet::new();
    for n in &graph.nodes {
        if !seen.insert(n.id.clone()) {
            return Err(IngestError::DuplicateNode(n.id.clone()));
        }
    }

    let index_of: HashMap<&NodeId, usize> =
        graph.nodes.iter().enumerate().map(|(i, n)| (&n.id, i)).collect();

    let mut fan_in: HashMap<(NodeId, u32), Vec<&Edge>> = HashMap::new();
    let mut quantum_fan_out: HashMap<(NodeId, u32), usize> = HashMap::new();

    for e in &graph.edges {
        let src_idx = *index_of
            .get(&e.src.0)
            .ok_or_else(|| IngestError::DanglingNode(e.src.0.clone()))?;
        let dst_idx = *index_of
            .get(&e.dst.0)
            .ok_or_else(|| IngestError::DanglingNode(e.dst.0.clone()))?;

        let src_node = &graph.nodes[src_idx];
        let dst_node = &graph.nodes[dst_idx];

        let src_ty = *src_node
            .outputs
            .get(e.src.1.as_usize())
            .ok_or_else(|| IngestError::DanglingPort {
                node: e.src.0.clone(),
                port: e.src.1 .0,
            })?;
        let dst_ty = *dst_node
            .inputs
            .get(e.dst.1.as_usize())
            .ok_or_else(|| IngestError::DanglingPort {
                node: e.dst.0.clone(),
                port: e.dst.1 .0,
            })?;

        if !port_types_compatible(src_ty, dst_ty) {
            return Err(IngestError::PortTypeMismatch {
                node: e.dst.0.clone(),
                port: e.dst.1 .0,
                expected: dst_ty,
                found: src_ty,
            });
        }

        fan_in
            .entry((e.dst.0.clone(), e.dst.1 .0))
            .or_default()
            .push(e);

        if src_ty.is_quantum() {
            *quantum_fan_out.entry((e.src.0.clone(), e.src.1 .0)).or_insert(0) += 1;
        }
    }

    for node in &graph.nodes {
        for (port_idx, _) in node.inputs.iter().enumerate() {
            let count = fan_in
                .get(&(node.id.clone(), port_idx as u32))
                .map(Vec::len)
                .unwrap_or(0);
            if count != 1 {
                return Err(IngestError::PortFanInViolation {
                    node: node.id.clone(),
                    port: port_idx as u32,
                    count,
                });
            }
        }
    }

    for ((node, port), count) in &quantum_fan_out {
        if *count > 1 {
            return Err(IngestError::QuantumFanOutViolation {
                node: node.clone(),
                port: *port,
            });
        }
    }

    let order = topological_order(&graph)?;
    Ok(ScheduledGraph { graph, order })
}

/// Validate `graph` and every nested `repeat`/`if-then-else` subgraph it
/// contains, recursively. The inner subgraph of a `repeat`/`if` is validated
/// as its own self-contained graph (its boundary ports are ordinary node
/// ports that expansion later wires from outside); this function additionally
/// checks that the payload's boundary bindings reference ports that exist.
pub fn ingest_recursive(graph: Graph) -> Result<ScheduledGraph, IngestError> {
    for node in &graph.nodes {
        match &node.kind {
            NodeKind::Repeat(r) => {
                validate_repeat_payload(node, r)?;
                ingest_recursive((*r.inner).clone())?;
            }
            NodeKind::IfThenElse(p) => {
                validate_if_payload(node, p)?;
                ingest_recursive((*p.then_branch).clone())?;
                ingest_recursive((*p.else_branch).clone())?;
            }
            _ => {}
        }
    }
    ingest(graph)
}

fn inner_port_exists(inner: &Graph, target: &(NodeId, PortIndex), is_input: bool) -> bool {
    inner.nodes.iter().any(|n| {
        n.id == target.0
            && (if is_input {
                target.1.as_usize() < n.inputs.len()
            } else {
                target.1.as_usize() < n.outputs.len()
            })
    })
}

fn validate_repeat_payload(node: &Node, r: &RepeatPayload) -> Result<(), IngestError> {
    for lc in &r.loop_carried {
        let in_ty = node.inputs.get(lc.outer_input.as_usize());
        let out_ty = node.outputs.get(lc.outer_output.as_usize());
        let (Some(in_ty), Some(out_ty)) = (in_ty, out_ty) else {
            return Err(IngestError::DanglingPort {
                node: node.id.clone(),
                port: lc.outer_input.0,
            });
        };
        if !port_types_compatible(*out_ty, *in_ty) && !port_types_compatible(*in_ty, *out_ty) {
            return Err(IngestError::PortTypeMismatch {
                node: node.id.clone(),
                port: lc.outer_output.0,
                expected: *in_ty,
                found: *out_ty,
            });
        }
        if !inner_port_exists(&r.inner, &lc.inner_entry, true)
            || !inner_port_exists(&r.inner, &lc.inner_exit, false)
        {
            return Err(IngestError::DanglingPort {
                node: node.id.clone(),
                port: lc.outer_input.0,
            });
        }
    }
    for pt in &r.passthrough {
        if node.inputs.get(pt.outer_input.as_usize()).is_none()
            || !inner_port_exists(&r.inner, &pt.inner_target, true)
        {
            return Err(IngestError::DanglingPort {
                node: node.id.clone(),
                port: pt.outer_input.0,
            });
        }
    }
    Ok(())
}

fn validate_if_payload(node: &Node, p: &IfElsePayload) -> Result<(), IngestError> {
    if node.inputs.get(p.condition_input.as_usize()).is_none() {
        return Err(IngestError::DanglingPort {
            node: node.id.clone(),
            port: p.condition_input.0,
        });
    }
    for b in &p.shared_inputs {
        if node.inputs.get(b.outer_input.as_usize()).is_none()
            || !inner_port_exists(&p.then_branch, &b.then_target, true)
            || !inner_port_exists(&p.else_branch, &b.else_target, true)
        {
            return Err(IngestError::DanglingPort {
                node: node.id.clone(),
                port: b.outer_input.0,
            });
        }
    }
    for o in &p.outputs {
        if node.outputs.get(o.outer_output.as_usize()).is_none()
            || !inner_port_exists(&p.then_branch, &o.then_source, false)
            || !inner_port_exists(&p.else_branch, &o.else_source, false)
        {
            return Err(IngestError::DanglingPort {
                node: node.id.clone(),
                port: o.outer_output.0,
            });
        }
    }
    Ok(())
}

fn port_types_compatible(src: PortType, dst: PortType) -> bool {
    match (src, dst) {
        (PortType::Qubit(a), PortType::Qubit(b)) => a <= b,
        (PortType::Bit(_), PortType::Bit(_)) => true,
        (PortType::Int, PortType::Int) => true,
        (PortType::Float, PortType::Float) => true,
        _ => false,
    }
}

fn topological_order(graph: &Graph) -> Result<Vec<NodeId>, IngestError> {
    let mut adjacency: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
    let mut indegree: HashMap<&NodeId, usize> =
        graph.nodes.iter().map(|n| (&n.id, 0)).collect();

    for e in &graph.edges {
        adjacency.entry(&e.src.0).or_default().push(&e.dst.0);
        *indegree.entry(&e.dst.0).or_insert(0) += 1;
    }

    let mut ready: Vec<&NodeId> = graph
        .nodes
        .iter()
        .map(|n| &n.id)
        .filter(|id| indegree.get(*id).copied().unwrap_or(0) == 0)
        .collect();
    ready.sort();

    let mut queue: VecDeque<&NodeId> = ready.into_iter().collect();
    let mut order = Vec::with_capacity(graph.nodes.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(succs) = adjacency.get(id) {
            let mut newly_ready = Vec::new();
            for s in succs {
                let e = indegree.get_mut(s).unwrap();
                *e -= 1;
                if *e == 0 {
                    newly_ready.push(*s);
                }
            }
            newly_ready.sort();
            for s in newly_ready {
                let pos = queue.partition_point(|q| *q < s);
                queue.insert(pos, s);
            }
        }
    }

    if order.len() != graph.nodes.len() {
        let stuck = graph
            .nodes
            .iter()
            .map(|n| &n.id)
            .find(|id| !order.contains(id))
            .unwrap();
        return Err(IngestError::CyclicGraph(stuck.clone()));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qnode(id: &str, n_in: u32, n_out: u32) -> Node {
        Node {
            id: NodeId(id.into()),
            kind: NodeKind::Gate,
            inputs: (0..n_in).map(|_| PortType::Qubit(1)).collect(),
            outputs: (0..n_out).map(|_| PortType::Qubit(1)).collect(),
            snippet: None,
        }
    }

    #[test]
    fn accepts_simple_chain() {
        let graph = Graph {
            nodes: vec![qnode("a", 0, 1), qnode("b", 1, 1)],
            edges: vec![Edge {
                src: (NodeId("a".into()), PortIndex(0)),
                dst: (NodeId("b".into()), PortIndex(0)),
            }],
        };
        let scheduled = ingest(graph).unwrap();
        assert_eq!(scheduled.order, vec![NodeId("a".into()), NodeId("b".into())]);
    }

    #[test]
    fn rejects_missing_fan_in() {
        let graph = Graph {
            nodes: vec![qnode("b", 1, 1)],
            edges: vec![],
        };
        assert_eq!(
            ingest(graph).unwrap_err(),
            IngestError::PortFanInViolation {
                node: NodeId("b".into()),
                port: 0,
                count: 0,
            }
        );
    }

    #[test]
    fn rejects_quantum_fan_out_above_one() {
        let graph = Graph {
            nodes: vec![qnode("a", 0, 1), qnode("b", 1, 1), qnode("c", 1, 1)],
            edges: vec![
                Edge {
                    src: (NodeId("a".into()), PortIndex(0)),
                    dst: (NodeId("b".into()), PortIndex(0)),
                },
                Edge {
                    src: (NodeId("a".into()), PortIndex(0)),
                    dst: (NodeId("c".into()), PortIndex(0)),
                },
            ],
        };
        assert!(matches!(
            ingest(graph).unwrap_err(),
            IngestError::QuantumFanOutViolation { .. }
        ));
    }

    #[test]
    fn deterministic_order_breaks_ties_lexicographically() {
        let graph = Graph {
            nodes: vec![qnode("z", 0, 1), qnode("a", 0, 1)],
            edges: vec![],
        };
        let scheduled = ingest(graph).unwrap();
        assert_eq!(scheduled.order, vec![NodeId("a".into()), NodeId("z".into())]);
    }
}
