//! JSON wire types for `CompileRequest`/`CompileResponse` (§6) and their
//! conversion into the internal [`Graph`] model.
//!
//! The distilled request schema (§6) leaves the exact encoding of a
//! `repeat`/`if-then-else` node's boundary bindings unspecified beyond naming
//! `iterations`/`block` as payload fields; this module makes that encoding
//! concrete (`loop_carried`/`passthrough`/`shared_inputs`/`if_outputs`, each
//! an explicit list keyed by port index) since S0/S2 need it to exist
//! somewhere. See DESIGN.md for this as a resolved ambiguity.

use serde::{Deserialize, Serialize};

use crate::graph::{
    Edge, Graph, IfElsePayload, IfInputBinding, IfOutputBinding, LoopCarry, Node, NodeId, NodeKind,
    PassThroughBinding, PortIndex, PortType, RepeatPayload,
};

/// Free-form request metadata, never interpreted by the pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Caller-controlled pipeline knobs carried over the wire. `max_unroll` is
/// deliberately not part of this struct: it is an embedder-level ceiling
/// (`CompileService::with_max_unroll`), not something a per-request caller
/// should be able to raise past whatever the deployment allows.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_optimize() -> bool {
    true
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

/// Wire encoding of [`PortType`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WirePortType {
    Qubit { size: u32 },
    Bit { size: u32 },
    Int,
    Float,
}

impl From<WirePortType> for PortType {
    fn from(w: WirePortType) -> Self {
        match w {
            WirePortType::Qubit { size } => PortType::Qubit(size),
            WirePortType::Bit { size } => PortType::Bit(size),
            WirePortType::Int => PortType::Int,
            WirePortType::Float => PortType::Float,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireLoopCarry {
    pub outer_input: u32,
    pub outer_output: u32,
    pub inner_entry: (String, u32),
    pub inner_exit: (String, u32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WirePassThrough {
    pub outer_input: u32,
    pub inner_target: (String, u32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireIfInput {
    pub outer_input: u32,
    pub then_target: (String, u32),
    pub else_target: (String, u32),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireIfOutput {
    pub outer_output: u32,
    pub then_source: (String, u32),
    pub else_source: (String, u32),
}

/// A nested subgraph: a `repeat`'s inner body, or one `if`/`else` branch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireSubgraph {
    pub nodes: Vec<WireNode>,
    pub edges: Vec<WireEdge>,
}

/// One node of the submitted program graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<WirePortType>,
    #[serde(default)]
    pub outputs: Vec<WirePortType>,
    /// Caller-supplied OpenQASM snippet (S1's "caller-supplied" path).
    #[serde(default)]
    pub implementation: Option<String>,
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub parameter: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub block: Option<Box<WireSubgraph>>,
    #[serde(default)]
    pub then_block: Option<Box<WireSubgraph>>,
    #[serde(default)]
    pub else_block: Option<Box<WireSubgraph>>,
    #[serde(default)]
    pub loop_carried: Vec<WireLoopCarry>,
    #[serde(default)]
    pub passthrough: Vec<WirePassThrough>,
    #[serde(default)]
    pub condition_input: Option<u32>,
    #[serde(default)]
    pub shared_inputs: Vec<WireIfInput>,
    #[serde(default)]
    pub if_outputs: Vec<WireIfOutput>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireEdge {
    pub source: (String, u32),
    pub target: (String, u32),
}

/// A submitted program graph plus options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub metadata: Metadata,
    pub nodes: Vec<WireNode>,
    pub edges: Vec<WireEdge>,
    #[serde(default)]
    pub options: CompileOptions,
}

/// The reported outcome of a compile error, mirroring `CompileError`'s shape
/// without exposing Rust-internal error types over the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub node: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompileResponse {
    pub program: Option<String>,
    pub error: Option<WireError>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Convert a submitted request into the internal [`Graph`] model, resolving
/// nested `repeat`/`if-then-else` payloads recursively.
pub fn to_graph(req: &CompileRequest) -> Result<Graph, String> {
    Ok(Graph {
        nodes: convert_nodes(&req.nodes)?,
        edges: convert_edges(&req.edges),
    })
}

fn convert_nodes(nodes: &[WireNode]) -> Result<Vec<Node>, String> {
    nodes.iter().map(convert_node).collect()
}

fn convert_edges(edges: &[WireEdge]) -> Vec<Edge> {
    edges
        .iter()
        .map(|e| Edge {
            src: (NodeId(e.source.0.clone()), PortIndex(e.source.1)),
            dst: (NodeId(e.target.0.clone()), PortIndex(e.target.1)),
        })
        .collect()
}

fn convert_node(w: &WireNode) -> Result<Node, String> {
    let inputs: Vec<PortType> = w.inputs.iter().map(|t| (*t).into()).collect();
    let outputs: Vec<PortType> = w.outputs.iter().map(|t| (*t).into()).collect();

    let kind = match w.kind.as_str() {
        "qubit" => NodeKind::Qubit,
        "classical-literal" => NodeKind::ClassicalLiteral,
        "gate" => NodeKind::Gate,
        "gate-with-param" => NodeKind::GateWithParam,
        "measurement" => NodeKind::Measurement,
        "operator" => NodeKind::Operator,
        "encoder" => NodeKind::Encoder,
        "custom" => NodeKind::Custom,
        "ancilla" => NodeKind::Ancilla,
        "passthrough" => NodeKind::Passthrough,
        "repeat" => NodeKind::Repeat(convert_repeat(w)?),
        "if-then-else" => NodeKind::IfThenElse(convert_if_else(w)?),
        other => return Err(format!("node {}: unknown node kind '{other}'", w.id)),
    };

    Ok(Node {
        id: NodeId(w.id.clone()),
        kind,
        inputs,
        outputs,
        snippet: w.implementation.clone(),
    })
}

fn convert_repeat(w: &WireNode) -> Result<RepeatPayload, String> {
    let block = w
        .block
        .as_ref()
        .ok_or_else(|| format!("node {}: repeat node missing 'block'", w.id))?;
    let iterations = w
        .iterations
        .ok_or_else(|| format!("node {}: repeat node missing 'iterations'", w.id))?;
    Ok(RepeatPayload {
        iterations,
        loop_carried: w
            .loop_carried
            .iter()
            .map(|lc| LoopCarry {
                outer_input: PortIndex(lc.outer_input),
                outer_output: PortIndex(lc.outer_output),
                inner_entry: (NodeId(lc.inner_entry.0.clone()), PortIndex(lc.inner_entry.1)),
                inner_exit: (NodeId(lc.inner_exit.0.clone()), PortIndex(lc.inner_exit.1)),
            })
            .collect(),
        passthrough: w
            .passthrough
            .iter()
            .map(|pt| PassThroughBinding {
                outer_input: PortIndex(pt.outer_input),
                inner_target: (NodeId(pt.inner_target.0.clone()), PortIndex(pt.inner_target.1)),
            })
            .collect(),
        inner: Box::new(Graph {
            nodes: convert_nodes(&block.nodes)?,
            edges: convert_edges(&block.edges),
        }),
    })
}

fn convert_if_else(w: &WireNode) -> Result<IfElsePayload, String> {
    let then_block = w
        .then_block
        .as_ref()
        .ok_or_else(|| format!("node {}: if-then-else node missing 'then_block'", w.id))?;
    let else_block = w
        .else_block
        .as_ref()
        .ok_or_else(|| format!("node {}: if-then-else node missing 'else_block'", w.id))?;
    let condition_input = w
        .condition_input
        .ok_or_else(|| format!("node {}: if-then-else node missing 'condition_input'", w.id))?;

    Ok(IfElsePayload {
        condition_input: PortIndex(condition_input),
        shared_inputs: w
            .shared_inputs
            .iter()
            .map(|b| IfInputBinding {
                outer_input: PortIndex(b.outer_input),
                then_target: (NodeId(b.then_target.0.clone()), PortIndex(b.then_target.1)),
                else_target: (NodeId(b.else_target.0.clone()), PortIndex(b.else_target.1)),
            })
            .collect(),
        outputs: w
            .if_outputs
            .iter()
            .map(|o| IfOutputBinding {
                outer_output: PortIndex(o.outer_output),
                then_source: (NodeId(o.then_source.0.clone()), PortIndex(o.then_source.1)),
                else_source: (NodeId(o.else_source.0.clone()), PortIndex(o.else_source.1)),
            })
            .collect(),
        then_branch: Box::new(Graph {
            nodes: convert_nodes(&then_block.nodes)?,
            edges: convert_edges(&then_block.edges),
        }),
        else_branch: Box::new(Graph {
            nodes: convert_nodes(&else_block.nodes)?,
            edges: convert_edges(&else_block.edges),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qnode(id: &str, n_out: usize) -> WireNode {
        WireNode {
            id: id.into(),
            kind: "qubit".into(),
            inputs: vec![],
            outputs: (0..n_out).map(|_| WirePortType::Qubit { size: 1 }).collect(),
            implementation: Some("qubit[1] q;\n@leqo.output 0\nlet out = q;\n".into()),
            gate: None,
            parameter: None,
            value: None,
            size: None,
            iterations: None,
            block: None,
            then_block: None,
            else_block: None,
            loop_carried: vec![],
            passthrough: vec![],
            condition_input: None,
            shared_inputs: vec![],
            if_outputs: vec![],
        }
    }

    #[test]
    fn converts_flat_graph_to_internal_model() {
        let req = CompileRequest {
            metadata: Metadata::default(),
            nodes: vec![qnode("q0", 1)],
            edges: vec![],
            options: CompileOptions::default(),
        };
        let graph = to_graph(&req).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(matches!(graph.nodes[0].kind, NodeKind::Qubit));
    }

    #[test]
    fn rejects_unknown_node_kind() {
        let mut node = qnode("q0", 1);
        node.kind = "mystery".into();
        let req = CompileRequest {
            metadata: Metadata::default(),
            nodes: vec![node],
            edges: vec![],
            options: CompileOptions::default(),
        };
        assert!(to_graph(&req).is_err());
    }

    #[test]
    fn options_default_to_optimize_enabled() {
        let opts = CompileOptions::default();
        assert!(opts.optimize);
    }
}
