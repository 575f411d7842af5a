//! Exhaustive, node-attributed compile error (§7).
//!
//! Each pipeline stage owns a local `thiserror` enum for the failures only it
//! can produce; this module folds every one of them into a single
//! `CompileError` so callers match on one closed set regardless of which
//! stage failed. `PostprocessError` is the one variant that signals an
//! internal defect rather than bad user input, per §7 and §4.7.

use thiserror::Error;

use crate::expand::ExpandError;
use crate::graph::{IngestError, NodeId};
use crate::merge::MergeError;
use crate::optimize::AllocError;
use crate::prepare::PrepareError;

/// The closed set of annotation violations IO Parsing can raise.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationErrorKind {
    #[error("annotation index is missing a required port")]
    MissingIndex,
    #[error("two annotations claim the same port index")]
    DuplicateIndex,
    #[error("annotation indices are not 0..k-1 contiguous")]
    NonContiguousIndex,
    #[error("annotation sits above a statement it cannot bind to")]
    WrongHost,
    #[error("more than one annotation-relevant statement shares a source line")]
    MultipleOnStatement,
    #[error("a qubit belongs to more than one @leqo.output")]
    OutputOverlap,
    #[error("a @leqo.reusable set overlaps a @leqo.output set")]
    ReusableOverlapsOutput,
}

/// The exhaustive, node-attributed error every pipeline stage reports
/// through. Variants mirror §7 one-to-one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("node {0}: graph contains a cycle")]
    CyclicGraph(NodeId),
    #[error("node {node} port {port}: type mismatch (expected {expected}, found {found})")]
    PortTypeMismatch {
        node: NodeId,
        port: u32,
        expected: String,
        found: String,
    },
    #[error("node {node} port {port}: fan-in {count}, expected exactly 1")]
    PortFanInViolation {
        node: NodeId,
        port: u32,
        count: usize,
    },
    #[error("node {0}: unknown node kind")]
    UnknownNodeKind(NodeId),
    #[error("node {0}: no snippet supplied and none could be resolved")]
    MissingSnippet(NodeId),
    #[error("node {node}: snippet failed to parse: {message}")]
    SnippetParseError { node: NodeId, message: String },
    #[error("node {node}: annotation error: {kind}")]
    AnnotationError {
        node: NodeId,
        kind: AnnotationErrorKind,
    },
    #[error("node {node} input {port}: size mismatch (declared {declared}, edge carries {found})")]
    SizeMismatch {
        node: NodeId,
        port: u32,
        declared: u32,
        found: u32,
    },
    #[error("node {node}: repeat count {iterations} exceeds the configured unroll bound {max}")]
    UnrollBoundExceeded {
        node: NodeId,
        iterations: u32,
        max: u32,
    },
    #[error("node {node}: ancilla allocation is infeasible (overconstrained pinning)")]
    AllocationInfeasible { node: NodeId },
    #[error("internal defect: postprocessing produced a malformed program: {0}")]
    PostprocessError(String),
    #[error("request graph is malformed: {0}")]
    MalformedRequest(String),
    #[error("compile request was cancelled")]
    Cancelled,
    #[error("compile request timed out")]
    Timeout,
}

impl From<IngestError> for CompileError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::DuplicateNode(id) | IngestError::DanglingNode(id) => {
                CompileError::UnknownNodeKind(id)
            }
            IngestError::DanglingPort { node, port } => CompileError::PortFanInViolation {
                node,
                port,
                count: 0,
            },
            IngestError::PortFanInViolation { node, port, count } => {
                CompileError::PortFanInViolation { node, port, count }
            }
            IngestError::QuantumFanOutViolation { node, port } => CompileError::PortTypeMismatch {
                node,
                port,
                expected: "at most one quantum sink".into(),
                found: "multiple sinks".into(),
            },
            IngestError::PortTypeMismatch {
                node,
                port,
                expected,
                found,
            } => CompileError::PortTypeMismatch {
                node,
                port,
                expected: format!("{expected:?}"),
                found: format!("{found:?}"),
            },
            IngestError::CyclicGraph(id) => CompileError::CyclicGraph(id),
        }
    }
}

impl From<ExpandError> for CompileError {
    fn from(e: ExpandError) -> Self {
        match e {
            ExpandError::UnrollBoundExceeded {
                node,
                iterations,
                max,
            } => CompileError::UnrollBoundExceeded {
                node,
                iterations,
                max,
            },
            ExpandError::Ingest(node, inner) => CompileError::from(inner).with_node(node),
        }
    }
}

impl From<PrepareError> for CompileError {
    fn from(e: PrepareError) -> Self {
        match e {
            PrepareError::ParseError { node, message } => {
                CompileError::SnippetParseError { node, message }
            }
            PrepareError::Annotation { node, kind } => CompileError::AnnotationError { node, kind },
            PrepareError::SizeMismatch {
                node,
                port,
                declared,
                found,
            } => CompileError::SizeMismatch {
                node,
                port,
                declared,
                found,
            },
        }
    }
}

impl From<AllocError> for CompileError {
    fn from(e: AllocError) -> Self {
        match e {
            AllocError::Infeasible { node } => CompileError::AllocationInfeasible { node },
        }
    }
}

impl From<MergeError> for CompileError {
    fn from(e: MergeError) -> Self {
        CompileError::PostprocessError(e.0)
    }
}

impl CompileError {
    /// Best-effort re-attribution of a node-less error to the node whose
    /// processing produced it (used when folding nested-subgraph errors up
    /// to the node that owns the subgraph, e.g. a `repeat`'s inner ingest
    /// failure should be reported against the `repeat` node itself).
    fn with_node(self, node: NodeId) -> Self {
        match self {
            CompileError::CyclicGraph(_) => CompileError::CyclicGraph(node),
            other => other,
        }
    }
}
