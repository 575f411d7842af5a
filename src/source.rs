//! Snippet Acquisition (S1): resolve a node's OpenQASM body either from the
//! request itself (`Node::snippet`) or from an external source keyed on node
//! identity and kind.

use async_trait::async_trait;

use crate::graph::{NodeKind, PortType};

/// Everything a [`SnippetSource`] needs to look a node's snippet up, short of
/// exposing the whole internal [`crate::graph::Graph`].
#[derive(Clone, Debug)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub kind_label: &'static str,
    pub inputs: Vec<PortType>,
    pub outputs: Vec<PortType>,
}

impl NodeDescriptor {
    pub fn new(node_id: &str, kind: &NodeKind, inputs: &[PortType], outputs: &[PortType]) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind_label: kind.label(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        }
    }
}

/// An external lookup for a node's OpenQASM body, consulted only when the
/// request did not embed a snippet inline. Implementations may call out to a
/// registry, a cache, or a catalog service; the pipeline awaits each lookup
/// and treats `None` as "no snippet available" (`MissingSnippet`), not an
/// error in its own right.
#[async_trait]
pub trait SnippetSource: Send + Sync {
    async fn lookup(&self, descriptor: &NodeDescriptor) -> Option<String>;
}

/// A source that never resolves anything. Used by the CLI and by tests that
/// always embed snippets inline via `Node::snippet`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl SnippetSource for NoopSource {
    async fn lookup(&self, _descriptor: &NodeDescriptor) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_source_never_resolves() {
        let source = NoopSource;
        let descriptor = NodeDescriptor {
            node_id: "n1".into(),
            kind_label: "gate",
            inputs: vec![PortType::Qubit(1)],
            outputs: vec![PortType::Qubit(1)],
        };
        assert!(source.lookup(&descriptor).await.is_none());
    }
}
