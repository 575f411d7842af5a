//! Merging (S5): splice every prepared node's statements into one program
//! over a single global `qubit[N] leqo_reg;` register.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{Annotation, Expr, IndexSet, Program, Statement};
use crate::graph::NodeId;
use crate::optimize::Allocation;
use crate::prepare::PreparedNode;
use crate::qubitmodel::QubitHandle;

/// Internal-defect failure surfaced by merging (never from user input).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MergeError(pub String);

/// Declared-qubit-register -> flat handle list, keyed by `(node, decl_name)`,
/// computed once across the whole program before allocation runs. Handles
/// for widened input ports include the freshly-allocated ancilla tail.
pub type QubitScopes = HashMap<(NodeId, String), Vec<QubitHandle>>;

const REG_NAME: &str = "leqo_reg";

/// Merge `nodes` (already in topological order) into one program.
pub fn merge(
    nodes: &[PreparedNode],
    scopes: &QubitScopes,
    alloc: &Allocation,
) -> Result<Program, MergeError> {
    let mut statements = Vec::new();
    statements.push(Statement::Version("3.1".to_string()));
    statements.push(Statement::Include("stdgates.inc".to_string()));
    statements.push(Statement::QubitDecl {
        name: REG_NAME.to_string(),
        size: Some(Expr::Int(alloc.width as i64)),
        annotations: Vec::new(),
    });

    for node in nodes {
        statements.push(Statement::BlockComment(format!("Start node {}", node.node_id)));
        statements.extend(merge_node_body(node, scopes, alloc)?);
        statements.push(Statement::BlockComment(format!("End node {}", node.node_id)));
    }

    Ok(Program { statements })
}

/// Wrap two already-merged branch statement lists into one classical
/// `if (cond) { .. } else { .. }`, per §4.2's decision to join `if`/`else`
/// branches only at merge time.
pub fn merge_if_else(condition: Expr, then_stmts: Vec<Statement>, else_stmts: Vec<Statement>) -> Statement {
    Statement::If {
        condition,
        then_body: then_stmts,
        else_body: else_stmts,
    }
}

pub(crate) fn merge_node_body(
    node: &PreparedNode,
    scopes: &QubitScopes,
    alloc: &Allocation,
) -> Result<Vec<Statement>, MergeError> {
    let input_decls: std::collections::HashSet<&str> = node
        .inputs
        .iter()
        .map(|b| b.declared_name.as_str())
        .collect();

    let mut out = Vec::new();
    for stmt in &node.program.statements {
        match stmt {
            Statement::QubitDecl { name, .. } => {
                let handles = scopes
                    .get(&(node.node_id.clone(), name.clone()))
                    .ok_or_else(|| {
                        MergeError(format!(
                            "node {}: no qubit scope recorded for declaration {name}",
                            node.node_id
                        ))
                    })?;
                let slots: Vec<u32> = handles
                    .iter()
                    .map(|h| {
                        alloc.slot_of.get(h).copied().ok_or_else(|| {
                            MergeError(format!(
                                "node {}: qubit handle {h} has no assigned slot",
                                node.node_id
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?;
                let index_set = index_set_from_slots(&slots);
                let alias_value = Expr::Index(Box::new(Expr::Ident(REG_NAME.to_string())), index_set);
                let annotations = if input_decls.contains(name.as_str()) {
                    let port = node
                        .inputs
                        .iter()
                        .find(|b| &b.declared_name == name)
                        .map(|b| b.port)
                        .unwrap_or(0);
                    vec![Annotation::Input(port)]
                } else {
                    Vec::new()
                };
                out.push(Statement::AliasDecl {
                    name: name.clone(),
                    value: alias_value,
                    annotations,
                });
            }
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

/// Build an [`IndexSet`] from slot indices in the order the underlying
/// handles were declared — order carries semantic meaning for a
/// concatenation alias, so this never sorts.
fn index_set_from_slots(slots: &[u32]) -> IndexSet {
    match slots {
        [single] => IndexSet::Single(*single),
        _ => {
            let ascending_run = slots
                .windows(2)
                .all(|w| w[1] == w[0] + 1);
            if ascending_run && !slots.is_empty() {
                IndexSet::Range(slots[0], *slots.last().unwrap())
            } else {
                IndexSet::List(slots.to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::Allocation;
    use crate::prepare::{InputBinding, OutputBinding};
    use crate::qasm_parse::parse_snippet;

    fn prepared(id: &str, src: &str, inputs: Vec<InputBinding>, outputs: Vec<OutputBinding>) -> PreparedNode {
        PreparedNode {
            node_id: NodeId(id.into()),
            program: parse_snippet(src).unwrap(),
            inputs,
            outputs,
            reusable: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn merges_single_gate_node_into_global_register() {
        let node = prepared(
            "g1",
            "qubit[1] q;\nh q;\n",
            vec![InputBinding {
                port: 0,
                declared_name: "q".into(),
                declared_size: 1,
                edge_size: 1,
                widen: false,
            }],
            vec![],
        );
        let mut scopes: QubitScopes = HashMap::new();
        scopes.insert((NodeId("g1".into()), "q".into()), vec![QubitHandle(0)]);
        let mut slot_of = HashMap::new();
        slot_of.insert(QubitHandle(0), 0);
        let alloc = Allocation { slot_of, width: 1 };

        let merged = merge(&[node], &scopes, &alloc).unwrap();
        let has_reg_decl = merged
            .statements
            .iter()
            .any(|s| matches!(s, Statement::QubitDecl { name, .. } if name == "leqo_reg"));
        assert!(has_reg_decl);
        let alias = merged
            .statements
            .iter()
            .find(|s| matches!(s, Statement::AliasDecl { name, .. } if name == "q"));
        assert!(alias.is_some());
    }

    #[test]
    fn preserves_concat_order_without_sorting() {
        let slots = vec![5, 2, 7];
        match index_set_from_slots(&slots) {
            IndexSet::List(v) => assert_eq!(v, vec![5, 2, 7]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn collapses_ascending_run_into_range() {
        match index_set_from_slots(&[2, 3, 4]) {
            IndexSet::Range(lo, hi) => assert_eq!((lo, hi), (2, 4)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
