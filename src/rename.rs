//! Renaming: the first S3 sub-transform.
//!
//! Every identifier a snippet *declares* — qubits, classical variables,
//! aliases, gate names — is rewritten to carry a node-unique prefix so that
//! after merging, no two prepared nodes can collide on a name. Built-in
//! identifiers (gate names from `stdgates.inc`, `pi`/`tau`/`euler`) are left
//! untouched.

use std::collections::{HashMap, HashSet};

use crate::ast::{Expr, Program, Statement};
use crate::idgen::derive_rename_prefix;

const BUILTIN_GATES: &[&str] = &[
    "h", "x", "y", "z", "s", "sdg", "t", "tdg", "cx", "cy", "cz", "ccx", "swap", "rx", "ry", "rz",
    "u1", "u2", "u3", "id", "reset", "p", "crz", "cp", "ch",
];

/// Rewrite every declared identifier in `program` with a prefix derived
/// deterministically from `node_id`. Returns the rewritten program together
/// with the prefix used (callers need it to recognize renamed annotations).
pub fn rename_snippet(node_id: &str, mut program: Program) -> Program {
    let prefix = derive_rename_prefix(node_id);
    let declared = collect_declared_names(&program.statements);
    let mut mapping: HashMap<String, String> = HashMap::new();
    for name in declared {
        if !is_builtin(&name) {
            mapping.insert(name.clone(), format!("{prefix}_{name}"));
        }
    }
    for stmt in &mut program.statements {
        rename_statement(stmt, &mapping);
    }
    program
}

fn is_builtin(name: &str) -> bool {
    BUILTIN_GATES.contains(&name) || name == "pi" || name == "tau" || name == "euler"
}

fn collect_declared_names(stmts: &[Statement]) -> HashSet<String> {
    let mut names = HashSet::new();
    for s in stmts {
        match s {
            Statement::QubitDecl { name, .. }
            | Statement::ClassicalDecl { name, .. }
            | Statement::AliasDecl { name, .. } => {
                names.insert(name.clone());
            }
            Statement::GateDef { name, body, .. } => {
                names.insert(name.clone());
                names.extend(collect_declared_names(body));
            }
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                names.extend(collect_declared_names(then_body));
                names.extend(collect_declared_names(else_body));
            }
            Statement::Block(body) => names.extend(collect_declared_names(body)),
            _ => {}
        }
    }
    names
}

fn rename_statement(stmt: &mut Statement, mapping: &HashMap<String, String>) {
    match stmt {
        Statement::QubitDecl { name, size, .. } => {
            rename_in_place(name, mapping);
            if let Some(e) = size {
                rename_expr(e, mapping);
            }
        }
        Statement::ClassicalDecl { name, init, .. } => {
            rename_in_place(name, mapping);
            if let Some(e) = init {
                rename_expr(e, mapping);
            }
        }
        Statement::AliasDecl { name, value, .. } => {
            rename_in_place(name, mapping);
            rename_expr(value, mapping);
        }
        Statement::GateCall { params, qubits, .. } => {
            for p in params {
                rename_expr(p, mapping);
            }
            for q in qubits {
                rename_expr(q, mapping);
            }
        }
        Statement::GateDef { body, .. } => {
            for s in body {
                rename_statement(s, mapping);
            }
        }
        Statement::Measure { qubit, target } => {
            rename_expr(qubit, mapping);
            if let Some(t) = target {
                rename_expr(t, mapping);
            }
        }
        Statement::If {
            condition,
            then_body,
            else_body,
        } => {
            rename_expr(condition, mapping);
            for s in then_body {
                rename_statement(s, mapping);
            }
            for s in else_body {
                rename_statement(s, mapping);
            }
        }
        Statement::Block(stmts) => {
            for s in stmts {
                rename_statement(s, mapping);
            }
        }
        Statement::Version(_)
        | Statement::Include(_)
        | Statement::Comment(_)
        | Statement::BlockComment(_)
        | Statement::Raw(_) => {}
    }
}

fn rename_in_place(name: &mut String, mapping: &HashMap<String, String>) {
    if let Some(renamed) = mapping.get(name.as_str()) {
        *name = renamed.clone();
    }
}

fn rename_expr(expr: &mut Expr, mapping: &HashMap<String, String>) {
    match expr {
        Expr::Ident(s) => rename_in_place(s, mapping),
        Expr::Int(_) | Expr::Float(_) | Expr::Const(_) => {}
        Expr::BinOp(l, _, r) => {
            rename_expr(l, mapping);
            rename_expr(r, mapping);
        }
        Expr::Neg(e) => rename_expr(e, mapping),
        Expr::Index(base, _) => rename_expr(base, mapping),
        Expr::Concat(parts) => {
            for p in parts {
                rename_expr(p, mapping);
            }
        }
        Expr::Call(_, args) => {
            for a in args {
                rename_expr(a, mapping);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qasm_parse::parse_snippet;

    #[test]
    fn renames_qubit_declaration_and_usage() {
        let prog = parse_snippet("qubit[1] q;\nh q;\n").unwrap();
        let renamed = rename_snippet("node_a", prog);
        match &renamed.statements[0] {
            Statement::QubitDecl { name, .. } => assert!(name.starts_with('n') && name.contains("_q")),
            other => panic!("unexpected {other:?}"),
        }
        match &renamed.statements[1] {
            Statement::GateCall { name, qubits, .. } => {
                assert_eq!(name, "h");
                assert!(matches!(&qubits[0], Expr::Ident(s) if s.contains("_q")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn leaves_builtin_gate_names_untouched() {
        let prog = parse_snippet("qubit[2] q;\ncx q[0], q[1];\n").unwrap();
        let renamed = rename_snippet("node_b", prog);
        match &renamed.statements[1] {
            Statement::GateCall { name, .. } => assert_eq!(name, "cx"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn different_nodes_get_different_prefixes() {
        let p1 = rename_snippet("node_a", parse_snippet("qubit[1] q;\n").unwrap());
        let p2 = rename_snippet("node_b", parse_snippet("qubit[1] q;\n").unwrap());
        let n1 = p1.statements[0].declared_name().unwrap().to_string();
        let n2 = p2.statements[0].declared_name().unwrap().to_string();
        assert_ne!(n1, n2);
    }
}
