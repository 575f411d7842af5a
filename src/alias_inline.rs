//! Alias Inlining: the second S3 sub-transform.
//!
//! Replaces every `let name = expr;` whose right-hand side is a constant
//! slice/concat over an earlier declaration with the resolved expression at
//! every use site, then drops the alias. Aliases carrying `@leqo.output` or
//! `@leqo.reusable` are the pipeline's contract surface and are always kept,
//! even when they would otherwise be inlinable.

use std::collections::HashMap;

use crate::ast::{Annotation, Expr, Program, Statement};

/// Inline plain aliases in `program`, keeping annotated ones.
pub fn inline_aliases(program: Program) -> Program {
    let mut bindings: HashMap<String, Expr> = HashMap::new();
    let mut kept = Vec::with_capacity(program.statements.len());

    for mut stmt in program.statements {
        substitute_in_statement(&mut stmt, &bindings);
        match stmt {
            Statement::AliasDecl {
                name,
                value,
                annotations,
            } if !carries_contract_annotation(&annotations) => {
                bindings.insert(name, value);
            }
            other => kept.push(other),
        }
    }

    Program { statements: kept }
}

fn carries_contract_annotation(anns: &[Annotation]) -> bool {
    anns.iter()
        .any(|a| matches!(a, Annotation::Output(_) | Annotation::Reusable))
}

fn substitute_in_statement(stmt: &mut Statement, bindings: &HashMap<String, Expr>) {
    match stmt {
        Statement::AliasDecl { value, .. } => substitute_in_expr(value, bindings),
        Statement::ClassicalDecl { init: Some(e), .. } => substitute_in_expr(e, bindings),
        Statement::GateCall { params, qubits, .. } => {
            for p in params {
                substitute_in_expr(p, bindings);
            }
            for q in qubits {
                substitute_in_expr(q, bindings);
            }
        }
        Statement::Measure { qubit, target } => {
            substitute_in_expr(qubit, bindings);
            if let Some(t) = target {
                substitute_in_expr(t, bindings);
            }
        }
        Statement::If {
            condition,
            then_body,
            else_body,
        } => {
            substitute_in_expr(condition, bindings);
            for s in then_body {
                substitute_in_statement(s, bindings);
            }
            for s in else_body {
                substitute_in_statement(s, bindings);
            }
        }
        Statement::Block(stmts) => {
            for s in stmts {
                substitute_in_statement(s, bindings);
            }
        }
        Statement::GateDef { body, .. } => {
            for s in body {
                substitute_in_statement(s, bindings);
            }
        }
        _ => {}
    }
}

fn substitute_in_expr(expr: &mut Expr, bindings: &HashMap<String, Expr>) {
    match expr {
        Expr::Ident(name) => {
            if let Some(replacement) = bindings.get(name.as_str()) {
                *expr = replacement.clone();
            }
        }
        Expr::Index(base, idx_set) => {
            substitute_in_expr(base, bindings);
            // A bound alias indexed again (`alias[0]`) resolves against the
            // substituted base, which alias inlining above has already
            // turned back into a concrete qubit/index expression.
            let _ = idx_set;
        }
        Expr::BinOp(l, _, r) => {
            substitute_in_expr(l, bindings);
            substitute_in_expr(r, bindings);
        }
        Expr::Neg(e) => substitute_in_expr(e, bindings),
        Expr::Concat(parts) => {
            for p in parts {
                substitute_in_expr(p, bindings);
            }
        }
        Expr::Call(_, args) => {
            for a in args {
                substitute_in_expr(a, bindings);
            }
        }
        Expr::Int(_) | Expr::Float(_) | Expr::Const(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qasm_parse::parse_snippet;

    #[test]
    fn inlines_plain_alias_and_drops_declaration() {
        let prog = parse_snippet("qubit[2] q;\nlet a = q[0];\nh a;\n").unwrap();
        let inlined = inline_aliases(prog);
        assert_eq!(inlined.statements.len(), 2);
        match &inlined.statements[1] {
            Statement::GateCall { qubits, .. } => {
                assert!(matches!(&qubits[0], Expr::Index(_, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn keeps_output_annotated_alias() {
        let prog =
            parse_snippet("qubit[2] q;\n@leqo.output 0\nlet out = q;\n").unwrap();
        let inlined = inline_aliases(prog);
        assert_eq!(inlined.statements.len(), 2);
        assert!(matches!(inlined.statements[1], Statement::AliasDecl { .. }));
    }

    #[test]
    fn keeps_reusable_annotated_alias() {
        let prog =
            parse_snippet("qubit[1] anc;\n@leqo.reusable\nlet scratch = anc;\n").unwrap();
        let inlined = inline_aliases(prog);
        assert!(inlined
            .statements
            .iter()
            .any(|s| matches!(s, Statement::AliasDecl { .. })));
    }

    #[test]
    fn inlines_transitively_through_two_aliases() {
        let prog = parse_snippet(
            "qubit[2] q;\nlet a = q[0];\nlet b = a;\nh b;\n",
        )
        .unwrap();
        let inlined = inline_aliases(prog);
        match inlined.statements.last().unwrap() {
            Statement::GateCall { qubits, .. } => {
                assert!(matches!(&qubits[0], Expr::Index(_, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
