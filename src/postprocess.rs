//! Postprocessing (S6): drop duplicate `include`s and redundant `gate`
//! definitions, verify the merged program re-parses, and serialize
//! canonically.
//!
//! Failure here indicates a defect in an earlier stage, not bad user input —
//! it reuses [`MergeError`] as its carrier rather than introducing a second
//! "internal defect, one string" error type.

use std::collections::HashSet;

use crate::ast::{Program, Statement};
use crate::merge::MergeError;
use crate::qasm_emit::Emitter;
use crate::qasm_parse::parse_snippet;

/// Strip duplicate includes/gate-defs, re-parse to catch malformed merges,
/// and return the canonical OpenQASM 3.1 text.
pub fn postprocess(program: Program) -> Result<String, MergeError> {
    let deduped = dedup(program);

    let mut emitter = Emitter::new();
    emitter.emit_program(&deduped);
    let text = emitter.finish();

    parse_snippet(&text)
        .map_err(|e| MergeError(format!("postprocessing produced a program that fails to re-parse: {e}")))?;

    Ok(text)
}

fn dedup(program: Program) -> Program {
    let mut seen_includes: HashSet<String> = HashSet::new();
    let mut seen_gatedefs: HashSet<String> = HashSet::new();
    let mut statements = Vec::with_capacity(program.statements.len());

    for stmt in program.statements {
        match &stmt {
            Statement::Include(path) => {
                if !seen_includes.insert(path.clone()) {
                    continue;
                }
            }
            Statement::GateDef {
                name,
                params,
                qubits,
                body,
            } => {
                let key = format!("{name}:{params:?}:{qubits:?}:{body:?}");
                if !seen_gatedefs.insert(key) {
                    continue;
                }
            }
            _ => {}
        }
        statements.push(stmt);
    }

    Program { statements }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn drops_duplicate_includes() {
        let program = Program {
            statements: vec![
                Statement::Include("stdgates.inc".into()),
                Statement::Include("stdgates.inc".into()),
                Statement::QubitDecl {
                    name: "q".into(),
                    size: Some(Expr::Int(1)),
                    annotations: vec![],
                },
            ],
        };
        let out = postprocess(program).unwrap();
        assert_eq!(out.matches("include \"stdgates.inc\";").count(), 1);
    }

    #[test]
    fn drops_identical_redundant_gate_definitions() {
        let gate = Statement::GateDef {
            name: "myg".into(),
            params: vec![],
            qubits: vec!["q".into()],
            body: vec![Statement::GateCall {
                name: "h".into(),
                params: vec![],
                qubits: vec![Expr::Ident("q".into())],
            }],
        };
        let program = Program {
            statements: vec![gate.clone(), gate],
        };
        let out = postprocess(program).unwrap();
        assert_eq!(out.matches("gate myg").count(), 1);
    }

    #[test]
    fn surfaces_merge_error_on_unparsable_output() {
        let program = Program {
            statements: vec![Statement::Raw("this is not qasm {{{".into())],
        };
        assert!(postprocess(program).is_err());
    }
}
