//! Canonical OpenQASM 3.1 serializer.
//!
//! Mirrors the emit-by-`writeln`-into-a-string-buffer style used elsewhere in
//! this ecosystem's QASM tooling: one statement per line, deterministic
//! whitespace, no attempt at pretty-printing beyond what downstream parsers
//! need.

use crate::ast::{Annotation, ClassicalType, Expr, IndexSet, Program, Statement};

/// Accumulates canonical OpenQASM 3.1 text.
#[derive(Default)]
pub struct Emitter {
    output: String,
    indent: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> String {
        self.output
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
    }

    fn emit_line(&mut self, line: &str) {
        self.write_indent();
        self.output.push_str(line);
        self.output.push('\n');
    }

    pub fn emit_program(&mut self, program: &Program) {
        for stmt in &program.statements {
            self.emit_statement(stmt);
        }
    }

    pub fn emit_statement(&mut self, stmt: &Statement) {
        for ann in stmt.annotations() {
            self.emit_annotation(ann);
        }
        match stmt {
            Statement::Version(v) => self.emit_line(&format!("OPENQASM {v};")),
            Statement::Include(path) => self.emit_line(&format!("include \"{path}\";")),
            Statement::QubitDecl { name, size, .. } => {
                let ty = render_qubit_type(size);
                self.emit_line(&format!("{ty} {name};"));
            }
            Statement::ClassicalDecl {
                ty, name, init, ..
            } => {
                let ty = render_classical_type(ty);
                match init {
                    Some(e) => self.emit_line(&format!("{ty} {name} = {};", render_expr(e))),
                    None => self.emit_line(&format!("{ty} {name};")),
                }
            }
            Statement::AliasDecl { name, value, .. } => {
                self.emit_line(&format!("let {name} = {};", render_expr(value)));
            }
            Statement::GateCall {
                name,
                params,
                qubits,
            } => {
                let params_str = if params.is_empty() {
                    String::new()
                } else {
                    let parts: Vec<String> = params.iter().map(render_expr).collect();
                    format!("({})", parts.join(", "))
                };
                let qubits_str: Vec<String> = qubits.iter().map(render_expr).collect();
                self.emit_line(&format!(
                    "{name}{params_str} {};",
                    qubits_str.join(", ")
                ));
            }
            Statement::GateDef {
                name,
                params,
                qubits,
                body,
            } => {
                let params_str = if params.is_empty() {
                    String::new()
                } else {
                    format!("({})", params.join(", "))
                };
                self.emit_line(&format!("gate {name}{params_str} {} {{", qubits.join(", ")));
                self.indent += 1;
                for s in body {
                    self.emit_statement(s);
                }
                self.indent -= 1;
                self.emit_line("}");
            }
            Statement::Measure { qubit, target } => match target {
                Some(t) => self.emit_line(&format!(
                    "measure {} -> {};",
                    render_expr(qubit),
                    render_expr(t)
                )),
                None => self.emit_line(&format!("measure {};", render_expr(qubit))),
            },
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                self.emit_line(&format!("if ({}) {{", render_expr(condition)));
                self.indent += 1;
                for s in then_body {
                    self.emit_statement(s);
                }
                self.indent -= 1;
                if else_body.is_empty() {
                    self.emit_line("}");
                } else {
                    self.emit_line("} else {");
                    self.indent += 1;
                    for s in else_body {
                        self.emit_statement(s);
                    }
                    self.indent -= 1;
                    self.emit_line("}");
                }
            }
            Statement::Block(stmts) => {
                for s in stmts {
                    self.emit_statement(s);
                }
            }
            Statement::Comment(text) => self.emit_line(&format!("// {text}")),
            Statement::BlockComment(text) => self.emit_line(&format!("/* {text} */")),
            Statement::Raw(text) => self.emit_line(text),
        }
    }

    fn emit_annotation(&mut self, ann: &Annotation) {
        let text = match ann {
            Annotation::Input(i) => format!("@leqo.input {i}"),
            Annotation::Output(o) => format!("@leqo.output {o}"),
            Annotation::Reusable => "@leqo.reusable".to_string(),
            Annotation::Other(s) => format!("@{s}"),
        };
        self.emit_line(&text);
    }
}

fn render_qubit_type(size: &Option<Expr>) -> String {
    match size {
        Some(e) => format!("qubit[{}]", render_expr(e)),
        None => "qubit".to_string(),
    }
}

fn render_classical_type(ty: &ClassicalType) -> String {
    match ty {
        ClassicalType::Bit(Some(n)) => format!("bit[{n}]"),
        ClassicalType::Bit(None) => "bit".to_string(),
        ClassicalType::Int(Some(n)) => format!("int[{n}]"),
        ClassicalType::Int(None) => "int".to_string(),
        ClassicalType::Uint(Some(n)) => format!("uint[{n}]"),
        ClassicalType::Uint(None) => "uint".to_string(),
        ClassicalType::Float(Some(n)) => format!("float[{n}]"),
        ClassicalType::Float(None) => "float".to_string(),
        ClassicalType::Bool => "bool".to_string(),
    }
}

pub fn render_expr(e: &Expr) -> String {
    match e {
        Expr::Ident(s) => s.clone(),
        Expr::Int(i) => i.to_string(),
        Expr::Float(f) => render_float(*f),
        Expr::Const(s) => s.clone(),
        Expr::BinOp(l, op, r) => format!("{} {} {}", render_expr(l), op, render_expr(r)),
        Expr::Neg(e) => format!("-{}", render_expr(e)),
        Expr::Index(base, idx) => format!("{}[{}]", render_expr(base), render_index_set(idx)),
        Expr::Concat(parts) => parts
            .iter()
            .map(render_expr)
            .collect::<Vec<_>>()
            .join(" ++ "),
        Expr::Call(name, args) => {
            let parts: Vec<String> = args.iter().map(render_expr).collect();
            format!("{name}({})", parts.join(", "))
        }
    }
}

fn render_index_set(idx: &IndexSet) -> String {
    match idx {
        IndexSet::Single(i) => i.to_string(),
        IndexSet::Range(lo, hi) => format!("{lo}:{hi}"),
        IndexSet::List(_) => idx.to_braced_literal(),
    }
}

/// Render a float the way QASM3 pretty-printers usually do: an integral
/// value keeps one decimal place (`2.0`), everything else keeps full
/// precision rather than rounding silently.
fn render_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qasm_parse::parse_snippet;

    #[test]
    fn roundtrips_simple_h_gate_structurally() {
        let prog = parse_snippet("qubit[1] q;\nh q;\n").unwrap();
        let mut emitter = Emitter::new();
        emitter.emit_program(&prog);
        let text = emitter.finish();
        assert!(text.contains("qubit[1] q;"));
        assert!(text.contains("h q;"));
    }

    #[test]
    fn emits_annotations_above_declaration() {
        let prog = parse_snippet("@leqo.input 0\nqubit[2] q;\n").unwrap();
        let mut emitter = Emitter::new();
        emitter.emit_program(&prog);
        let text = emitter.finish();
        let ann_pos = text.find("@leqo.input 0").unwrap();
        let decl_pos = text.find("qubit[2] q;").unwrap();
        assert!(ann_pos < decl_pos);
    }

    #[test]
    fn emits_index_set_as_range() {
        let e = Expr::Index(
            Box::new(Expr::Ident("leqo_reg".into())),
            IndexSet::Range(0, 2),
        );
        assert_eq!(render_expr(&e), "leqo_reg[0:2]");
    }

    #[test]
    fn emits_nested_if_else() {
        let prog = parse_snippet(
            "bit c;\nmeasure q -> c;\nif (c) {\n  x q;\n} else {\n  z q;\n}\n",
        )
        .unwrap();
        let mut emitter = Emitter::new();
        emitter.emit_program(&prog);
        let text = emitter.finish();
        assert!(text.contains("if (c) {"));
        assert!(text.contains("} else {"));
    }

    #[test]
    fn node_boundary_markers_render_as_block_comments() {
        let prog = Program {
            statements: vec![Statement::BlockComment("Start node n1".into())],
        };
        let mut emitter = Emitter::new();
        emitter.emit_program(&prog);
        let text = emitter.finish();
        assert!(text.contains("/* Start node n1 */"));
        assert!(!text.contains("// Start node n1"));
    }

    #[test]
    fn parsed_line_comments_still_render_with_slashes() {
        let prog = parse_snippet("// a note\nqubit[1] q;\n").unwrap();
        let mut emitter = Emitter::new();
        emitter.emit_program(&prog);
        let text = emitter.finish();
        assert!(text.contains("// a note"));
    }
}
