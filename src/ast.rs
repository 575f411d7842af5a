//! OpenQASM 3 abstract syntax tree.
//!
//! Annotations are carried as a sidecar list on the statement they precede
//! rather than as a subclass of [`Statement`]; this keeps the annotation
//! validation in `prepare` a plain pattern match instead of a type hierarchy.

#![allow(missing_docs)]

use std::fmt;

/// A `@leqo.*` annotation attached to the statement immediately below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Annotation {
    Input(u32),
    Output(u32),
    Reusable,
    /// Any other `@...` annotation this crate does not interpret; carried
    /// through untouched so re-emission is lossless.
    Other(String),
}

/// A contiguous or listed set of register indices, as written in source or
/// as resolved during merging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSet {
    Single(u32),
    /// Inclusive-inclusive range as QASM3 writes it: `a:b` means indices `a..=b`.
    Range(u32, u32),
    List(Vec<u32>),
}

impl IndexSet {
    /// Materialize into the sorted, deduplicated set of concrete indices.
    pub fn to_indices(&self) -> Vec<u32> {
        match self {
            IndexSet::Single(i) => vec![*i],
            IndexSet::Range(lo, hi) => (*lo..=*hi).collect(),
            IndexSet::List(v) => v.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSet::Single(_) => 1,
            IndexSet::Range(lo, hi) => (*hi as i64 - *lo as i64 + 1).max(0) as usize,
            IndexSet::List(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render as a QASM3 index-set literal: `{a, b, c}`.
    pub fn to_braced_literal(&self) -> String {
        let idxs = self.to_indices();
        let parts: Vec<String> = idxs.iter().map(u32::to_string).collect();
        format!("{{{}}}", parts.join(", "))
    }

    pub fn from_sorted_indices(mut idxs: Vec<u32>) -> IndexSet {
        idxs.sort_unstable();
        idxs.dedup();
        if idxs.len() == 1 {
            return IndexSet::Single(idxs[0]);
        }
        let is_contiguous = idxs.windows(2).all(|w| w[1] == w[0] + 1);
        if is_contiguous && !idxs.is_empty() {
            IndexSet::Range(idxs[0], *idxs.last().unwrap())
        } else {
            IndexSet::List(idxs)
        }
    }
}

/// An expression appearing in a gate argument, alias right-hand side, or
/// classical initializer.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Ident(String),
    Int(i64),
    Float(f64),
    /// `pi`, `tau`, `euler` and similar named constants.
    Const(String),
    /// `lhs OP rhs`, e.g. `pi / 2`.
    BinOp(Box<Expr>, BinOp, Box<Expr>),
    Neg(Box<Expr>),
    /// `base[index]` where `index` resolves to an [`IndexSet`].
    Index(Box<Expr>, IndexSet),
    /// `a ++ b ++ c`, qubit/bit concatenation.
    Concat(Vec<Expr>),
    /// Function-style call, e.g. `sin(x)`; param/arg passthrough only, never
    /// evaluated by this crate.
    Call(String, Vec<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        f.write_str(s)
    }
}

/// A classical scalar type as it appears in a declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassicalType {
    Bit(Option<u32>),
    Int(Option<u32>),
    Uint(Option<u32>),
    Float(Option<u32>),
    Bool,
}

/// One statement of an OpenQASM 3 program or snippet.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Version(String),
    Include(String),
    QubitDecl {
        name: String,
        size: Option<Expr>,
        annotations: Vec<Annotation>,
    },
    ClassicalDecl {
        ty: ClassicalType,
        name: String,
        init: Option<Expr>,
        annotations: Vec<Annotation>,
    },
    AliasDecl {
        name: String,
        value: Expr,
        annotations: Vec<Annotation>,
    },
    GateCall {
        name: String,
        params: Vec<Expr>,
        qubits: Vec<Expr>,
    },
    GateDef {
        name: String,
        params: Vec<String>,
        qubits: Vec<String>,
        body: Vec<Statement>,
    },
    Measure {
        qubit: Expr,
        target: Option<Expr>,
    },
    If {
        condition: Expr,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    Block(Vec<Statement>),
    Comment(String),
    /// A node-boundary marker (`Start node <id>` / `End node <id>`), rendered
    /// as a `/* ... */` block comment rather than a `//` line comment.
    BlockComment(String),
    /// A statement this crate parsed structurally but does not otherwise
    /// interpret; re-emitted verbatim to keep snippet text lossless.
    Raw(String),
}

impl Statement {
    /// The annotation list attached to this statement, if it carries one.
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Statement::QubitDecl { annotations, .. }
            | Statement::ClassicalDecl { annotations, .. }
            | Statement::AliasDecl { annotations, .. } => annotations,
            _ => &[],
        }
    }

    pub fn annotations_mut(&mut self) -> Option<&mut Vec<Annotation>> {
        match self {
            Statement::QubitDecl { annotations, .. }
            | Statement::ClassicalDecl { annotations, .. }
            | Statement::AliasDecl { annotations, .. } => Some(annotations),
            _ => None,
        }
    }

    /// The identifier this statement declares, if any.
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            Statement::QubitDecl { name, .. }
            | Statement::ClassicalDecl { name, .. }
            | Statement::AliasDecl { name, .. } => Some(name),
            Statement::GateDef { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A full parsed program: version, includes, and body statements in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}
