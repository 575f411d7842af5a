//! Shared qubit-handle resolution used by S3 (IO Parsing), S4 (ancilla
//! reuse), and S5 (merging).
//!
//! After Renaming and Alias Inlining, every qubit-valued expression left in a
//! snippet is grounded in a handful of shapes: a bare identifier, an index
//! into one, or a concatenation of either. This module resolves those shapes
//! against a per-node table of `identifier -> [QubitHandle]` so the rest of
//! the pipeline never re-implements expression walking.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{Expr, IndexSet};

/// A single logical qubit, unique for the lifetime of one compile request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QubitHandle(pub u32);

impl fmt::Display for QubitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Hands out fresh, request-unique qubit handles.
#[derive(Default)]
pub struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn fresh(&mut self) -> QubitHandle {
        let h = QubitHandle(self.next);
        self.next += 1;
        h
    }

    pub fn fresh_n(&mut self, n: u32) -> Vec<QubitHandle> {
        (0..n).map(|_| self.fresh()).collect()
    }
}

/// Maps a snippet-local (already renamed) identifier to the qubit handles it
/// currently denotes.
pub type LocalScope = HashMap<String, Vec<QubitHandle>>;

/// Failure resolving a qubit expression against a [`LocalScope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    UnknownIdentifier(String),
    NotAQubitExpression,
    IndexOutOfRange { index: u32, len: usize },
}

/// Resolve a qubit-valued expression (`Ident`, `Index`, `Concat`) to its flat
/// list of handles, in order.
pub fn resolve_qubit_expr(expr: &Expr, scope: &LocalScope) -> Result<Vec<QubitHandle>, ResolveError> {
    match expr {
        Expr::Ident(name) => scope
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| ResolveError::UnknownIdentifier(name.clone())),
        Expr::Index(base, idx_set) => {
            let base_handles = resolve_qubit_expr(base, scope)?;
            select_by_position(&base_handles, idx_set)
        }
        Expr::Concat(parts) => {
            let mut out = Vec::new();
            for p in parts {
                out.extend(resolve_qubit_expr(p, scope)?);
            }
            Ok(out)
        }
        _ => Err(ResolveError::NotAQubitExpression),
    }
}

fn select_by_position(
    handles: &[QubitHandle],
    idx_set: &IndexSet,
) -> Result<Vec<QubitHandle>, ResolveError> {
    let mut out = Vec::new();
    for i in idx_set.to_indices() {
        let h = handles
            .get(i as usize)
            .ok_or(ResolveError::IndexOutOfRange {
                index: i,
                len: handles.len(),
            })?;
        out.push(*h);
    }
    Ok(out)
}

/// True iff `expr` is shaped like a qubit reference this crate understands
/// (`Ident`, `Index`, `Concat` composed only of those), without resolving it
/// against a scope. Used by IO Parsing to reject classical right-hand sides
/// before a [`LocalScope`] is even available.
pub fn is_qubit_expr_shape(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Index(base, _) => is_qubit_expr_shape(base),
        Expr::Concat(parts) => parts.iter().all(is_qubit_expr_shape),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn scope_with(pairs: &[(&str, Vec<u32>)]) -> LocalScope {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|i| QubitHandle(*i)).collect()))
            .collect()
    }

    #[test]
    fn resolves_plain_identifier() {
        let scope = scope_with(&[("q", vec![0, 1])]);
        let resolved = resolve_qubit_expr(&Expr::Ident("q".into()), &scope).unwrap();
        assert_eq!(resolved, vec![QubitHandle(0), QubitHandle(1)]);
    }

    #[test]
    fn resolves_index_by_position() {
        let scope = scope_with(&[("q", vec![5, 6, 7])]);
        let expr = Expr::Index(Box::new(Expr::Ident("q".into())), IndexSet::Single(1));
        let resolved = resolve_qubit_expr(&expr, &scope).unwrap();
        assert_eq!(resolved, vec![QubitHandle(6)]);
    }

    #[test]
    fn resolves_concat_of_two_identifiers() {
        let scope = scope_with(&[("a", vec![0]), ("b", vec![1, 2])]);
        let expr = Expr::Concat(vec![Expr::Ident("a".into()), Expr::Ident("b".into())]);
        let resolved = resolve_qubit_expr(&expr, &scope).unwrap();
        assert_eq!(resolved, vec![QubitHandle(0), QubitHandle(1), QubitHandle(2)]);
    }

    #[test]
    fn rejects_out_of_range_index() {
        let scope = scope_with(&[("q", vec![0])]);
        let expr = Expr::Index(Box::new(Expr::Ident("q".into())), IndexSet::Single(3));
        assert_eq!(
            resolve_qubit_expr(&expr, &scope).unwrap_err(),
            ResolveError::IndexOutOfRange { index: 3, len: 1 }
        );
    }
}
