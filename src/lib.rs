//! Crate root: public surface and cross-module invariants for the LEQO
//! OpenQASM 3.1 compile pipeline.
//!
//! This module is the **single canonical entry-point** for downstream users
//! of the library. It declares the pipeline stage modules (S0–S7), the
//! ambient service shell around them, and re-exports the handful of types a
//! caller actually needs to drive a compile end-to-end.
//!
//! ## Invariants
//!
//! - **One entry point.** [`service::CompileService::compile`] is the sole
//!   async entry point; it runs every stage on one logical task and performs
//!   no I/O of its own beyond the single `SnippetSource::lookup` suspension
//!   point per unresolved node.
//! - **Fail fast, no partial output.** Every stage returns `Result<_,
//!   error::CompileError>` and stops the pipeline at the first failure;
//!   a successful [`service::CompileService::compile`] call always produces a
//!   complete, canonically-formatted OpenQASM 3.1 program.
//! - **Determinism.** Synthetic node/alias identifiers are derived from a
//!   per-request [`idgen::IdGen`] seeded by a content hash of the request
//!   itself, never from wall-clock time or OS randomness, so re-compiling the
//!   same request byte-for-byte produces byte-identical output.
//! - **No unsafe.** The crate forbids `unsafe` throughout.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// The OpenQASM-adjacent abstract syntax tree shared by the parser, the
/// per-stage transforms, and the emitter.
pub mod ast;
/// S0: request ingestion into a validated node/edge graph.
pub mod graph;
/// S2: nested-subgraph expansion (`repeat`/`if-then-else` unrolling).
pub mod expand;
/// S3: per-node preprocessing (renaming, alias inlining, IO parsing, size
/// casting).
pub mod prepare;
/// Renaming pass used by preprocessing (qubit/bit identifier hygiene).
pub mod rename;
/// Alias-inlining pass used by preprocessing.
pub mod alias_inline;
/// The small qubit/bit index algebra shared by preprocessing and merging.
pub mod qubitmodel;
/// S4: ancilla-reuse optimization (greedy interval-graph coloring).
pub mod optimize;
/// S5: merges every node's (possibly optimized) body into one program.
pub mod merge;
/// S6: postprocessing (dedup, canonical formatting, sanity parse).
pub mod postprocess;
/// Hand-rolled recursive-descent OpenQASM 3 snippet parser.
pub mod qasm_parse;
/// Canonical-formatting OpenQASM 3 emitter.
pub mod qasm_emit;
/// The exhaustive, node-attributed [`error::CompileError`] every stage
/// reports through.
pub mod error;
/// The `SnippetSource`/`Enricher` external-collaborator trait boundary.
pub mod source;
/// Cooperative cancellation flag.
pub mod cancel;
/// Deterministic per-request identifier generator.
pub mod idgen;
/// The wire schema (`CompileRequest`/`CompileResponse`/...) and its
/// `serde` (de)serialization.
pub mod wire;
/// The service shell: [`service::CompileService`] orchestrates S0–S7.
pub mod service;

pub use error::CompileError;
pub use service::CompileService;
pub use source::{NodeDescriptor, NoopSource, SnippetSource};
pub use wire::{CompileOptions, CompileRequest, CompileResponse};
