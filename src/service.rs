//! `CompileService`: the orchestrator that threads a submitted program graph
//! through S0-S7 (§2, §4.7).
//!
//! Every stage module (`graph`, `expand`, `prepare`, `optimize`, `merge`,
//! `postprocess`) is a pure function over its own inputs; this module owns
//! the state that has to accumulate *across* nodes as the pipeline walks the
//! schedule — the qubit handle allocator, each handle's birth/death rank, and
//! the `(node, declared-name) -> handles` scopes `merge` needs — and drives
//! the one genuinely asynchronous step (S1's snippet lookups) as a single
//! pre-pass so the rest of the walk is ordinary, cancellable CPU work.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time;
use tracing::{debug, instrument, warn};

use crate::ast::{Expr, Program, Statement};
use crate::cancel::CancellationToken;
use crate::error::CompileError;
use crate::expand::{self, ExpandOptions};
use crate::graph::{self, Edge, Graph, IfElsePayload, Node, NodeId, NodeKind, PortIndex, PortType, ScheduledGraph};
use crate::idgen::IdGen;
use crate::merge::{self, QubitScopes};
use crate::optimize::{self, Allocation, Branch, EndRank, Interval, MutexTag};
use crate::postprocess;
use crate::prepare::{self, Diagnostic, InputEdgeInfo, PreparedNode};
use crate::qubitmodel::{resolve_qubit_expr, HandleAllocator, LocalScope, QubitHandle};
use crate::source::{NodeDescriptor, SnippetSource};
use crate::wire::{CompileRequest, CompileResponse, WireError};

/// One already-compiled node or `if`/`else` node in schedule order, ready for
/// S5 assembly. Flat compared to `NodeKind` because `Repeat` never survives
/// S2 and every other kind produces a single leaf unit.
enum MergeUnit {
    Leaf(NodeId),
    If {
        node_id: NodeId,
        condition: Expr,
        then_units: Vec<MergeUnit>,
        else_units: Vec<MergeUnit>,
    },
}

/// Cross-node state accumulated while walking the schedule.
struct Ctx<'a> {
    resolved_snippets: &'a HashMap<NodeId, String>,
    allocator: HandleAllocator,
    idgen: IdGen,
    rank_counter: usize,
    scopes: QubitScopes,
    output_handles: HashMap<(NodeId, u32), Vec<QubitHandle>>,
    prepared: HashMap<NodeId, PreparedNode>,
    preseeded_nodes: HashSet<NodeId>,
    births: HashMap<QubitHandle, usize>,
    owner: HashMap<QubitHandle, NodeId>,
    last_use: HashMap<QubitHandle, usize>,
    reusable_ranks: HashMap<QubitHandle, usize>,
    infinite: HashSet<QubitHandle>,
    mutex_of: HashMap<QubitHandle, MutexTag>,
    /// Tags for `Interval::equal_group`: every handle sharing a tag must
    /// resolve to the same allocator-chosen slot, but the tag itself is
    /// opaque — it is never used as a slot index.
    equal_group_of: HashMap<QubitHandle, u32>,
    next_equal_group: u32,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Ctx<'a> {
    fn new(resolved_snippets: &'a HashMap<NodeId, String>, idgen: IdGen) -> Self {
        Self {
            resolved_snippets,
            allocator: HandleAllocator::new(),
            idgen,
            rank_counter: 0,
            scopes: HashMap::new(),
            output_handles: HashMap::new(),
            prepared: HashMap::new(),
            preseeded_nodes: HashSet::new(),
            births: HashMap::new(),
            owner: HashMap::new(),
            last_use: HashMap::new(),
            reusable_ranks: HashMap::new(),
            infinite: HashSet::new(),
            mutex_of: HashMap::new(),
            equal_group_of: HashMap::new(),
            next_equal_group: 0,
            diagnostics: Vec::new(),
        }
    }

    fn new_rank(&mut self) -> usize {
        let r = self.rank_counter;
        self.rank_counter += 1;
        r
    }

    fn fresh_handles(&mut self, n: u32, owner: &NodeId, rank: usize, mutex: Option<MutexTag>) -> Vec<QubitHandle> {
        let handles = self.allocator.fresh_n(n);
        for h in &handles {
            self.births.insert(*h, rank);
            self.owner.insert(*h, owner.clone());
            self.last_use.insert(*h, rank);
            if let Some(m) = &mutex {
                self.mutex_of.insert(*h, m.clone());
            }
        }
        handles
    }

    fn mark_use(&mut self, handles: &[QubitHandle], rank: usize) {
        for h in handles {
            let entry = self.last_use.entry(*h).or_insert(rank);
            if rank > *entry {
                *entry = rank;
            }
        }
    }

    fn build_intervals(&self) -> Vec<Interval> {
        self.births
            .iter()
            .map(|(handle, &start)| {
                let end = if self.infinite.contains(handle) {
                    EndRank::Infinite
                } else if let Some(&r) = self.reusable_ranks.get(handle) {
                    EndRank::Finite(r)
                } else {
                    let last = self.last_use.get(handle).copied().unwrap_or(start);
                    EndRank::Finite(last + 1)
                };
                Interval {
                    qubit: *handle,
                    owner_node: self.owner.get(handle).cloned().unwrap_or_else(|| NodeId(String::new())),
                    start,
                    end,
                    mutex: self.mutex_of.get(handle).cloned(),
                    equal_group: self.equal_group_of.get(handle).copied(),
                }
            })
            .collect()
    }
}

/// Drives S0-S7 for one submitted request. Stateless itself; every field is
/// a knob, not accumulated state (that lives in `Ctx`, scoped to one call).
pub struct CompileService<S: SnippetSource> {
    source: S,
    max_unroll: u32,
    optimize: bool,
    timeout: Option<Duration>,
}

/// Default ceiling on `repeat` unrolling, per §4.7, when an embedder doesn't
/// override it with [`CompileService::with_max_unroll`].
pub const DEFAULT_MAX_UNROLL: u32 = 1024;

impl<S: SnippetSource> CompileService<S> {
    pub fn new(source: S, max_unroll: u32, optimize: bool) -> Self {
        Self {
            source,
            max_unroll,
            optimize,
            timeout: None,
        }
    }

    /// Build a service with the default unroll bound and optimization on,
    /// for the common case where an embedder has no reason to deviate.
    pub fn with_source(source: S) -> Self {
        Self::new(source, DEFAULT_MAX_UNROLL, true)
    }

    /// Override the per-request `repeat` unroll ceiling. An embedder-level
    /// knob, deliberately absent from the wire schema's `CompileOptions` —
    /// see `wire::CompileOptions`'s doc comment.
    pub fn with_max_unroll(mut self, max_unroll: u32) -> Self {
        self.max_unroll = max_unroll;
        self
    }

    /// Bound how long one request may run (§4.7's "timeouts are expressed
    /// per request"). Unset by default — an embedder that wants a deadline
    /// opts in explicitly.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Compile `req`, never returning `Err` itself: every failure is folded
    /// into `CompileResponse.error` so callers always get a wire-shaped
    /// answer, per §7's "one closed response shape" rule.
    #[instrument(skip(self, req, cancel), fields(nodes = req.nodes.len()))]
    pub async fn compile(&self, req: &CompileRequest, cancel: &CancellationToken) -> CompileResponse {
        let result = match self.timeout {
            // On expiry the pipeline behaves exactly as on cancellation: no
            // partial program is ever returned.
            Some(d) => match time::timeout(d, self.compile_inner(req, cancel)).await {
                Ok(r) => r,
                Err(_) => Err(CompileError::Timeout),
            },
            None => self.compile_inner(req, cancel).await,
        };
        match result {
            Ok((program, diagnostics)) => CompileResponse {
                program: Some(program),
                error: None,
                diagnostics,
            },
            Err(e) => {
                warn!(error = %e, "compile request failed");
                CompileResponse {
                    program: None,
                    error: Some(to_wire_error(&e)),
                    diagnostics: Vec::new(),
                }
            }
        }
    }

    async fn compile_inner(
        &self,
        req: &CompileRequest,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<String>), CompileError> {
        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let request_bytes = serde_json::to_vec(req).unwrap_or_default();
        let idgen = IdGen::from_request_bytes(&request_bytes);

        let raw_graph = crate::wire::to_graph(req).map_err(CompileError::MalformedRequest)?;
        graph::ingest_recursive(raw_graph.clone())?;

        let expand_opts = ExpandOptions {
            max_unroll: self.max_unroll,
            rotate_loop_carry: false,
        };
        let flat_graph = expand::expand(raw_graph, &expand_opts)?;

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let mut missing = Vec::new();
        collect_missing(&flat_graph, &mut missing);

        let mut resolved: HashMap<NodeId, String> = HashMap::new();
        for (id, descriptor) in &missing {
            if cancel.is_cancelled() {
                return Err(CompileError::Cancelled);
            }
            debug!(node = %id, "fetching snippet from source");
            let snippet = self
                .source
                .lookup(descriptor)
                .await
                .ok_or_else(|| CompileError::MissingSnippet(id.clone()))?;
            resolved.insert(id.clone(), snippet);
        }

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let scheduled = graph::ingest(flat_graph)?;

        let mut ctx = Ctx::new(&resolved, idgen);
        let top_units = compile_graph_level(&mut ctx, &scheduled, None)?;

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let intervals = ctx.build_intervals();
        let alloc = optimize::allocate(&intervals, self.optimize)?;

        let mut statements = vec![
            Statement::Version("3.1".to_string()),
            Statement::Include("stdgates.inc".to_string()),
            Statement::QubitDecl {
                name: "leqo_reg".to_string(),
                size: Some(Expr::Int(alloc.width as i64)),
                annotations: Vec::new(),
            },
        ];
        statements.extend(assemble(&top_units, &ctx, &ctx.scopes, &alloc)?);

        let program = Program { statements };

        if cancel.is_cancelled() {
            return Err(CompileError::Cancelled);
        }

        let text = postprocess::postprocess(program)?;
        let diagnostics = ctx
            .diagnostics
            .iter()
            .map(|d| format!("{}: {}", d.node, d.message))
            .collect();
        Ok((text, diagnostics))
    }
}

fn to_wire_error(e: &CompileError) -> WireError {
    let node = match e {
        CompileError::CyclicGraph(n)
        | CompileError::PortTypeMismatch { node: n, .. }
        | CompileError::PortFanInViolation { node: n, .. }
        | CompileError::UnknownNodeKind(n)
        | CompileError::MissingSnippet(n)
        | CompileError::SnippetParseError { node: n, .. }
        | CompileError::AnnotationError { node: n, .. }
        | CompileError::SizeMismatch { node: n, .. }
        | CompileError::UnrollBoundExceeded { node: n, .. }
        | CompileError::AllocationInfeasible { node: n } => Some(n.to_string()),
        CompileError::PostprocessError(_)
        | CompileError::MalformedRequest(_)
        | CompileError::Cancelled
        | CompileError::Timeout => None,
    };
    let kind = match e {
        CompileError::CyclicGraph(_) => "cyclic_graph",
        CompileError::PortTypeMismatch { .. } => "port_type_mismatch",
        CompileError::PortFanInViolation { .. } => "port_fan_in_violation",
        CompileError::UnknownNodeKind(_) => "unknown_node_kind",
        CompileError::MissingSnippet(_) => "missing_snippet",
        CompileError::SnippetParseError { .. } => "snippet_parse_error",
        CompileError::AnnotationError { .. } => "annotation_error",
        CompileError::SizeMismatch { .. } => "size_mismatch",
        CompileError::UnrollBoundExceeded { .. } => "unroll_bound_exceeded",
        CompileError::AllocationInfeasible { .. } => "allocation_infeasible",
        CompileError::PostprocessError(_) => "postprocess_error",
        CompileError::MalformedRequest(_) => "malformed_request",
        CompileError::Cancelled => "cancelled",
        CompileError::Timeout => "timeout",
    };
    WireError {
        kind: kind.to_string(),
        node,
        message: e.to_string(),
    }
}

/// Walk `graph` (post S0/S2) collecting every leaf node that still needs a
/// snippet fetched from `SnippetSource`, recursing into `if`/`else` branches.
/// `Repeat` never survives `expand`, so it is not matched here.
fn collect_missing(graph: &Graph, out: &mut Vec<(NodeId, NodeDescriptor)>) {
    for node in &graph.nodes {
        match &node.kind {
            NodeKind::Passthrough => {}
            NodeKind::IfThenElse(p) => {
                collect_missing(&p.then_branch, out);
                collect_missing(&p.else_branch, out);
            }
            _ => {
                if node.snippet.is_none() {
                    out.push((
                        node.id.clone(),
                        NodeDescriptor::new(&node.id.0, &node.kind, &node.inputs, &node.outputs),
                    ));
                }
            }
        }
    }
}

fn find_incoming_edge<'g>(graph: &'g Graph, node: &NodeId, port: u32) -> Option<&'g Edge> {
    graph
        .edges
        .iter()
        .find(|e| &e.dst.0 == node && e.dst.1.as_usize() == port as usize)
}

fn empty_prepared(id: &NodeId) -> PreparedNode {
    PreparedNode {
        node_id: id.clone(),
        program: Program { statements: Vec::new() },
        inputs: Vec::new(),
        outputs: Vec::new(),
        reusable: Vec::new(),
        diagnostics: Vec::new(),
    }
}

fn decl_size(size: &Option<Expr>) -> u32 {
    match size {
        Some(Expr::Int(n)) => *n as u32,
        _ => 1,
    }
}

fn compile_graph_level(
    ctx: &mut Ctx<'_>,
    scheduled: &ScheduledGraph,
    mutex_ctx: Option<&MutexTag>,
) -> Result<Vec<MergeUnit>, CompileError> {
    let mut units = Vec::with_capacity(scheduled.order.len());
    for node_id in &scheduled.order {
        let node = scheduled
            .node(node_id)
            .expect("schedule order only ever contains nodes from its own graph");
        match &node.kind {
            NodeKind::Passthrough if ctx.preseeded_nodes.contains(node_id) => {
                ctx.prepared.insert(node_id.clone(), empty_prepared(node_id));
                units.push(MergeUnit::Leaf(node_id.clone()));
            }
            NodeKind::Passthrough => {
                compile_passthrough(ctx, scheduled, node)?;
                units.push(MergeUnit::Leaf(node_id.clone()));
            }
            NodeKind::IfThenElse(payload) => {
                let unit = compile_if_then_else(ctx, scheduled, node, payload)?;
                units.push(unit);
            }
            _ => {
                compile_leaf(ctx, scheduled, node, mutex_ctx)?;
                units.push(MergeUnit::Leaf(node_id.clone()));
            }
        }
    }
    Ok(units)
}

fn compile_passthrough(ctx: &mut Ctx<'_>, scheduled: &ScheduledGraph, node: &Node) -> Result<(), CompileError> {
    let rank = ctx.new_rank();
    for (j, port_ty) in node.inputs.iter().enumerate() {
        if !port_ty.is_quantum() {
            continue;
        }
        let edge = find_incoming_edge(&scheduled.graph, &node.id, j as u32).ok_or_else(|| {
            CompileError::MalformedRequest(format!("passthrough {}: missing incoming edge for port {j}", node.id))
        })?;
        let handles = ctx
            .output_handles
            .get(&(edge.src.0.clone(), edge.src.1 .0))
            .cloned()
            .ok_or_else(|| {
                CompileError::MalformedRequest(format!(
                    "passthrough {}: upstream node {} port {} produced no resolved handles",
                    node.id, edge.src.0, edge.src.1 .0
                ))
            })?;
        ctx.mark_use(&handles, rank);
        ctx.output_handles.insert((node.id.clone(), j as u32), handles);
    }
    ctx.prepared.insert(node.id.clone(), empty_prepared(&node.id));
    Ok(())
}

fn build_edge_info(ctx: &Ctx<'_>, scheduled: &ScheduledGraph, node: &Node) -> Vec<InputEdgeInfo> {
    node.inputs
        .iter()
        .enumerate()
        .map(|(port, port_ty)| {
            let declared = port_ty.size().unwrap_or(1);
            let size = find_incoming_edge(&scheduled.graph, &node.id, port as u32)
                .and_then(|e| ctx.output_handles.get(&(e.src.0.clone(), e.src.1 .0)))
                .map(|h| h.len() as u32)
                .unwrap_or(declared);
            InputEdgeInfo { size, exact: false }
        })
        .collect()
}

fn compile_leaf(
    ctx: &mut Ctx<'_>,
    scheduled: &ScheduledGraph,
    node: &Node,
    mutex_ctx: Option<&MutexTag>,
) -> Result<(), CompileError> {
    let rank = ctx.new_rank();
    let snippet = node
        .snippet
        .clone()
        .or_else(|| ctx.resolved_snippets.get(&node.id).cloned())
        .ok_or_else(|| CompileError::MissingSnippet(node.id.clone()))?;

    let edge_info = build_edge_info(ctx, scheduled, node);
    let prepared = prepare::prepare_node(&node.id, &snippet, &edge_info)?;

    let input_names: HashSet<&str> = prepared.inputs.iter().map(|b| b.declared_name.as_str()).collect();
    let mut local_scope: LocalScope = HashMap::new();

    for b in &prepared.inputs {
        let edge = find_incoming_edge(&scheduled.graph, &node.id, b.port).ok_or_else(|| {
            CompileError::MalformedRequest(format!("node {}: no incoming edge for input port {}", node.id, b.port))
        })?;
        let base = ctx
            .output_handles
            .get(&(edge.src.0.clone(), edge.src.1 .0))
            .cloned()
            .ok_or_else(|| {
                CompileError::MalformedRequest(format!(
                    "node {}: upstream node {} port {} produced no resolved handles",
                    node.id, edge.src.0, edge.src.1 .0
                ))
            })?;
        ctx.mark_use(&base, rank);

        let handles = if b.widen {
            let extra_n = b.declared_size.saturating_sub(b.edge_size);
            let extra = ctx.fresh_handles(extra_n, &node.id, rank, mutex_ctx.cloned());
            let mut all = base;
            all.extend(extra);
            all
        } else {
            base
        };

        local_scope.insert(b.declared_name.clone(), handles.clone());
        ctx.scopes.insert((node.id.clone(), b.declared_name.clone()), handles);
    }

    for stmt in &prepared.program.statements {
        if let Statement::QubitDecl { name, size, .. } = stmt {
            if input_names.contains(name.as_str()) {
                continue;
            }
            let n = decl_size(size);
            let handles = ctx.fresh_handles(n, &node.id, rank, mutex_ctx.cloned());
            local_scope.insert(name.clone(), handles.clone());
            ctx.scopes.insert((node.id.clone(), name.clone()), handles);
        }
    }

    for ob in &prepared.outputs {
        let handles = resolve_qubit_expr(&ob.expr, &local_scope).map_err(|e| {
            CompileError::MalformedRequest(format!(
                "node {}: output {} expression {:?} failed to resolve: {e:?}",
                node.id, ob.port, ob.expr
            ))
        })?;
        ctx.mark_use(&handles, rank);
        for h in &handles {
            ctx.infinite.insert(*h);
        }
        ctx.output_handles.insert((node.id.clone(), ob.port), handles);
    }

    for rb in &prepared.reusable {
        let handles = resolve_qubit_expr(&rb.expr, &local_scope).map_err(|e| {
            CompileError::MalformedRequest(format!(
                "node {}: reusable alias {} failed to resolve: {e:?}",
                node.id, rb.alias_name
            ))
        })?;
        ctx.mark_use(&handles, rank);
        for h in &handles {
            ctx.reusable_ranks.insert(*h, rank);
        }
    }

    ctx.diagnostics.extend(prepared.diagnostics.clone());
    ctx.prepared.insert(node.id.clone(), prepared);
    Ok(())
}

/// Resolve the classical identifier an `if`/`else` node's condition source
/// exposes — the node/port naming a boolean-valued expression, usually a `bit`
/// produced by a preceding measurement. The annotation grammar only covers
/// qubit ports, so this falls back to positional matching against the source
/// node's own classical declarations (see DESIGN.md).
fn classical_output_ident(prepared: &PreparedNode, port: u32) -> Option<String> {
    prepared
        .program
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::ClassicalDecl { name, .. } => Some(name.clone()),
            _ => None,
        })
        .nth(port as usize)
}

fn compile_branch(
    ctx: &mut Ctx<'_>,
    scheduled: &ScheduledGraph,
    if_node: &Node,
    payload: &IfElsePayload,
    is_then: bool,
) -> Result<Vec<MergeUnit>, CompileError> {
    let branch_template = if is_then { &payload.then_branch } else { &payload.else_branch };
    let mut branch_graph = (**branch_template).clone();
    let branch_label = if is_then { "then" } else { "else" };

    for b in &payload.shared_inputs {
        let target = if is_then { &b.then_target } else { &b.else_target };
        let outer_edge = find_incoming_edge(&scheduled.graph, &if_node.id, b.outer_input.0).ok_or_else(|| {
            CompileError::MalformedRequest(format!(
                "if {}: shared input {} has no incoming edge",
                if_node.id, b.outer_input.0
            ))
        })?;
        let handles = ctx
            .output_handles
            .get(&(outer_edge.src.0.clone(), outer_edge.src.1 .0))
            .cloned();

        let synthetic_id = NodeId(ctx.idgen.next_id(&format!("{}_{branch_label}_shared", if_node.id)));
        let port_type = if_node
            .inputs
            .get(b.outer_input.as_usize())
            .copied()
            .unwrap_or(PortType::Qubit(1));

        branch_graph.nodes.push(Node {
            id: synthetic_id.clone(),
            kind: NodeKind::Passthrough,
            inputs: Vec::new(),
            outputs: vec![port_type],
            snippet: None,
        });
        branch_graph.edges.push(Edge {
            src: (synthetic_id.clone(), PortIndex(0)),
            dst: target.clone(),
        });

        if let Some(h) = handles {
            ctx.output_handles.insert((synthetic_id.clone(), 0), h);
        }
        ctx.preseeded_nodes.insert(synthetic_id);
    }

    let branch_scheduled = graph::ingest(branch_graph)?;
    let mutex = MutexTag {
        if_node: if_node.id.clone(),
        branch: if is_then { Branch::Then } else { Branch::Else },
    };
    compile_graph_level(ctx, &branch_scheduled, Some(&mutex))
}

fn compile_if_then_else(
    ctx: &mut Ctx<'_>,
    scheduled: &ScheduledGraph,
    node: &Node,
    payload: &IfElsePayload,
) -> Result<MergeUnit, CompileError> {
    let if_id = node.id.clone();

    let cond_edge = find_incoming_edge(&scheduled.graph, &if_id, payload.condition_input.0).ok_or_else(|| {
        CompileError::MalformedRequest(format!("if {if_id}: condition input has no incoming edge"))
    })?;
    let cond_prepared = ctx.prepared.get(&cond_edge.src.0).ok_or_else(|| {
        CompileError::MalformedRequest(format!(
            "if {if_id}: condition source {} was not compiled before this node",
            cond_edge.src.0
        ))
    })?;
    let cond_name = classical_output_ident(cond_prepared, cond_edge.src.1 .0).ok_or_else(|| {
        CompileError::MalformedRequest(format!(
            "if {if_id}: condition source {} exposes no classical declaration for port {}",
            cond_edge.src.0, cond_edge.src.1 .0
        ))
    })?;
    let condition = Expr::Ident(cond_name);

    let then_units = compile_branch(ctx, scheduled, node, payload, true)?;
    let else_units = compile_branch(ctx, scheduled, node, payload, false)?;

    for ob in &payload.outputs {
        let then_handles = ctx
            .output_handles
            .get(&(ob.then_source.0.clone(), ob.then_source.1 .0))
            .cloned()
            .ok_or_else(|| {
                CompileError::MalformedRequest(format!(
                    "if {if_id}: then-branch output source {} port {} was never resolved",
                    ob.then_source.0, ob.then_source.1 .0
                ))
            })?;
        let else_handles = ctx
            .output_handles
            .get(&(ob.else_source.0.clone(), ob.else_source.1 .0))
            .cloned()
            .ok_or_else(|| {
                CompileError::MalformedRequest(format!(
                    "if {if_id}: else-branch output source {} port {} was never resolved",
                    ob.else_source.0, ob.else_source.1 .0
                ))
            })?;

        let n = then_handles.len().min(else_handles.len());
        for i in 0..n {
            // Only the then/else pair need to land on the same slot as each
            // other — the tag is opaque, not a slot index the allocator must
            // honor literally (see `Interval::equal_group`).
            let group = ctx.next_equal_group;
            ctx.next_equal_group += 1;
            ctx.equal_group_of.insert(then_handles[i], group);
            ctx.equal_group_of.insert(else_handles[i], group);
        }
        ctx.output_handles.insert((if_id.clone(), ob.outer_output.0), then_handles);
    }

    ctx.prepared.insert(if_id.clone(), empty_prepared(&if_id));

    Ok(MergeUnit::If {
        node_id: if_id,
        condition,
        then_units,
        else_units,
    })
}

fn assemble(
    units: &[MergeUnit],
    ctx: &Ctx<'_>,
    scopes: &QubitScopes,
    alloc: &Allocation,
) -> Result<Vec<Statement>, CompileError> {
    let mut out = Vec::new();
    for unit in units {
        match unit {
            MergeUnit::Leaf(id) => {
                let prepared = ctx
                    .prepared
                    .get(id)
                    .expect("every merge unit was populated by compile_graph_level");
                out.push(Statement::BlockComment(format!("Start node {id}")));
                out.extend(merge::merge_node_body(prepared, scopes, alloc)?);
                out.push(Statement::BlockComment(format!("End node {id}")));
            }
            MergeUnit::If {
                node_id,
                condition,
                then_units,
                else_units,
            } => {
                out.push(Statement::BlockComment(format!("Start node {node_id}")));
                let then_body = assemble(then_units, ctx, scopes, alloc)?;
                let else_body = assemble(else_units, ctx, scopes, alloc)?;
                out.push(merge::merge_if_else(condition.clone(), then_body, else_body));
                out.push(Statement::BlockComment(format!("End node {node_id}")));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Graph, Node, NodeId, NodeKind, PortIndex, PortType};
    use crate::source::NoopSource;
    use crate::wire::{CompileOptions, CompileRequest, Metadata, WireEdge, WireIfOutput, WireNode, WirePortType, WireSubgraph};
    use async_trait::async_trait;

    fn build_request() -> CompileRequest {
        use crate::wire::{WireEdge, WireNode, WirePortType};

        let qubit_node = WireNode {
            id: "qsrc".into(),
            kind: "qubit".into(),
            inputs: vec![],
            outputs: vec![WirePortType::Qubit { size: 1 }],
            implementation: Some("@leqo.input 0\nqubit[1] q;\n@leqo.output 0\nlet out = q;\n".into()),
            gate: None,
            parameter: None,
            value: None,
            size: None,
            iterations: None,
            block: None,
            then_block: None,
            else_block: None,
            loop_carried: vec![],
            passthrough: vec![],
            condition_input: None,
            shared_inputs: vec![],
            if_outputs: vec![],
        };

        let gate_node = WireNode {
            id: "h1".into(),
            kind: "gate".into(),
            inputs: vec![WirePortType::Qubit { size: 1 }],
            outputs: vec![WirePortType::Qubit { size: 1 }],
            implementation: Some(
                "@leqo.input 0\nqubit[1] q;\nh q;\n@leqo.output 0\nlet out = q;\n".into(),
            ),
            gate: Some("h".into()),
            parameter: None,
            value: None,
            size: None,
            iterations: None,
            block: None,
            then_block: None,
            else_block: None,
            loop_carried: vec![],
            passthrough: vec![],
            condition_input: None,
            shared_inputs: vec![],
            if_outputs: vec![],
        };

        CompileRequest {
            metadata: Metadata::default(),
            nodes: vec![qubit_node, gate_node],
            edges: vec![WireEdge {
                source: ("qsrc".into(), 0),
                target: ("h1".into(), 0),
            }],
            options: CompileOptions { optimize: true },
        }
    }

    #[tokio::test]
    async fn compiles_a_two_node_chain() {
        let service = CompileService::new(NoopSource, 1024, true);
        let token = CancellationToken::new();
        let response = service.compile(&build_request(), &token).await;
        assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
        let program = response.program.unwrap();
        assert!(program.contains("OPENQASM 3.1"));
        assert!(program.contains("h "));
    }

    #[tokio::test]
    async fn reports_missing_snippet_as_wire_error() {
        struct AlwaysEmpty;
        #[async_trait]
        impl SnippetSource for AlwaysEmpty {
            async fn lookup(&self, _descriptor: &NodeDescriptor) -> Option<String> {
                None
            }
        }

        let mut req = build_request();
        req.nodes[0].implementation = None;

        let service = CompileService::new(AlwaysEmpty, 1024, true);
        let token = CancellationToken::new();
        let response = service.compile(&req, &token).await;
        assert!(response.program.is_none());
        assert_eq!(response.error.unwrap().kind, "missing_snippet");
    }

    #[tokio::test]
    async fn cancellation_before_start_short_circuits() {
        let service = CompileService::new(NoopSource, 1024, true);
        let token = CancellationToken::new();
        token.cancel();
        let response = service.compile(&build_request(), &token).await;
        assert_eq!(response.error.unwrap().kind, "cancelled");
    }

    fn bare_node(id: &str, kind: &str, inputs: Vec<WirePortType>, outputs: Vec<WirePortType>, implementation: Option<String>) -> WireNode {
        WireNode {
            id: id.into(),
            kind: kind.into(),
            inputs,
            outputs,
            implementation,
            gate: None,
            parameter: None,
            value: None,
            size: None,
            iterations: None,
            block: None,
            then_block: None,
            else_block: None,
            loop_carried: vec![],
            passthrough: vec![],
            condition_input: None,
            shared_inputs: vec![],
            if_outputs: vec![],
        }
    }

    /// An earlier output-bound qubit occupies a slot forever (it has no
    /// further consumer), followed by an `if`/`else` node whose branch
    /// outputs only need to land on the *same* slot as each other. This
    /// must compile without `allocation_infeasible` even though the shared
    /// slot a naive scheme would force (slot 0) is already permanently held.
    #[tokio::test]
    async fn compiles_if_else_whose_branch_outputs_share_a_slot() {
        let qsrc = bare_node(
            "qsrc",
            "qubit",
            vec![],
            vec![WirePortType::Qubit { size: 1 }],
            Some("qubit[1] q;\n@leqo.output 0\nlet out = q;\n".into()),
        );
        let meas = bare_node(
            "meas",
            "measurement",
            vec![WirePortType::Qubit { size: 1 }],
            vec![WirePortType::Bit { size: 1 }],
            Some("@leqo.input 0\nqubit[1] q;\nbit c;\nmeasure q -> c;\n".into()),
        );
        let tq = bare_node(
            "tq",
            "qubit",
            vec![],
            vec![WirePortType::Qubit { size: 1 }],
            Some("qubit[1] q;\nx q;\n@leqo.output 0\nlet out = q;\n".into()),
        );
        let eq = bare_node(
            "eq",
            "qubit",
            vec![],
            vec![WirePortType::Qubit { size: 1 }],
            Some("qubit[1] q;\nz q;\n@leqo.output 0\nlet out = q;\n".into()),
        );

        let mut ifn = bare_node("ifn", "if-then-else", vec![WirePortType::Bit { size: 1 }], vec![WirePortType::Qubit { size: 1 }], None);
        ifn.condition_input = Some(0);
        ifn.then_block = Some(Box::new(WireSubgraph {
            nodes: vec![tq],
            edges: vec![],
        }));
        ifn.else_block = Some(Box::new(WireSubgraph {
            nodes: vec![eq],
            edges: vec![],
        }));
        ifn.if_outputs = vec![WireIfOutput {
            outer_output: 0,
            then_source: ("tq".into(), 0),
            else_source: ("eq".into(), 0),
        }];

        let req = CompileRequest {
            metadata: Metadata::default(),
            nodes: vec![qsrc, meas, ifn],
            edges: vec![
                WireEdge {
                    source: ("qsrc".into(), 0),
                    target: ("meas".into(), 0),
                },
                WireEdge {
                    source: ("meas".into(), 0),
                    target: ("ifn".into(), 0),
                },
            ],
            options: CompileOptions { optimize: true },
        };

        let service = CompileService::new(NoopSource, 1024, true);
        let token = CancellationToken::new();
        let response = service.compile(&req, &token).await;
        assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
        let program = response.program.unwrap();
        assert!(program.contains("if ("));
        assert!(program.contains("/* Start node ifn */"));
    }

    struct SlowSource;
    #[async_trait]
    impl SnippetSource for SlowSource {
        async fn lookup(&self, _descriptor: &NodeDescriptor) -> Option<String> {
            time::sleep(Duration::from_millis(200)).await;
            Some("@leqo.input 0\nqubit[1] q;\nh q;\n@leqo.output 0\nlet out = q;\n".into())
        }
    }

    #[tokio::test]
    async fn a_configured_timeout_shorter_than_the_snippet_lookup_surfaces_as_timeout() {
        let mut req = build_request();
        req.nodes[0].implementation = None;

        let service = CompileService::new(SlowSource, 1024, true).with_timeout(Duration::from_millis(10));
        let token = CancellationToken::new();
        let response = service.compile(&req, &token).await;
        assert!(response.program.is_none());
        assert_eq!(response.error.unwrap().kind, "timeout");
    }

    #[test]
    fn collects_missing_snippets_recursing_into_if_branches() {
        let then_branch = Graph {
            nodes: vec![Node {
                id: NodeId("t1".into()),
                kind: NodeKind::Gate,
                inputs: vec![PortType::Qubit(1)],
                outputs: vec![PortType::Qubit(1)],
                snippet: None,
            }],
            edges: vec![],
        };
        let else_branch = Graph {
            nodes: vec![],
            edges: vec![],
        };
        let if_node = Node {
            id: NodeId("branch".into()),
            kind: NodeKind::IfThenElse(IfElsePayload {
                condition_input: PortIndex(0),
                shared_inputs: vec![],
                outputs: vec![],
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            }),
            inputs: vec![PortType::Bit(1)],
            outputs: vec![],
            snippet: None,
        };
        let graph = Graph {
            nodes: vec![if_node],
            edges: vec![],
        };
        let mut missing = Vec::new();
        collect_missing(&graph, &mut missing);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, NodeId("t1".into()));
    }
}
