//! Causality graph over one session's writes and reconcile spans.
//!
//! The builder joins write operations to the reconciles they triggered
//! (matching `(uid, resource_version)` exactly, with an integer-ordered
//! fallback) and attributes writes back to the span they were issued from
//! (same actor, timestamp inside the span). Chains through the resulting
//! graph read as:
//!
//! ```text
//! actor A writes R@rv1 -> actor B reconciles R@rv1 -> actor B writes R'@rv2
//! ```
//!
//! Everything is bounded: node and edge counts saturate silently, chain
//! enumeration is an explicit-stack DFS with a depth cap.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::assert::ensure_in_range;
use crate::error::Result;
use crate::model::{Operation, ReconcileSpan};

/// Cap on materialized graph nodes. Further nodes are dropped silently.
pub const MAX_CAUSALITY_NODES: usize = 20_000;

/// Cap on materialized graph edges. Further edges are dropped silently.
pub const MAX_CAUSALITY_EDGES: usize = 50_000;

/// Depth used when the caller passes 0.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 6;

/// Hard cap on chain depth.
pub const MAX_CHAIN_DEPTH: usize = 50;

/// Chain count used when the caller passes 0.
pub const DEFAULT_MAX_CHAINS: usize = 10;

/// Hard cap on enumerated chains.
pub const MAX_CHAINS: usize = 100;

/// Largest input slice accepted by the builder.
const MAX_INPUT_LEN: usize = 100_000;

// =============================================================================
// Graph types
// =============================================================================

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A recorded write operation.
    Op,
    /// A reconcile span.
    Span,
}

/// Edge kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// The write explains the span's trigger.
    OpToSpan,
    /// The span emitted the write.
    SpanToOp,
}

impl EdgeType {
    #[must_use]
    const fn as_str(self) -> &'static str {
        match self {
            Self::OpToSpan => "op_to_span",
            Self::SpanToOp => "span_to_op",
        }
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Projection of an operation or span into the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalityNode {
    /// `op:{seq}` or `span:{id}`.
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Actor that performed the call or reconcile.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub actor_id: String,
    /// Resource kind.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Resource namespace.
    #[serde(rename = "ns", skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Resource name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Operation timestamp or span start, epoch seconds.
    #[serde(rename = "ts", skip_serializing_if = "is_zero")]
    pub timestamp: i64,
    /// resourceVersion of the write, or the span's trigger rv.
    #[serde(rename = "rv", skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// UID of the written object, or the span's trigger uid.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Call or reconcile duration in milliseconds.
    #[serde(skip_serializing_if = "is_zero")]
    pub duration_ms: i64,
    /// Recorded error, if any.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Payload text; only populated when the caller asked for payloads.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_data: String,
}

/// Directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CausalityEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Edge kind.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
}

/// The assembled graph. Nodes are sorted by id for deterministic output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CausalityGraph {
    /// Materialized nodes (only those referenced by an edge).
    pub nodes: Vec<CausalityNode>,
    /// De-duplicated edges.
    pub edges: Vec<CausalityEdge>,
}

/// Graph construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CausalityOptions {
    /// Copy payload text into operation nodes. Off by default; payloads can
    /// be large and the graph is usually emitted to external consumers.
    pub include_payloads: bool,
}

/// External report wrapper: graph plus builder warnings.
#[derive(Debug, Clone, Serialize)]
pub struct CausalityReport {
    /// Graph nodes.
    pub nodes: Vec<CausalityNode>,
    /// Graph edges.
    pub edges: Vec<CausalityEdge>,
    /// Non-fatal observations from the builder.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CausalityReport {
    /// Wrap a built graph and its warnings.
    #[must_use]
    pub fn new(graph: CausalityGraph, warnings: Vec<String>) -> Self {
        Self {
            nodes: graph.nodes,
            edges: graph.edges,
            warnings,
        }
    }
}

// =============================================================================
// Write indexing
// =============================================================================

#[derive(Clone, Copy)]
struct WriteRef<'a> {
    op: &'a Operation,
    index: usize,
}

#[derive(Clone, Copy)]
struct RvRef<'a> {
    op: &'a Operation,
    index: usize,
    rv: i64,
}

struct WriteIndexes<'a> {
    /// All writes, recording order.
    writes: Vec<WriteRef<'a>>,
    /// Writes per actor, recording order.
    by_actor: HashMap<&'a str, Vec<WriteRef<'a>>>,
    /// Writes keyed by `{uid}|{rv}`; populated only for enriched records.
    exact_by_key: HashMap<String, Vec<WriteRef<'a>>>,
    /// Writes per uid with integer-parsed rv, sorted by `(rv, timestamp)`.
    rv_by_uid: HashMap<&'a str, Vec<RvRef<'a>>>,
}

fn collect_write_indexes(ops: &[Operation]) -> WriteIndexes<'_> {
    let mut indexes = WriteIndexes {
        writes: Vec::new(),
        by_actor: HashMap::new(),
        exact_by_key: HashMap::new(),
        rv_by_uid: HashMap::new(),
    };

    for (index, op) in ops.iter().enumerate() {
        if !op.op_type.is_write() {
            continue;
        }
        let entry = WriteRef { op, index };
        indexes.writes.push(entry);

        if !op.actor_id.is_empty() {
            indexes.by_actor.entry(&op.actor_id).or_default().push(entry);
        }

        if !op.uid.is_empty() && !op.resource_version.is_empty() {
            let key = format!("{}|{}", op.uid, op.resource_version);
            indexes.exact_by_key.entry(key).or_default().push(entry);

            if let Ok(rv) = op.resource_version.parse::<i64>() {
                indexes
                    .rv_by_uid
                    .entry(&op.uid)
                    .or_default()
                    .push(RvRef { op, index, rv });
            }
        }
    }

    for refs in indexes.rv_by_uid.values_mut() {
        refs.sort_by(|a, b| a.rv.cmp(&b.rv).then(a.op.timestamp.cmp(&b.op.timestamp)));
    }

    indexes
}

fn index_warnings(indexes: &WriteIndexes<'_>) -> Vec<String> {
    let mut warnings = Vec::new();
    if indexes.writes.is_empty() {
        warnings.push("No write operations found; causality links require writes.".to_string());
    }
    if indexes.exact_by_key.is_empty() {
        warnings.push(
            "Operations missing uid/resource_version; write-to-reconcile linking limited."
                .to_string(),
        );
    }
    warnings
}

// =============================================================================
// Trigger matching
// =============================================================================

/// Latest exact `{uid}|{rv}` write not later than the span start.
fn find_exact_match<'a>(
    exact_by_key: &HashMap<String, Vec<WriteRef<'a>>>,
    span: &ReconcileSpan,
) -> Option<WriteRef<'a>> {
    let key = format!("{}|{}", span.trigger_uid, span.trigger_resource_version);
    let candidates = exact_by_key.get(&key)?;

    let mut best: Option<WriteRef<'a>> = None;
    for candidate in candidates {
        if candidate.op.timestamp > span.start_ts {
            continue;
        }
        match best {
            Some(current) if candidate.op.timestamp <= current.op.timestamp => {}
            _ => best = Some(*candidate),
        }
    }
    best
}

/// Highest integer rv not exceeding the trigger's, no later than the span
/// start; ties broken by latest timestamp.
fn find_fallback_match<'a>(
    rv_by_uid: &HashMap<&str, Vec<RvRef<'a>>>,
    span: &ReconcileSpan,
) -> Option<WriteRef<'a>> {
    let target_rv: i64 = span.trigger_resource_version.parse().ok()?;
    let candidates = rv_by_uid.get(span.trigger_uid.as_str())?;

    let mut best: Option<RvRef<'a>> = None;
    for candidate in candidates {
        if candidate.rv > target_rv || candidate.op.timestamp > span.start_ts {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => {
                candidate.rv > current.rv
                    || (candidate.rv == current.rv && candidate.op.timestamp > current.op.timestamp)
            }
        };
        if better {
            best = Some(*candidate);
        }
    }
    best.map(|r| WriteRef {
        op: r.op,
        index: r.index,
    })
}

// =============================================================================
// Graph building
// =============================================================================

struct GraphBuilder {
    options: CausalityOptions,
    nodes: HashMap<String, CausalityNode>,
    edges: Vec<CausalityEdge>,
    edge_keys: HashSet<String>,
}

impl GraphBuilder {
    fn new(options: CausalityOptions) -> Self {
        Self {
            options,
            nodes: HashMap::new(),
            edges: Vec::new(),
            edge_keys: HashSet::new(),
        }
    }

    fn add_edge(&mut self, from: String, to: String, edge_type: EdgeType) {
        let key = format!("{from}|{to}|{}", edge_type.as_str());
        if self.edge_keys.contains(&key) || self.edges.len() >= MAX_CAUSALITY_EDGES {
            return;
        }
        self.edges.push(CausalityEdge {
            from,
            to,
            edge_type,
        });
        self.edge_keys.insert(key);
    }

    fn ensure_op_node(&mut self, op: &Operation, index: usize) -> String {
        let id = op_node_id(op, index);
        if self.nodes.contains_key(&id) || self.nodes.len() >= MAX_CAUSALITY_NODES {
            return id;
        }
        let node = CausalityNode {
            id: id.clone(),
            node_type: NodeType::Op,
            actor_id: op.actor_id.clone(),
            kind: op.resource_kind.clone(),
            namespace: op.namespace.clone(),
            name: op.name.clone(),
            timestamp: op.timestamp,
            resource_version: op.resource_version.clone(),
            uid: op.uid.clone(),
            duration_ms: op.duration_ms,
            error: op.error.clone(),
            resource_data: if self.options.include_payloads {
                op.resource_data.clone()
            } else {
                String::new()
            },
        };
        self.nodes.insert(id.clone(), node);
        id
    }

    fn ensure_span_node(&mut self, span: &ReconcileSpan) -> String {
        let id = span_node_id(span);
        if self.nodes.contains_key(&id) || self.nodes.len() >= MAX_CAUSALITY_NODES {
            return id;
        }
        let node = CausalityNode {
            id: id.clone(),
            node_type: NodeType::Span,
            actor_id: span.actor_id.clone(),
            kind: span.kind.clone(),
            namespace: span.namespace.clone(),
            name: span.name.clone(),
            timestamp: span.start_ts,
            resource_version: span.trigger_resource_version.clone(),
            uid: span.trigger_uid.clone(),
            duration_ms: span.duration_ms.unwrap_or(0),
            error: span.error.clone(),
            resource_data: String::new(),
        };
        self.nodes.insert(id.clone(), node);
        id
    }

    fn finish(self) -> CausalityGraph {
        let mut nodes: Vec<CausalityNode> = self.nodes.into_values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        CausalityGraph {
            nodes,
            edges: self.edges,
        }
    }
}

fn op_node_id(op: &Operation, index: usize) -> String {
    if op.sequence_number > 0 {
        format!("op:{}", op.sequence_number)
    } else if op.id > 0 {
        format!("op:{}", op.id)
    } else {
        format!("op:{index}")
    }
}

fn span_node_id(span: &ReconcileSpan) -> String {
    if span.id.is_empty() {
        format!("span:{}", span.start_ts)
    } else {
        format!("span:{}", span.id)
    }
}

/// Build the causality graph for one session.
///
/// Returns the graph plus non-fatal warnings about why it may be sparse.
pub fn build_causality_graph(
    ops: &[Operation],
    spans: &[ReconcileSpan],
    options: CausalityOptions,
) -> Result<(CausalityGraph, Vec<String>)> {
    ensure_in_range(ops.len() as i64, 0, MAX_INPUT_LEN as i64, "operation count")?;
    ensure_in_range(spans.len() as i64, 0, MAX_INPUT_LEN as i64, "span count")?;

    let mut warnings = Vec::new();
    if spans.is_empty() {
        warnings.push("No reconcile spans found; causality requires spans.".to_string());
    }

    let indexes = collect_write_indexes(ops);
    warnings.extend(index_warnings(&indexes));

    let mut builder = GraphBuilder::new(options);
    for span in spans {
        // op -> span: which write explains this span's trigger?
        if !span.trigger_uid.is_empty() && !span.trigger_resource_version.is_empty() {
            let matched = find_exact_match(&indexes.exact_by_key, span)
                .or_else(|| find_fallback_match(&indexes.rv_by_uid, span));
            if let Some(write) = matched {
                let op_id = builder.ensure_op_node(write.op, write.index);
                let span_id = builder.ensure_span_node(span);
                builder.add_edge(op_id, span_id, EdgeType::OpToSpan);
            }
        }

        // span -> op: writes this actor issued while the span was running.
        let Some(end_ts) = span.end_ts else {
            continue;
        };
        if end_ts < span.start_ts {
            continue;
        }
        if let Some(actor_writes) = indexes.by_actor.get(span.actor_id.as_str()) {
            for write in actor_writes {
                if write.op.timestamp < span.start_ts || write.op.timestamp > end_ts {
                    continue;
                }
                let op_id = builder.ensure_op_node(write.op, write.index);
                let span_id = builder.ensure_span_node(span);
                builder.add_edge(span_id, op_id, EdgeType::SpanToOp);
            }
        }
    }

    let graph = builder.finish();
    if graph.edges.is_empty() {
        warnings.push("No causality edges found; data may be incomplete.".to_string());
    }

    tracing::debug!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        warnings = warnings.len(),
        "causality graph built"
    );
    Ok((graph, warnings))
}

// =============================================================================
// Chain enumeration
// =============================================================================

/// A simple path through the graph, rooted at a triggering write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CausalityChain {
    /// Node ids along the path, root first.
    pub node_ids: Vec<String>,
    /// Path length in nodes.
    pub length: usize,
    /// Number of op->span edges leaving the root.
    pub fan_out: usize,
}

/// Enumerate causal chains.
///
/// Roots are operation nodes with at least one outgoing op->span edge,
/// visited in lexicographic order. Traversal is an iterative DFS over an
/// explicit stack; the depth bound is an invariant of the stack contents,
/// and nodes already on a path are never revisited.
///
/// `max_depth` and `max_chains` fall back to their defaults when 0 and are
/// clamped to the hard caps.
pub fn build_causality_chains(
    graph: &CausalityGraph,
    max_depth: usize,
    max_chains: usize,
) -> Vec<CausalityChain> {
    let max_depth = normalize_limit(max_depth, DEFAULT_MAX_CHAIN_DEPTH, MAX_CHAIN_DEPTH);
    let max_chains = normalize_limit(max_chains, DEFAULT_MAX_CHAINS, MAX_CHAINS);

    let node_types: HashMap<&str, NodeType> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.node_type))
        .collect();

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut fan_out: HashMap<&str, usize> = HashMap::new();
    for edge in &graph.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        if edge.edge_type == EdgeType::OpToSpan {
            *fan_out.entry(edge.from.as_str()).or_insert(0) += 1;
        }
    }
    for targets in adjacency.values_mut() {
        targets.sort_unstable();
    }

    let mut roots: Vec<&str> = adjacency
        .keys()
        .copied()
        .filter(|id| fan_out.get(id).copied().unwrap_or(0) > 0)
        .filter(|id| node_types.get(id) == Some(&NodeType::Op))
        .collect();
    roots.sort_unstable();

    let mut chains: Vec<CausalityChain> = Vec::new();
    for root in roots {
        if chains.len() >= max_chains {
            break;
        }
        let mut stack: Vec<Vec<&str>> = vec![vec![root]];
        while let Some(path) = stack.pop() {
            if chains.len() >= max_chains {
                break;
            }
            let Some(&last) = path.last() else {
                continue;
            };
            let next_nodes = adjacency.get(last).map_or(&[] as &[&str], Vec::as_slice);

            if path.len() >= max_depth || next_nodes.is_empty() {
                chains.push(CausalityChain {
                    node_ids: path.iter().map(ToString::to_string).collect(),
                    length: path.len(),
                    fan_out: fan_out.get(root).copied().unwrap_or(0),
                });
                continue;
            }

            for &next in next_nodes {
                if path.contains(&next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(next);
                stack.push(extended);
            }
        }
    }

    chains.sort_by(|a, b| {
        b.length
            .cmp(&a.length)
            .then(b.fan_out.cmp(&a.fan_out))
            .then(a.node_ids.cmp(&b.node_ids))
    });
    chains
}

fn normalize_limit(value: usize, default: usize, cap: usize) -> usize {
    if value == 0 { default } else { value.min(cap) }
}

/// Render chains as one text line each, for terminal output.
pub fn render_chains(graph: &CausalityGraph, chains: &[CausalityChain]) -> Vec<String> {
    let by_id: HashMap<&str, &CausalityNode> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    chains
        .iter()
        .map(|chain| {
            chain
                .node_ids
                .iter()
                .map(|id| by_id.get(id.as_str()).map_or_else(|| id.clone(), describe_node))
                .collect::<Vec<String>>()
                .join(" -> ")
        })
        .collect()
}

fn describe_node(node: &&CausalityNode) -> String {
    let actor = if node.actor_id.is_empty() {
        "unknown"
    } else {
        &node.actor_id
    };
    let target = format!("{}/{}/{}", node.kind, node.namespace, node.name);
    match node.node_type {
        NodeType::Op if node.resource_version.is_empty() => {
            format!("{actor} writes {target}")
        }
        NodeType::Op => format!("{actor} writes {target}@rv{}", node.resource_version),
        NodeType::Span => format!("{actor} reconciles {target}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpType;

    fn write_op(seq: i64, actor: &str, kind: &str, name: &str, uid: &str, rv: &str, ts: i64) -> Operation {
        Operation {
            id: seq,
            session_id: "causality-test".to_string(),
            sequence_number: seq,
            timestamp: ts,
            op_type: OpType::Update,
            resource_kind: kind.to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            resource_data: "{\"spec\":{}}".to_string(),
            error: String::new(),
            duration_ms: 5,
            actor_id: actor.to_string(),
            uid: uid.to_string(),
            resource_version: rv.to_string(),
            generation: 1,
            verb: "update".to_string(),
        }
    }

    fn span_for(
        id: &str,
        actor: &str,
        kind: &str,
        name: &str,
        start: i64,
        end: Option<i64>,
        trigger_uid: &str,
        trigger_rv: &str,
    ) -> ReconcileSpan {
        ReconcileSpan {
            id: id.to_string(),
            session_id: "causality-test".to_string(),
            actor_id: actor.to_string(),
            start_ts: start,
            end_ts: end,
            duration_ms: end.map(|e| (e - start) * 1000),
            kind: kind.to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            trigger_uid: trigger_uid.to_string(),
            trigger_resource_version: trigger_rv.to_string(),
            trigger_reason: String::new(),
            error: String::new(),
        }
    }

    const T0: i64 = 1_700_000_000;

    #[test]
    fn exact_trigger_match_links_write_to_span() {
        let ops = vec![write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0)];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 2,
            Some(T0 + 4),
            "u1", "5",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, "op:1");
        assert_eq!(graph.edges[0].to, "span:s1");
        assert_eq!(graph.edges[0].edge_type, EdgeType::OpToSpan);
    }

    #[test]
    fn span_writes_are_attributed_to_the_span() {
        let ops = vec![write_op(2, "actor-b", "Secret", "secret", "", "", T0 + 3)];
        let spans = vec![span_for(
            "s2", "actor-b", "Secret", "secret",
            T0 + 2,
            Some(T0 + 6),
            "", "",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].from, "span:s2");
        assert_eq!(graph.edges[0].to, "op:2");
        assert_eq!(graph.edges[0].edge_type, EdgeType::SpanToOp);
    }

    #[test]
    fn missing_trigger_produces_no_op_to_span_edge() {
        let ops = vec![write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0)];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 2,
            Some(T0 + 4),
            "", "5",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn writes_after_span_start_are_not_triggers() {
        let ops = vec![write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0 + 10)];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 2,
            Some(T0 + 4),
            "u1", "5",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert!(
            graph
                .edges
                .iter()
                .all(|e| e.edge_type != EdgeType::OpToSpan)
        );
    }

    #[test]
    fn fallback_picks_highest_rv_not_exceeding_trigger() {
        let ops = vec![
            write_op(1, "actor-a", "ConfigMap", "cm", "u1", "3", T0),
            write_op(2, "actor-a", "ConfigMap", "cm", "u1", "6", T0 + 1),
            write_op(3, "actor-a", "ConfigMap", "cm", "u1", "9", T0 + 2),
        ];
        // Trigger rv 7 has no exact write; rv 6 is the best fallback.
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 5,
            Some(T0 + 6),
            "u1", "7",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        let trigger = graph
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::OpToSpan)
            .unwrap();
        assert_eq!(trigger.from, "op:2");
    }

    #[test]
    fn fallback_ignores_non_integer_rv_entries() {
        let ops = vec![
            write_op(1, "actor-a", "ConfigMap", "cm", "u1", "abc", T0),
            write_op(2, "actor-a", "ConfigMap", "cm", "u1", "4", T0 + 1),
        ];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 5,
            Some(T0 + 6),
            "u1", "7",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        let trigger = graph
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::OpToSpan)
            .unwrap();
        assert_eq!(trigger.from, "op:2");
    }

    #[test]
    fn exact_match_beats_fallback() {
        let ops = vec![
            write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0),
            write_op(2, "actor-a", "ConfigMap", "cm", "u1", "4", T0 + 1),
        ];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 5,
            Some(T0 + 6),
            "u1", "5",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        let trigger = graph
            .edges
            .iter()
            .find(|e| e.edge_type == EdgeType::OpToSpan)
            .unwrap();
        assert_eq!(trigger.from, "op:1");
    }

    #[test]
    fn open_spans_get_no_write_attribution() {
        let ops = vec![write_op(2, "actor-b", "Secret", "secret", "", "", T0 + 3)];
        let spans = vec![span_for(
            "s2", "actor-b", "Secret", "secret",
            T0 + 2,
            None,
            "", "",
        )];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn edges_are_deduplicated() {
        let ops = vec![write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0)];
        let spans = vec![
            span_for("s1", "actor-b", "ConfigMap", "cm", T0 + 2, Some(T0 + 4), "u1", "5"),
            span_for("s1", "actor-b", "ConfigMap", "cm", T0 + 2, Some(T0 + 4), "u1", "5"),
        ];

        let (graph, _) =
            build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn payloads_are_gated_by_option() {
        let ops = vec![write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0)];
        let spans = vec![span_for(
            "s1", "actor-b", "ConfigMap", "cm",
            T0 + 2,
            Some(T0 + 4),
            "u1", "5",
        )];

        let (bare, _) = build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
        let op_node = bare.nodes.iter().find(|n| n.id == "op:1").unwrap();
        assert!(op_node.resource_data.is_empty());

        let (full, _) = build_causality_graph(
            &ops,
            &spans,
            CausalityOptions {
                include_payloads: true,
            },
        )
        .unwrap();
        let op_node = full.nodes.iter().find(|n| n.id == "op:1").unwrap();
        assert_eq!(op_node.resource_data, "{\"spec\":{}}");
    }

    #[test]
    fn warnings_cover_empty_inputs() {
        let (_, warnings) =
            build_causality_graph(&[], &[], CausalityOptions::default()).unwrap();
        assert!(warnings.iter().any(|w| w.contains("No reconcile spans")));
        assert!(warnings.iter().any(|w| w.contains("No write operations")));
        assert!(warnings.iter().any(|w| w.contains("uid/resource_version")));
        assert!(warnings.iter().any(|w| w.contains("No causality edges")));
    }

    fn chain_fixture() -> (CausalityGraph, Vec<String>) {
        // actor-a writes cm@5 -> actor-b reconciles cm (s1) -> actor-b
        // writes secret@2 -> actor-c reconciles secret (s2)
        let ops = vec![
            write_op(1, "actor-a", "ConfigMap", "cm", "u1", "5", T0),
            write_op(2, "actor-b", "Secret", "secret", "u2", "2", T0 + 3),
        ];
        let spans = vec![
            span_for("s1", "actor-b", "ConfigMap", "cm", T0 + 2, Some(T0 + 4), "u1", "5"),
            span_for("s2", "actor-c", "Secret", "secret", T0 + 5, Some(T0 + 7), "u2", "2"),
        ];
        build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap()
    }

    #[test]
    fn chains_walk_alternating_nodes() {
        let (graph, _) = chain_fixture();
        let chains = build_causality_chains(&graph, 0, 0);
        assert!(!chains.is_empty());
        let longest = &chains[0];
        assert_eq!(
            longest.node_ids,
            vec!["op:1", "span:s1", "op:2", "span:s2"]
        );
        assert_eq!(longest.length, 4);
        assert_eq!(longest.fan_out, 1);
    }

    #[test]
    fn chain_node_ids_are_distinct() {
        let (graph, _) = chain_fixture();
        for chain in build_causality_chains(&graph, 0, 0) {
            let mut seen = HashSet::new();
            for id in &chain.node_ids {
                assert!(seen.insert(id.clone()), "cycle in chain: {:?}", chain.node_ids);
            }
        }
    }

    #[test]
    fn depth_limit_truncates_chains() {
        let (graph, _) = chain_fixture();
        let chains = build_causality_chains(&graph, 2, 0);
        assert!(chains.iter().all(|c| c.length <= 2));
    }

    #[test]
    fn chain_count_is_limited() {
        let (graph, _) = chain_fixture();
        let chains = build_causality_chains(&graph, 0, 1);
        assert_eq!(chains.len(), 1);
    }

    #[test]
    fn rendered_chain_reads_as_sentence() {
        let (graph, _) = chain_fixture();
        let chains = build_causality_chains(&graph, 0, 0);
        let lines = render_chains(&graph, &chains);
        assert!(
            lines[0].starts_with("actor-a writes ConfigMap/default/cm@rv5 -> actor-b reconciles"),
            "got: {}",
            lines[0]
        );
    }

    #[test]
    fn node_json_uses_short_field_names() {
        let (graph, warnings) = chain_fixture();
        let report = CausalityReport::new(graph, warnings);
        let json = serde_json::to_value(&report).unwrap();
        let node = &json["nodes"][0];
        assert!(node.get("ts").is_some());
        assert_eq!(node["type"], "op");
        assert!(node.get("resource_data").is_none());
        let edge = &json["edges"][0];
        assert!(edge["type"] == "op_to_span" || edge["type"] == "span_to_op");
    }
}
