//! Provenance reconstruction: turning the reasons multimap back into
//! source-to-sink traces.
//!
//! An [`Aggregate`] merges the per-unit result tables into one queryable
//! view. From a sink vertex it rebuilds a [`TraceGraph`] by walking reasons
//! backwards; summary reasons are expanded into the callee's body, and
//! cross-unit reasons are left as unresolved stitch points for
//! [`TraceGraph::merge_with_up_graph`].

use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;

use crate::domain::{DataflowFact, Edge, Reason, Vertex};
use crate::errors::{EngineError, Result};
use crate::runner::IfdsResult;

/// Merged view over one or more unit results.
pub struct Aggregate<S, F> {
    reasons: FxHashMap<Edge<S, F>, FxHashSet<Reason<S, F>>>,
    edges_by_end: FxHashMap<Vertex<S, F>, Vec<Edge<S, F>>>,
}

impl<S, F> Aggregate<S, F>
where
    S: Clone + Eq + Hash,
    F: DataflowFact,
{
    pub fn new<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a IfdsResult<S, F>>,
        S: 'a,
        F: 'a,
    {
        let mut reasons: FxHashMap<Edge<S, F>, FxHashSet<Reason<S, F>>> = FxHashMap::default();
        let mut edges_by_end: FxHashMap<Vertex<S, F>, Vec<Edge<S, F>>> = FxHashMap::default();
        for result in results {
            for (edge, edge_reasons) in &result.reasons {
                reasons
                    .entry(edge.clone())
                    .or_default()
                    .extend(edge_reasons.iter().cloned());
            }
            for edge in &result.path_edges {
                edges_by_end
                    .entry(edge.to.clone())
                    .or_default()
                    .push(edge.clone());
            }
        }
        Self {
            reasons,
            edges_by_end,
        }
    }

    /// Rebuild the trace graph for every path edge ending at `sink`.
    pub fn build_trace_graph(&self, sink: &Vertex<S, F>) -> Result<TraceGraph<S, F>> {
        let mut builder = TraceGraphBuilder {
            aggregate: self,
            sources: FxHashSet::default(),
            edges: FxHashMap::default(),
            unresolved_cross_unit_calls: FxHashMap::default(),
            visited: FxHashSet::default(),
        };

        for edge in self.edges_by_end.get(sink).into_iter().flatten() {
            builder.dfs(edge, sink, false)?;
        }

        Ok(TraceGraph {
            sink: sink.clone(),
            sources: builder.sources,
            edges: builder.edges,
            unresolved_cross_unit_calls: builder.unresolved_cross_unit_calls,
        })
    }
}

struct TraceGraphBuilder<'a, S, F> {
    aggregate: &'a Aggregate<S, F>,
    sources: FxHashSet<Vertex<S, F>>,
    edges: FxHashMap<Vertex<S, F>, FxHashSet<Vertex<S, F>>>,
    unresolved_cross_unit_calls: FxHashMap<Vertex<S, F>, FxHashSet<Vertex<S, F>>>,
    visited: FxHashSet<(Edge<S, F>, Vertex<S, F>)>,
}

impl<S, F> TraceGraphBuilder<'_, S, F>
where
    S: Clone + Eq + Hash,
    F: DataflowFact,
{
    fn add_edge(&mut self, from: &Vertex<S, F>, to: &Vertex<S, F>) {
        if from != to {
            self.edges
                .entry(from.clone())
                .or_default()
                .insert(to.clone());
        }
    }

    /// Walk the reasons of `edge` backwards, threading `last_vertex` as the
    /// downstream vertex every discovered predecessor connects to. With
    /// `stop_at_method_start` the walk stays inside the current method,
    /// which is how summary expansions avoid re-entering the caller.
    fn dfs(
        &mut self,
        edge: &Edge<S, F>,
        last_vertex: &Vertex<S, F>,
        stop_at_method_start: bool,
    ) -> Result<()> {
        if !self.visited.insert((edge.clone(), last_vertex.clone())) {
            return Ok(());
        }

        if stop_at_method_start && edge.is_start() {
            self.add_edge(&edge.from, last_vertex);
            return Ok(());
        }

        let vertex = &edge.to;
        if vertex.fact.is_zero() {
            self.add_edge(vertex, last_vertex);
            self.sources.insert(vertex.clone());
            return Ok(());
        }

        let reasons: Vec<_> = self
            .aggregate
            .reasons
            .get(edge)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        for reason in reasons {
            match reason {
                Reason::Initial => {
                    self.sources.insert(vertex.clone());
                    self.add_edge(vertex, last_vertex);
                }
                Reason::External => {
                    return Err(EngineError::UnsupportedReason(
                        "externally injected edges carry no local justification".into(),
                    ));
                }
                Reason::CrossUnitCall { caller } => {
                    // keep the entry vertex connected so that merging the
                    // caller's graph produces complete paths
                    self.add_edge(vertex, last_vertex);
                    self.unresolved_cross_unit_calls
                        .entry(caller)
                        .or_default()
                        .insert(vertex.clone());
                }
                Reason::Sequent { edge: pred } => {
                    if pred.to.fact == vertex.fact {
                        self.dfs(&pred, last_vertex, stop_at_method_start)?;
                    } else {
                        self.add_edge(&pred.to, last_vertex);
                        let next_last = pred.to.clone();
                        self.dfs(&pred, &next_last, stop_at_method_start)?;
                    }
                }
                Reason::CallToStart { edge: pred } => {
                    if !stop_at_method_start {
                        self.add_edge(&pred.to, last_vertex);
                        let next_last = pred.to.clone();
                        self.dfs(&pred, &next_last, false)?;
                    }
                }
                Reason::ThroughSummary {
                    edge: pred,
                    summary_edge,
                } => {
                    // callee exit flows into the vertex after the call
                    self.add_edge(&summary_edge.to, last_vertex);
                    // call site flows into the callee start
                    self.add_edge(&pred.to, &summary_edge.from);
                    let summary_last = summary_edge.to.clone();
                    self.dfs(&summary_edge, &summary_last, true)?;
                    let pred_last = pred.to.clone();
                    self.dfs(&pred, &pred_last, stop_at_method_start)?;
                }
            }
        }
        Ok(())
    }
}

/// Compressed provenance graph for one sink: vertices where the tracked fact
/// was created or changed, edges meaning "flows to".
#[derive(Debug, Clone)]
pub struct TraceGraph<S, F> {
    pub sink: Vertex<S, F>,
    pub sources: FxHashSet<Vertex<S, F>>,
    pub edges: FxHashMap<Vertex<S, F>, FxHashSet<Vertex<S, F>>>,
    /// Caller vertex (in another unit) -> entry vertices of this graph that
    /// it reached. Resolved by merging with the caller's trace graph.
    pub unresolved_cross_unit_calls: FxHashMap<Vertex<S, F>, FxHashSet<Vertex<S, F>>>,
}

impl<S, F> TraceGraph<S, F>
where
    S: Clone + Eq + Hash,
    F: DataflowFact,
{
    /// Stitch the caller-side graph `up_graph` onto this graph at
    /// `entry_points` (the vertices recorded as unresolved cross-unit
    /// entries). Entry points not present in this graph are ignored; when
    /// none are present the graph is returned unchanged.
    pub fn merge_with_up_graph(
        mut self,
        up_graph: TraceGraph<S, F>,
        entry_points: &FxHashSet<Vertex<S, F>>,
    ) -> TraceGraph<S, F> {
        let valid_entry_points: Vec<_> = entry_points
            .iter()
            .filter(|v| self.edges.contains_key(v) || **v == self.sink)
            .cloned()
            .collect();
        if valid_entry_points.is_empty() {
            return self;
        }

        for entry in valid_entry_points {
            self.edges
                .entry(up_graph.sink.clone())
                .or_default()
                .insert(entry);
        }
        for (from, tos) in up_graph.edges {
            self.edges.entry(from).or_default().extend(tos);
        }
        self.sources.extend(up_graph.sources);

        // the caller vertex is now part of the graph, so its stitch point
        // is resolved
        self.unresolved_cross_unit_calls.remove(&up_graph.sink);
        for (caller, entries) in up_graph.unresolved_cross_unit_calls {
            self.unresolved_cross_unit_calls
                .entry(caller)
                .or_default()
                .extend(entries);
        }
        self
    }

    /// Lazily enumerate every simple source-to-sink path.
    pub fn all_traces(&self) -> Traces<'_, S, F> {
        Traces {
            graph: self,
            stack: self.sources.iter().map(|s| vec![s.clone()]).collect(),
        }
    }
}

/// Iterator over simple paths of a [`TraceGraph`], depth-first.
pub struct Traces<'a, S, F> {
    graph: &'a TraceGraph<S, F>,
    stack: Vec<Vec<Vertex<S, F>>>,
}

impl<S, F> Iterator for Traces<'_, S, F>
where
    S: Clone + Eq + Hash,
    F: DataflowFact,
{
    type Item = Vec<Vertex<S, F>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(path) = self.stack.pop() {
            let Some(last) = path.last().cloned() else {
                continue;
            };
            if last == self.graph.sink {
                return Some(path);
            }
            if let Some(nexts) = self.graph.edges.get(&last) {
                for next in nexts {
                    if !path.contains(next) {
                        let mut extended = path.clone();
                        extended.push(next.clone());
                        self.stack.push(extended);
                    }
                }
            }
        }
        None
    }
}
