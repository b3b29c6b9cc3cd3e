//! The client-facing analyzer contract and the events it emits.
//!
//! An [`Analyzer`] decides what is "interesting": it inspects every new path
//! edge and every cross-unit call, and answers with events the manager
//! routes into summary storage or into other runners. The engine itself has
//! no notion of a sink or a vulnerability beyond these events.

use crate::domain::{DataflowFact, Edge, Vertex, Vulnerability};
use crate::flow::FlowFunctions;
use crate::graph::ProgramGraph;
use crate::unit::UnitType;

/// Events produced by an [`Analyzer`] and routed by the manager.
#[derive(Debug, Clone)]
pub enum Event<M, S, F> {
    /// A path edge reaching a method exit became known; publish it to the
    /// method's summary stream.
    NewSummaryEdge { method: M, edge: Edge<S, F> },

    /// A finding at a sink.
    NewVulnerability(Vulnerability<M, S, F>),

    /// A start edge for a method that belongs to another unit's runner.
    /// `caller` is the call-site vertex that triggered it.
    EdgeForOtherRunner {
        edge: Edge<S, F>,
        caller: Vertex<S, F>,
    },
}

/// Scheduling-level events, separate from analysis events.
#[derive(Debug, Clone)]
pub enum ControlEvent<M> {
    QueueEmptinessChanged {
        unit: UnitType<M>,
        is_empty: bool,
    },
}

/// Client-supplied per-problem logic: the flow-function space plus the
/// "what's interesting" detector.
pub trait Analyzer<G: ProgramGraph, F: DataflowFact>: Send + Sync {
    type Flow: FlowFunctions<G, F>;

    fn flow_functions(&self) -> &Self::Flow;

    /// Called once for every path edge newly inserted by a runner.
    fn handle_new_edge(
        &self,
        edge: &Edge<G::Statement, F>,
    ) -> Vec<Event<G::Method, G::Statement, F>>;

    /// Called when a call site targets a method in another unit;
    /// `callee_start` is the start vertex the callee should be analyzed
    /// from. Typically answers with [`Event::EdgeForOtherRunner`].
    fn handle_cross_unit_call(
        &self,
        caller: &Vertex<G::Statement, F>,
        callee_start: &Vertex<G::Statement, F>,
    ) -> Vec<Event<G::Method, G::Statement, F>>;
}
