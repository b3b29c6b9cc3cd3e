//! Core value types of the analysis domain.
//!
//! Everything here is an immutable value: vertices and edges are created
//! inside a runner's tabulation step and live for the runner's lifetime,
//! while reasons are stored edge-keyed in a multimap (never as back-pointers
//! inside the edge itself, which would create reference cycles).

use std::fmt::Debug;
use std::hash::Hash;

/// Dataflow fact (abstract domain element).
///
/// Example:
///   - Taint analysis: `Tainted { variable: "x", source: "user_input" }`
///   - Null pointer: `MayBeNull { variable: "p" }`
///
/// The distinguished ZERO fact denotes pure reachability, independent of any
/// real dataflow fact.
pub trait DataflowFact: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Check if this is the special ZERO fact.
    fn is_zero(&self) -> bool;

    /// Create the ZERO fact.
    fn zero() -> Self;
}

/// Node in the exploded supergraph: a (statement, fact) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vertex<S, F> {
    pub statement: S,
    pub fact: F,
}

impl<S, F> Vertex<S, F> {
    pub fn new(statement: S, fact: F) -> Self {
        Self { statement, fact }
    }
}

/// Path edge: "`to`'s fact is reachable at `to`'s statement, given that
/// `from`'s fact held at the method entry `from`."
///
/// Both endpoints always belong to the same method; cross-unit relationships
/// are represented as [`Reason::CrossUnitCall`], never as an edge spanning
/// units. A self-loop `Edge(v, v)` marks `v` as an analysis starting point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge<S, F> {
    pub from: Vertex<S, F>,
    pub to: Vertex<S, F>,
}

impl<S, F> Edge<S, F> {
    pub fn new(from: Vertex<S, F>, to: Vertex<S, F>) -> Self {
        Self { from, to }
    }

    /// Self-loop edge marking `vertex` as an analysis starting point.
    pub fn start_at(vertex: Vertex<S, F>) -> Self
    where
        S: Clone,
        F: Clone,
    {
        Self {
            from: vertex.clone(),
            to: vertex,
        }
    }

    pub fn is_start(&self) -> bool
    where
        S: PartialEq,
        F: PartialEq,
    {
        self.from == self.to
    }
}

/// Why an edge was derived.
///
/// One edge may carry multiple reasons; they accumulate in an edge-keyed
/// multimap and never shrink. Reasons reference predecessor edges by value,
/// which keeps the justification structure acyclic by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reason<S, F> {
    /// Seeded by `add_start`.
    Initial,

    /// Injected from outside the engine (no local justification recorded).
    External,

    /// Delivered from another unit's runner; `caller` is the call-site
    /// vertex in the originating unit.
    CrossUnitCall { caller: Vertex<S, F> },

    /// Ordinary intra-procedural propagation from `edge`.
    Sequent { edge: Edge<S, F> },

    /// Start of a callee's analysis, triggered by the call-site edge.
    CallToStart { edge: Edge<S, F> },

    /// Return from a callee via `summary_edge`, applied to `edge` at the
    /// call site.
    ThroughSummary {
        edge: Edge<S, F>,
        summary_edge: Edge<S, F>,
    },
}

/// A finding reported by the client analyzer, keyed by its owning method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vulnerability<M, S, F> {
    pub method: M,
    pub message: String,
    pub sink: Vertex<S, F>,
}

impl<M, S, F> Vulnerability<M, S, F> {
    pub fn new(method: M, message: impl Into<String>, sink: Vertex<S, F>) -> Self {
        Self {
            method,
            message: message.into(),
            sink,
        }
    }
}
