//! Per-unit tabulation worker.
//!
//! Each [`Runner`] owns one unit: its worklist, its path-edge and
//! summary-edge tables, and the event loop draining the worklist. Edges are
//! inserted either by the runner's own thread during a tabulation step, by a
//! summary subscription firing on a publisher's thread, or by the manager
//! routing a cross-unit edge. All tables are concurrent for that reason; the
//! worklist itself is the only blocking structure.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::analyzer::{Analyzer, ControlEvent, Event};
use crate::domain::{DataflowFact, Edge, Reason, Vertex};
use crate::flow::FlowFunctions;
use crate::graph::ProgramGraph;
use crate::unit::{UnitResolver, UnitType};

/// What a runner needs from its orchestrator: event routing and access to
/// the shared summary-edge streams.
pub trait RunnerHost<G: ProgramGraph, F: DataflowFact>: Send + Sync {
    fn handle_event(&self, event: Event<G::Method, G::Statement, F>);

    fn handle_control_event(&self, event: ControlEvent<G::Method>);

    fn subscribe_on_summary_edges(
        &self,
        method: &G::Method,
        callback: Arc<dyn Fn(&Edge<G::Statement, F>) + Send + Sync>,
    );
}

/// What the orchestrator needs from a runner, independent of the analyzer
/// type behind it.
pub trait UnitJob<G: ProgramGraph, F: DataflowFact>: Send + Sync {
    fn unit(&self) -> &UnitType<G::Method>;

    /// Seed the start methods and drain the worklist until cancelled.
    fn run(self: Arc<Self>, start_methods: Vec<G::Method>);

    /// Insert an externally derived edge (cross-unit routing).
    fn submit_new_edge(&self, edge: Edge<G::Statement, F>, reason: Reason<G::Statement, F>);

    fn cancel(&self);
}

struct Worklist<S, F> {
    queue: Mutex<VecDequeInner<S, F>>,
    available: Condvar,
    cancelled: AtomicBool,
}

type VecDequeInner<S, F> = std::collections::VecDeque<Edge<S, F>>;

impl<S, F> Worklist<S, F> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDequeInner::new()),
            available: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn push(&self, edge: Edge<S, F>) {
        self.queue.lock().push_back(edge);
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<Edge<S, F>> {
        self.queue.lock().pop_front()
    }

    /// Blocks until an edge arrives or the worklist is cancelled.
    fn pop_blocking(&self) -> Option<Edge<S, F>> {
        let mut queue = self.queue.lock();
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            if let Some(edge) = queue.pop_front() {
                return Some(edge);
            }
            self.available.wait(&mut queue);
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.available.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Immutable snapshot of one unit's tabulation state after the run.
#[derive(Debug, Clone)]
pub struct IfdsResult<S, F> {
    /// Every path edge discovered by the unit's runner.
    pub path_edges: Vec<Edge<S, F>>,
    /// Facts reaching each statement, projected from the path edges.
    pub facts: FxHashMap<S, FxHashSet<F>>,
    /// Full justification multimap, edge-keyed.
    pub reasons: FxHashMap<Edge<S, F>, FxHashSet<Reason<S, F>>>,
    pub zero_fact: F,
}

impl<S, F> IfdsResult<S, F>
where
    S: Clone + Eq + std::hash::Hash,
    F: DataflowFact,
{
    /// Non-zero facts reaching `statement`.
    pub fn facts_at(&self, statement: &S) -> Vec<F> {
        self.facts
            .get(statement)
            .map(|facts| facts.iter().filter(|f| !f.is_zero()).cloned().collect())
            .unwrap_or_default()
    }
}

/// Tabulation worker for a single unit.
pub struct Runner<G, F, A>
where
    G: ProgramGraph,
    F: DataflowFact,
    A: Analyzer<G, F>,
{
    graph: Arc<G>,
    analyzer: Arc<A>,
    resolver: Arc<dyn UnitResolver<G::Method>>,
    host: Arc<dyn RunnerHost<G, F>>,
    unit: UnitType<G::Method>,
    // global unprocessed-work counter shared with the manager; incremented
    // before an edge becomes visible in any queue, decremented after its
    // step completes, so zero means true quiescence
    pending: Arc<AtomicUsize>,

    worklist: Worklist<G::Statement, F>,
    path_edges: DashSet<Edge<G::Statement, F>>,
    reasons: DashMap<Edge<G::Statement, F>, FxHashSet<Reason<G::Statement, F>>>,
    // callee start vertex -> exit vertices with a known summary edge
    summary_edges: Mutex<FxHashMap<Vertex<G::Statement, F>, FxHashSet<Vertex<G::Statement, F>>>>,
    // callee start vertex -> call-site path edges waiting on its summaries
    caller_path_edges: Mutex<FxHashMap<Vertex<G::Statement, F>, FxHashSet<Edge<G::Statement, F>>>>,
}

impl<G, F, A> Runner<G, F, A>
where
    G: ProgramGraph,
    F: DataflowFact,
    A: Analyzer<G, F> + 'static,
{
    pub fn new(
        graph: Arc<G>,
        analyzer: Arc<A>,
        resolver: Arc<dyn UnitResolver<G::Method>>,
        host: Arc<dyn RunnerHost<G, F>>,
        unit: UnitType<G::Method>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            graph,
            analyzer,
            resolver,
            host,
            unit,
            pending,
            worklist: Worklist::new(),
            path_edges: DashSet::new(),
            reasons: DashMap::new(),
            summary_edges: Mutex::new(FxHashMap::default()),
            caller_path_edges: Mutex::new(FxHashMap::default()),
        }
    }

    /// Seed the start edges for `method`: one self-loop edge per
    /// (entry point, start fact) pair.
    fn add_start(&self, method: &G::Method) {
        let start_facts = self
            .analyzer
            .flow_functions()
            .obtain_possible_start_facts(method);
        for entry in self.graph.entry_points(method) {
            for fact in &start_facts {
                let vertex = Vertex::new(entry.clone(), fact.clone());
                self.propagate(Edge::start_at(vertex), Reason::Initial);
            }
        }
    }

    /// Record `reason` for `edge`, and schedule `edge` if it is new.
    ///
    /// Panics if `edge` belongs to another unit; the manager is responsible
    /// for routing edges to the right runner before they get here.
    fn propagate(&self, edge: Edge<G::Statement, F>, reason: Reason<G::Statement, F>) {
        let method = self.graph.method_of(&edge.from.statement);
        assert_eq!(
            self.resolver.resolve(&method),
            self.unit,
            "edge for method {method:?} propagated into runner for unit {:?}",
            self.unit
        );

        self.reasons.entry(edge.clone()).or_default().insert(reason);

        if self.path_edges.insert(edge.clone()) {
            trace!(?edge, unit = ?self.unit, "new path edge");
            for event in self.analyzer.handle_new_edge(&edge) {
                self.host.handle_event(event);
            }
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.worklist.push(edge);
        }
    }

    /// One tabulation step for `edge`, dispatching on the kind of its
    /// current statement (call site, exit point, or ordinary statement).
    fn tabulation_step(self: &Arc<Self>, edge: &Edge<G::Statement, F>) {
        let current = &edge.to;
        let stmt = &current.statement;
        let flow = self.analyzer.flow_functions();

        if self.graph.is_call(stmt) {
            for return_site in self.graph.successors(stmt) {
                let ff = flow.obtain_call_to_return_site_flow_function(stmt, &return_site);
                for fact in ff.compute(&current.fact) {
                    self.propagate(
                        Edge::new(edge.from.clone(), Vertex::new(return_site.clone(), fact)),
                        Reason::Sequent { edge: edge.clone() },
                    );
                }
            }
            for callee in self.graph.callees(stmt) {
                let callee_unit = self.resolver.resolve(&callee);
                if callee_unit.is_unknown() {
                    continue;
                }
                for callee_start in self.graph.entry_points(&callee) {
                    let ff = flow.obtain_call_to_start_flow_function(stmt, &callee_start);
                    for fact in ff.compute(&current.fact) {
                        let start_vertex = Vertex::new(callee_start.clone(), fact);
                        if callee_unit == self.unit {
                            self.handle_local_call(edge, start_vertex);
                        } else {
                            self.handle_cross_unit_call(edge, &callee, start_vertex);
                        }
                    }
                }
            }
        } else {
            let method = self.graph.method_of(stmt);
            if self.graph.exit_points(&method).contains(stmt) {
                self.handle_exit(edge);
            } else {
                for next in self.graph.successors(stmt) {
                    let ff = flow.obtain_sequent_flow_function(stmt, &next);
                    for fact in ff.compute(&current.fact) {
                        self.propagate(
                            Edge::new(edge.from.clone(), Vertex::new(next.clone(), fact)),
                            Reason::Sequent { edge: edge.clone() },
                        );
                    }
                }
            }
        }
    }

    /// Call into a method of this same unit: seed the callee, remember the
    /// call-site edge, and replay summaries the callee already produced.
    fn handle_local_call(&self, caller_edge: &Edge<G::Statement, F>, start_vertex: Vertex<G::Statement, F>) {
        self.propagate(
            Edge::start_at(start_vertex.clone()),
            Reason::CallToStart {
                edge: caller_edge.clone(),
            },
        );

        let is_new = self
            .caller_path_edges
            .lock()
            .entry(start_vertex.clone())
            .or_default()
            .insert(caller_edge.clone());
        if !is_new {
            return;
        }

        let known_exits: Vec<_> = self
            .summary_edges
            .lock()
            .get(&start_vertex)
            .map(|exits| exits.iter().cloned().collect())
            .unwrap_or_default();
        for exit_vertex in known_exits {
            self.handle_summary_edge(caller_edge, &Edge::new(start_vertex.clone(), exit_vertex));
        }
    }

    /// Call into a method owned by another unit: hand the start edge to the
    /// manager and subscribe to the callee's summary-edge stream.
    fn handle_cross_unit_call(
        self: &Arc<Self>,
        caller_edge: &Edge<G::Statement, F>,
        callee: &G::Method,
        start_vertex: Vertex<G::Statement, F>,
    ) {
        for event in self
            .analyzer
            .handle_cross_unit_call(&caller_edge.to, &start_vertex)
        {
            self.host.handle_event(event);
        }

        let this = Arc::clone(self);
        let caller_edge = caller_edge.clone();
        self.host.subscribe_on_summary_edges(
            callee,
            Arc::new(move |summary_edge: &Edge<G::Statement, F>| {
                if summary_edge.from == start_vertex {
                    this.handle_summary_edge(&caller_edge, summary_edge);
                } else {
                    trace!(?summary_edge, "summary edge for a different start vertex");
                }
            }),
        );
    }

    /// The current vertex is a method exit: flow the exit fact back to the
    /// return sites of every known caller, then record the summary edge for
    /// callers discovered later.
    fn handle_exit(&self, exit_edge: &Edge<G::Statement, F>) {
        let start_vertex = &exit_edge.from;
        let exit_vertex = &exit_edge.to;

        let callers: Vec<_> = self
            .caller_path_edges
            .lock()
            .get(start_vertex)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default();
        for caller_edge in callers {
            self.handle_summary_edge(
                &caller_edge,
                &Edge::new(start_vertex.clone(), exit_vertex.clone()),
            );
        }

        self.summary_edges
            .lock()
            .entry(start_vertex.clone())
            .or_default()
            .insert(exit_vertex.clone());
    }

    /// Apply one callee summary edge at one call-site edge: flow the exit
    /// fact to every return site of the call.
    fn handle_summary_edge(
        &self,
        caller_edge: &Edge<G::Statement, F>,
        summary_edge: &Edge<G::Statement, F>,
    ) {
        let call_stmt = &caller_edge.to.statement;
        let exit_vertex = &summary_edge.to;
        let flow = self.analyzer.flow_functions();

        for return_site in self.graph.successors(call_stmt) {
            let ff = flow.obtain_exit_to_return_site_flow_function(
                call_stmt,
                &return_site,
                &exit_vertex.statement,
            );
            for fact in ff.compute(&exit_vertex.fact) {
                self.propagate(
                    Edge::new(caller_edge.from.clone(), Vertex::new(return_site.clone(), fact)),
                    Reason::ThroughSummary {
                        edge: caller_edge.clone(),
                        summary_edge: summary_edge.clone(),
                    },
                );
            }
        }
    }

    /// Snapshot of this runner's tables, taken after the run has stopped.
    pub fn ifds_result(&self) -> IfdsResult<G::Statement, F> {
        let path_edges: Vec<_> = self.path_edges.iter().map(|e| e.key().clone()).collect();

        let mut facts: FxHashMap<G::Statement, FxHashSet<F>> = FxHashMap::default();
        for edge in &path_edges {
            facts
                .entry(edge.to.statement.clone())
                .or_default()
                .insert(edge.to.fact.clone());
        }

        let reasons = self
            .reasons
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        IfdsResult {
            path_edges,
            facts,
            reasons,
            zero_fact: F::zero(),
        }
    }
}

impl<G, F, A> UnitJob<G, F> for Runner<G, F, A>
where
    G: ProgramGraph,
    F: DataflowFact,
    A: Analyzer<G, F> + 'static,
{
    fn unit(&self) -> &UnitType<G::Method> {
        &self.unit
    }

    fn run(self: Arc<Self>, start_methods: Vec<G::Method>) {
        for method in &start_methods {
            self.add_start(method);
        }
        // consume this unit's seeding token; the manager accounts one per
        // runner so quiescence cannot fire before every unit is seeded
        self.pending.fetch_sub(1, Ordering::SeqCst);

        loop {
            if self.worklist.is_cancelled() {
                break;
            }
            if let Some(edge) = self.worklist.try_pop() {
                self.tabulation_step(&edge);
                self.pending.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            self.host
                .handle_control_event(ControlEvent::QueueEmptinessChanged {
                    unit: self.unit.clone(),
                    is_empty: true,
                });
            match self.worklist.pop_blocking() {
                Some(edge) => {
                    self.host
                        .handle_control_event(ControlEvent::QueueEmptinessChanged {
                            unit: self.unit.clone(),
                            is_empty: false,
                        });
                    self.tabulation_step(&edge);
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                None => break,
            }
        }
        trace!(unit = ?self.unit, "runner stopped");
    }

    fn submit_new_edge(&self, edge: Edge<G::Statement, F>, reason: Reason<G::Statement, F>) {
        self.propagate(edge, reason);
    }

    fn cancel(&self) {
        self.worklist.cancel();
    }
}
