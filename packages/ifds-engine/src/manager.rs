//! Orchestration: unit discovery, runner lifecycle, event routing and
//! quiescence detection.
//!
//! The manager walks the call graph from the start methods, groups the
//! reachable methods into units, spawns one runner thread per unit and then
//! waits for either global quiescence (every worklist empty and every runner
//! blocked) or the configured timeout. Either way the runners are cancelled,
//! joined, and their tables snapshotted into [`AnalysisResults`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, ControlEvent, Event};
use crate::domain::{DataflowFact, Edge, Reason, Vulnerability};
use crate::graph::{direct_callees, ProgramGraph};
use crate::runner::{IfdsResult, Runner, RunnerHost, UnitJob};
use crate::storage::SummaryStorage;
use crate::unit::{UnitResolver, UnitType};

/// Knobs for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Wall-clock budget for the whole run. On expiry the runners are
    /// cancelled and whatever they computed so far is returned.
    pub timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
        }
    }
}

impl AnalysisConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything the run produced, merged across units.
pub struct AnalysisResults<G: ProgramGraph, F: DataflowFact> {
    pub vulnerabilities: Vec<Vulnerability<G::Method, G::Statement, F>>,
    pub ifds_results: FxHashMap<UnitType<G::Method>, IfdsResult<G::Statement, F>>,
    pub summary_edges: FxHashMap<G::Method, Vec<Edge<G::Statement, F>>>,
}

struct StopRendezvous {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl StopRendezvous {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.stopped.lock() = true;
        self.signal.notify_all();
    }

    /// Returns false when the timeout expired before the signal.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.signal.wait_until(&mut stopped, deadline).timed_out() {
                return *stopped;
            }
        }
        true
    }
}

/// State shared between the manager thread and all runner threads.
///
/// Quiescence is detected by work counting: `pending` holds one token per
/// not-yet-seeded runner plus one per enqueued-but-unprocessed edge.
/// Producers increment before an edge becomes visible and consumers
/// decrement after the step completes, so a zero read means no unit can
/// generate further work.
struct ManagerShared<G: ProgramGraph, F: DataflowFact> {
    graph: Arc<G>,
    resolver: Arc<dyn UnitResolver<G::Method>>,
    runners: RwLock<FxHashMap<UnitType<G::Method>, Arc<dyn UnitJob<G, F>>>>,
    summary_edges: SummaryStorage<G::Method, Edge<G::Statement, F>>,
    vulnerabilities: SummaryStorage<G::Method, Vulnerability<G::Method, G::Statement, F>>,
    pending: Arc<AtomicUsize>,
    stop: StopRendezvous,
}

impl<G: ProgramGraph, F: DataflowFact> ManagerShared<G, F> {
    fn new(graph: Arc<G>, resolver: Arc<dyn UnitResolver<G::Method>>) -> Self {
        Self {
            graph,
            resolver,
            runners: RwLock::new(FxHashMap::default()),
            summary_edges: SummaryStorage::new(),
            vulnerabilities: SummaryStorage::new(),
            pending: Arc::new(AtomicUsize::new(0)),
            stop: StopRendezvous::new(),
        }
    }

    fn register_runner(&self, unit: UnitType<G::Method>, runner: Arc<dyn UnitJob<G, F>>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.runners.write().insert(unit, runner);
    }

    /// Drops runner handles and subscriber callbacks so that the shared
    /// state, the runners and the closures capturing them can all be freed.
    fn shutdown(&self) {
        self.runners.write().clear();
        self.summary_edges.clear_subscribers();
        self.vulnerabilities.clear_subscribers();
    }
}

impl<G: ProgramGraph, F: DataflowFact> RunnerHost<G, F> for ManagerShared<G, F> {
    fn handle_event(&self, event: Event<G::Method, G::Statement, F>) {
        match event {
            Event::NewSummaryEdge { method, edge } => {
                self.summary_edges.add(method, edge);
            }
            Event::NewVulnerability(vulnerability) => {
                info!(method = ?vulnerability.method, message = %vulnerability.message, "vulnerability");
                self.vulnerabilities
                    .add(vulnerability.method.clone(), vulnerability);
            }
            Event::EdgeForOtherRunner { edge, caller } => {
                let method = self.graph.method_of(&edge.from.statement);
                let unit = self.resolver.resolve(&method);
                let runner = self.runners.read().get(&unit).cloned();
                match runner {
                    Some(runner) => {
                        runner.submit_new_edge(edge, Reason::CrossUnitCall { caller });
                    }
                    None => {
                        debug!(?unit, ?method, "dropping edge for a unit with no runner");
                    }
                }
            }
        }
    }

    fn handle_control_event(&self, event: ControlEvent<G::Method>) {
        match event {
            ControlEvent::QueueEmptinessChanged { unit, is_empty } => {
                debug!(?unit, is_empty, "queue emptiness changed");
                if is_empty && self.pending.load(Ordering::SeqCst) == 0 {
                    self.stop.signal();
                }
            }
        }
    }

    fn subscribe_on_summary_edges(
        &self,
        method: &G::Method,
        callback: Arc<dyn Fn(&Edge<G::Statement, F>) + Send + Sync>,
    ) {
        self.summary_edges.subscribe(method.clone(), callback);
    }
}

/// Walk the call graph from the start methods and group every reachable
/// method under its unit. Methods resolving to [`UnitType::Unknown`] are
/// skipped along with their (otherwise unreachable) callees.
fn methods_by_unit<G: ProgramGraph>(
    graph: &G,
    resolver: &dyn UnitResolver<G::Method>,
    start_methods: Vec<G::Method>,
) -> FxHashMap<UnitType<G::Method>, Vec<G::Method>> {
    let mut methods: FxHashMap<UnitType<G::Method>, Vec<G::Method>> = FxHashMap::default();
    let mut seen: FxHashSet<G::Method> = FxHashSet::default();
    let mut stack = start_methods;

    while let Some(method) = stack.pop() {
        if !seen.insert(method.clone()) {
            continue;
        }
        let unit = resolver.resolve(&method);
        if unit.is_unknown() {
            debug!(?method, "method resolves to the unknown unit, skipping");
            continue;
        }
        stack.extend(direct_callees(graph, &method));
        methods.entry(unit).or_default().push(method);
    }
    methods
}

/// Top-level entry point: owns the configuration and drives one analysis
/// run from seeding to result collection.
pub struct Manager<G, F, A>
where
    G: ProgramGraph,
    F: DataflowFact,
    A: Analyzer<G, F>,
{
    graph: Arc<G>,
    analyzer: Arc<A>,
    resolver: Arc<dyn UnitResolver<G::Method>>,
    config: AnalysisConfig,
    _fact: std::marker::PhantomData<F>,
}

impl<G, F, A> Manager<G, F, A>
where
    G: ProgramGraph,
    F: DataflowFact,
    A: Analyzer<G, F> + 'static,
{
    pub fn new(
        graph: Arc<G>,
        analyzer: Arc<A>,
        resolver: Arc<dyn UnitResolver<G::Method>>,
    ) -> Self {
        Self {
            graph,
            analyzer,
            resolver,
            config: AnalysisConfig::default(),
            _fact: std::marker::PhantomData,
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the analysis from `start_methods` to quiescence or timeout.
    pub fn analyze(&self, start_methods: Vec<G::Method>) -> AnalysisResults<G, F> {
        let methods = methods_by_unit(&*self.graph, &*self.resolver, start_methods);
        info!(units = methods.len(), "starting analysis");

        if methods.is_empty() {
            return AnalysisResults {
                vulnerabilities: Vec::new(),
                ifds_results: FxHashMap::default(),
                summary_edges: FxHashMap::default(),
            };
        }

        let shared = Arc::new(ManagerShared::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.resolver),
        ));

        // every runner must exist before any of them starts, so that
        // cross-unit edges always find their target
        let mut runners: Vec<(UnitType<G::Method>, Arc<Runner<G, F, A>>)> = Vec::new();
        for unit in methods.keys() {
            let runner = Arc::new(Runner::new(
                Arc::clone(&self.graph),
                Arc::clone(&self.analyzer),
                Arc::clone(&self.resolver),
                Arc::clone(&shared) as Arc<dyn RunnerHost<G, F>>,
                unit.clone(),
                Arc::clone(&shared.pending),
            ));
            shared.register_runner(unit.clone(), Arc::clone(&runner) as Arc<dyn UnitJob<G, F>>);
            runners.push((unit.clone(), runner));
        }

        std::thread::scope(|scope| {
            for (unit, runner) in &runners {
                let job = Arc::clone(runner);
                let start = methods.get(unit).cloned().unwrap_or_default();
                scope.spawn(move || job.run(start));
            }

            if !shared.stop.wait(self.config.timeout) {
                warn!(timeout = ?self.config.timeout, "analysis timed out, returning partial results");
            }
            for (_, runner) in &runners {
                runner.cancel();
            }
        });

        let vulnerabilities = shared.vulnerabilities.all_facts();
        let summary_edges = shared
            .summary_edges
            .known_keys()
            .into_iter()
            .map(|method| {
                let edges = shared.summary_edges.facts_for(&method);
                (method, edges)
            })
            .collect();
        let ifds_results = runners
            .iter()
            .map(|(unit, runner)| (unit.clone(), runner.ifds_result()))
            .collect();

        shared.shutdown();
        info!(findings = vulnerabilities.len(), "analysis finished");

        AnalysisResults {
            vulnerabilities,
            ifds_results,
            summary_edges,
        }
    }
}
