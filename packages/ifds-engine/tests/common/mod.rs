//! Shared fixtures: a table-driven program graph, a fact domain and a
//! configurable taint-style analyzer.

#![allow(dead_code)]

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use ifds_engine::{
    Analyzer, BoxedFlowFunction, DataflowFact, Edge, Event, FlowFunctions, ProgramGraph,
    Vertex, Vulnerability,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TestFact {
    Zero,
    Mark(&'static str),
    Count(u64),
}

impl DataflowFact for TestFact {
    fn is_zero(&self) -> bool {
        matches!(self, TestFact::Zero)
    }

    fn zero() -> Self {
        TestFact::Zero
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stmt {
    pub method: &'static str,
    pub index: usize,
}

pub fn stmt(method: &'static str, index: usize) -> Stmt {
    Stmt { method, index }
}

struct MethodBody {
    len: usize,
    calls: FxHashMap<usize, Vec<&'static str>>,
    extra_edges: Vec<(usize, usize)>,
}

/// Program graph described as a table: each method is a linear chain of
/// `len` statements (entry 0, exit len-1) plus optional extra CFG edges and
/// call sites.
pub struct TestGraph {
    methods: FxHashMap<&'static str, MethodBody>,
}

impl TestGraph {
    fn body(&self, method: &'static str) -> &MethodBody {
        self.methods
            .get(method)
            .unwrap_or_else(|| panic!("no method {method} in the test graph"))
    }
}

impl ProgramGraph for TestGraph {
    type Method = &'static str;
    type Statement = Stmt;

    fn successors(&self, s: &Stmt) -> Vec<Stmt> {
        let body = self.body(s.method);
        let mut out = Vec::new();
        if s.index + 1 < body.len {
            out.push(stmt(s.method, s.index + 1));
        }
        for (from, to) in &body.extra_edges {
            if *from == s.index {
                out.push(stmt(s.method, *to));
            }
        }
        out
    }

    fn predecessors(&self, s: &Stmt) -> Vec<Stmt> {
        let body = self.body(s.method);
        let mut out = Vec::new();
        if s.index > 0 && s.index < body.len {
            out.push(stmt(s.method, s.index - 1));
        }
        for (from, to) in &body.extra_edges {
            if *to == s.index {
                out.push(stmt(s.method, *from));
            }
        }
        out
    }

    fn callees(&self, s: &Stmt) -> Vec<&'static str> {
        self.body(s.method)
            .calls
            .get(&s.index)
            .cloned()
            .unwrap_or_default()
    }

    fn entry_points(&self, method: &&'static str) -> Vec<Stmt> {
        vec![stmt(method, 0)]
    }

    fn exit_points(&self, method: &&'static str) -> Vec<Stmt> {
        let body = self.body(method);
        vec![stmt(method, body.len - 1)]
    }

    fn method_of(&self, s: &Stmt) -> &'static str {
        s.method
    }
}

#[derive(Default)]
pub struct GraphBuilder {
    methods: FxHashMap<&'static str, MethodBody>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A method as a linear chain of `len` statements.
    pub fn method(mut self, name: &'static str, len: usize) -> Self {
        assert!(len > 0);
        self.methods.insert(
            name,
            MethodBody {
                len,
                calls: FxHashMap::default(),
                extra_edges: Vec::new(),
            },
        );
        self
    }

    pub fn call(mut self, method: &'static str, at: usize, callee: &'static str) -> Self {
        self.methods
            .get_mut(method)
            .expect("declare the method before its calls")
            .calls
            .entry(at)
            .or_default()
            .push(callee);
        self
    }

    /// Extra CFG edge, e.g. a loop back-edge.
    pub fn edge(mut self, method: &'static str, from: usize, to: usize) -> Self {
        self.methods
            .get_mut(method)
            .expect("declare the method before its edges")
            .extra_edges
            .push((from, to));
        self
    }

    pub fn build(self) -> Arc<TestGraph> {
        Arc::new(TestGraph {
            methods: self.methods,
        })
    }
}

/// Table-driven flow functions over [`TestFact`].
///
/// Sequent edges leaving a `gen` statement create the configured facts out
/// of the zero fact; `kill` statements drop a fact; `bump` statements grow a
/// counter fact without bound (for divergence tests). Call-to-return passes
/// only the zero fact unless `pass_calls` is set; call-to-start and
/// exit-to-return pass everything through.
#[derive(Default, Clone)]
pub struct TableFlows {
    gen_at: FxHashMap<Stmt, Vec<TestFact>>,
    kill_at: FxHashMap<Stmt, Vec<TestFact>>,
    bump_at: FxHashSet<Stmt>,
    pass_calls: bool,
}

impl TableFlows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gen(mut self, method: &'static str, index: usize, fact: TestFact) -> Self {
        self.gen_at.entry(stmt(method, index)).or_default().push(fact);
        self
    }

    pub fn kill(mut self, method: &'static str, index: usize, fact: TestFact) -> Self {
        self.kill_at.entry(stmt(method, index)).or_default().push(fact);
        self
    }

    pub fn bump(mut self, method: &'static str, index: usize) -> Self {
        self.bump_at.insert(stmt(method, index));
        self
    }

    pub fn pass_calls(mut self) -> Self {
        self.pass_calls = true;
        self
    }
}

impl FlowFunctions<TestGraph, TestFact> for TableFlows {
    fn obtain_possible_start_facts(&self, _method: &&'static str) -> Vec<TestFact> {
        vec![TestFact::Zero]
    }

    fn obtain_sequent_flow_function(
        &self,
        current: &Stmt,
        _next: &Stmt,
    ) -> BoxedFlowFunction<'_, TestFact> {
        let bump = self.bump_at.contains(current);
        let kills = self.kill_at.get(current).cloned().unwrap_or_default();
        let gens = self.gen_at.get(current).cloned().unwrap_or_default();
        Box::new(move |fact: &TestFact| {
            if bump {
                if let TestFact::Count(n) = fact {
                    return vec![TestFact::Count(n + 1)];
                }
            }
            if kills.contains(fact) {
                return Vec::new();
            }
            let mut out = vec![fact.clone()];
            if fact.is_zero() {
                out.extend(gens.iter().cloned());
            }
            out
        })
    }

    fn obtain_call_to_return_site_flow_function(
        &self,
        _call: &Stmt,
        _return_site: &Stmt,
    ) -> BoxedFlowFunction<'_, TestFact> {
        let pass_calls = self.pass_calls;
        Box::new(move |fact: &TestFact| {
            if fact.is_zero() || pass_calls {
                vec![fact.clone()]
            } else {
                Vec::new()
            }
        })
    }

    fn obtain_call_to_start_flow_function(
        &self,
        _call: &Stmt,
        _callee_start: &Stmt,
    ) -> BoxedFlowFunction<'_, TestFact> {
        ifds_engine::identity()
    }

    fn obtain_exit_to_return_site_flow_function(
        &self,
        _call: &Stmt,
        _return_site: &Stmt,
        _exit: &Stmt,
    ) -> BoxedFlowFunction<'_, TestFact> {
        ifds_engine::identity()
    }
}

/// Taint-style analyzer: publishes a summary edge for every edge reaching a
/// method exit, reports a vulnerability when a non-zero fact reaches a
/// configured sink, and forwards cross-unit calls to the manager.
pub struct TestAnalyzer {
    pub graph: Arc<TestGraph>,
    pub flows: TableFlows,
    pub sinks: Vec<Stmt>,
}

impl Analyzer<TestGraph, TestFact> for TestAnalyzer {
    type Flow = TableFlows;

    fn flow_functions(&self) -> &TableFlows {
        &self.flows
    }

    fn handle_new_edge(
        &self,
        edge: &Edge<Stmt, TestFact>,
    ) -> Vec<Event<&'static str, Stmt, TestFact>> {
        let mut events = Vec::new();
        let at = &edge.to.statement;
        let method = self.graph.method_of(at);

        if self.graph.exit_points(&method).contains(at) {
            events.push(Event::NewSummaryEdge {
                method,
                edge: edge.clone(),
            });
        }
        if self.sinks.contains(at) && !edge.to.fact.is_zero() {
            events.push(Event::NewVulnerability(Vulnerability::new(
                method,
                "tracked fact reaches sink",
                edge.to.clone(),
            )));
        }
        events
    }

    fn handle_cross_unit_call(
        &self,
        caller: &Vertex<Stmt, TestFact>,
        callee_start: &Vertex<Stmt, TestFact>,
    ) -> Vec<Event<&'static str, Stmt, TestFact>> {
        vec![Event::EdgeForOtherRunner {
            edge: Edge::start_at(callee_start.clone()),
            caller: caller.clone(),
        }]
    }
}
