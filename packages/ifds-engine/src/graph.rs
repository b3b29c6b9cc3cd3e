//! External call-graph abstraction consumed by the engine.
//!
//! The engine never loads or parses an IR itself; the front-end supplies an
//! implementation of [`ProgramGraph`] over its own opaque method/statement
//! handles. The graph must be read-only and safe for concurrent access by
//! all unit tasks.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;

use rustc_hash::FxHashSet;

/// Whole-program supergraph: per-method CFGs plus the call relation.
pub trait ProgramGraph: Send + Sync + 'static {
    type Method: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Statement: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// CFG successors of `stmt` within its own method. For a call statement
    /// these are the return sites.
    fn successors(&self, stmt: &Self::Statement) -> Vec<Self::Statement>;

    /// CFG predecessors of `stmt` within its own method.
    fn predecessors(&self, stmt: &Self::Statement) -> Vec<Self::Statement>;

    /// Possible callees of `stmt` (empty for non-call statements).
    fn callees(&self, stmt: &Self::Statement) -> Vec<Self::Method>;

    fn entry_points(&self, method: &Self::Method) -> Vec<Self::Statement>;

    fn exit_points(&self, method: &Self::Method) -> Vec<Self::Statement>;

    fn method_of(&self, stmt: &Self::Statement) -> Self::Method;

    /// Whether `stmt` is a call site. Front-ends that can resolve no callees
    /// for a genuine call may override this to still get call-to-return
    /// treatment for it.
    fn is_call(&self, stmt: &Self::Statement) -> bool {
        !self.callees(stmt).is_empty()
    }
}

/// All statements of `method`, discovered by walking the CFG from its entry
/// points. The CFG is intra-procedural, so the walk never leaves the method.
pub fn method_statements<G: ProgramGraph>(graph: &G, method: &G::Method) -> Vec<G::Statement> {
    let mut seen: FxHashSet<G::Statement> = FxHashSet::default();
    let mut queue: VecDeque<G::Statement> = VecDeque::new();
    let mut out = Vec::new();
    for entry in graph.entry_points(method) {
        if seen.insert(entry.clone()) {
            queue.push_back(entry);
        }
    }
    while let Some(stmt) = queue.pop_front() {
        for next in graph.successors(&stmt) {
            if seen.insert(next.clone()) {
                queue.push_back(next);
            }
        }
        out.push(stmt);
    }
    out
}

/// Methods directly called from anywhere inside `method`.
pub fn direct_callees<G: ProgramGraph>(graph: &G, method: &G::Method) -> Vec<G::Method> {
    let mut seen: FxHashSet<G::Method> = FxHashSet::default();
    let mut out = Vec::new();
    for stmt in method_statements(graph, method) {
        for callee in graph.callees(&stmt) {
            if seen.insert(callee.clone()) {
                out.push(callee);
            }
        }
    }
    out
}
