//! The five-function IFDS flow contract.
//!
//! Each flow function maps one input fact to a set of output facts:
//! an empty result kills the fact, an unchanged result passes it through,
//! a larger result generates new facts. Flow functions must distribute over
//! set union for the tabulation algorithm to be exact.

use crate::domain::DataflowFact;
use crate::graph::ProgramGraph;

/// Flow function: `D -> 2^D`.
pub trait FlowFunction<F> {
    fn compute(&self, fact: &F) -> Vec<F>;
}

impl<F, T> FlowFunction<F> for T
where
    T: Fn(&F) -> Vec<F>,
{
    fn compute(&self, fact: &F) -> Vec<F> {
        self(fact)
    }
}

pub type BoxedFlowFunction<'a, F> = Box<dyn FlowFunction<F> + 'a>;

/// Identity flow function: `f(d) = {d}`.
pub fn identity<F: Clone + 'static>() -> BoxedFlowFunction<'static, F> {
    Box::new(|fact: &F| vec![fact.clone()])
}

/// Kill flow function: `f(d) = {}`.
pub fn kill<F: 'static>() -> BoxedFlowFunction<'static, F> {
    Box::new(|_: &F| Vec::new())
}

/// Client-supplied flow-function space for one analysis.
///
/// The four edge kinds of the exploded supergraph:
///
/// ```text
/// [ call p ] ... call statement
///   :  \
///   :   \ (call-to-start)
///   :  [ start p ]
///   :    |          (sequent, inside p)
///   :  [ exit p ]
///   :   /
///   :  / (exit-to-return-site)
///   : /
/// [ return from p ] ... return site
///   ^
///   : (call-to-return-site, bypassing the callee body)
/// ```
pub trait FlowFunctions<G: ProgramGraph, F: DataflowFact>: Send + Sync {
    /// Facts holding at the entry of an analysis start method.
    fn obtain_possible_start_facts(&self, method: &G::Method) -> Vec<F>;

    /// Ordinary intra-procedural edge `current -> next`.
    fn obtain_sequent_flow_function(
        &self,
        current: &G::Statement,
        next: &G::Statement,
    ) -> BoxedFlowFunction<'_, F>;

    /// Edge skipping the callee body: `call -> return_site`.
    fn obtain_call_to_return_site_flow_function(
        &self,
        call: &G::Statement,
        return_site: &G::Statement,
    ) -> BoxedFlowFunction<'_, F>;

    /// Edge into a callee: `call -> callee_start`.
    fn obtain_call_to_start_flow_function(
        &self,
        call: &G::Statement,
        callee_start: &G::Statement,
    ) -> BoxedFlowFunction<'_, F>;

    /// Edge returning from a callee: `exit -> return_site` in the context of
    /// `call`.
    fn obtain_exit_to_return_site_flow_function(
        &self,
        call: &G::Statement,
        return_site: &G::Statement,
        exit: &G::Statement,
    ) -> BoxedFlowFunction<'_, F>;
}
