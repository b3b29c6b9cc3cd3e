/*
 * ifds-engine - Interprocedural dataflow analysis via IFDS tabulation
 *
 * Layered architecture:
 * - domain/    : Value types (Vertex, Edge, Reason, Vulnerability)
 * - graph/     : ProgramGraph abstraction supplied by the front-end
 * - flow/      : Flow-function contract (the five IFDS functions)
 * - analyzer/  : Client analyzer contract and its event types
 * - unit/      : Unit partitioning (method/class/package/singleton)
 * - storage/   : Deduplicating pub/sub summary storage with replay
 * - runner/    : Per-unit worklist tabulation
 * - manager/   : Orchestration, quiescence detection, timeout
 * - trace/     : Trace-graph reconstruction from recorded reasons
 *
 * Concurrency model:
 * - One OS thread per analysis unit, blocking worklists
 * - Cross-unit edges routed through the manager
 * - Summary edges published/replayed through shared storage
 */

pub mod analyzer;
pub mod domain;
pub mod errors;
pub mod flow;
pub mod graph;
pub mod manager;
pub mod runner;
pub mod storage;
pub mod trace;
pub mod unit;

pub use analyzer::{Analyzer, ControlEvent, Event};
pub use domain::{DataflowFact, Edge, Reason, Vertex, Vulnerability};
pub use errors::{EngineError, Result};
pub use flow::{identity, kill, BoxedFlowFunction, FlowFunction, FlowFunctions};
pub use graph::{direct_callees, method_statements, ProgramGraph};
pub use manager::{AnalysisConfig, AnalysisResults, Manager};
pub use runner::{IfdsResult, Runner, RunnerHost, UnitJob};
pub use storage::SummaryStorage;
pub use trace::{Aggregate, TraceGraph, Traces};
pub use unit::{
    ClassUnitResolver, MethodUnitResolver, PackageUnitResolver, SingletonUnitResolver,
    UnitResolver, UnitType,
};
