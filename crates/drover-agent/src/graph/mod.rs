//! Graph Execution Engine: named steps over a shared state.
//!
//! A graph is a set of `Step`s, one entry step, and for every reachable step
//! exactly one outgoing disposition: a static edge or a conditional edge
//! (branch function + label table). Either can lead to `Target::Terminal`.
//!
//! `GraphExecutor` runs steps strictly one after another, merging each
//! step's `StateUpdate` into the `PipelineState` before the branch
//! function sees it.

pub mod edge;
pub mod executor;
pub mod state;
pub mod step;

pub use edge::{ConditionalEdge, Disposition, Target};
pub use executor::{ExecutionResult, Graph, GraphBuilder, GraphExecutor, StepResult};
pub use state::{PipelineState, StateUpdate};
pub use step::{FnStep, Step};
