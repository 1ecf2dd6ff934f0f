//! Agent pipelines for the drover customer-service assistant.
//!
//! `graph` is the step/edge execution engine; `pipelines` holds the three
//! fixed graphs built on it; `service` chains them per request.

pub mod graph;
pub mod pipelines;
pub mod prompts;
pub mod service;

pub use graph::{GraphBuilder, GraphExecutor, PipelineState, StateUpdate, Step, Target};
pub use pipelines::{
    DecisionOutcome, DecisionPipeline, DecisionRequest, IntentOutcome, IntentPipeline,
    ScreeningOutcome, ScreeningPipeline,
};
pub use service::{AgentDeps, AgentRequest, AgentResponse, AgentService};
