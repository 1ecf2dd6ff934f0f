use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use drover_core::error::{DroverError, Result};
use drover_core::types::RunId;

use super::edge::{ConditionalEdge, Disposition, Target};
use super::state::{PipelineState, StateUpdate};
use super::step::Step;

/// Timing of one executed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: String,
    pub elapsed_ms: u64,
}

/// Result of running a graph to its terminal.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// The final state with all merged updates.
    pub state: PipelineState,
    /// Per-step results in execution order.
    pub step_results: Vec<StepResult>,
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    /// Names of the executed steps, in order.
    pub fn visited(&self) -> Vec<&str> {
        self.step_results.iter().map(|r| r.step.as_str()).collect()
    }
}

/// Builds and validates an immutable `Graph`.
#[derive(Default)]
pub struct GraphBuilder {
    steps: HashMap<String, Arc<dyn Step>>,
    dispositions: HashMap<String, Disposition>,
    entry: Option<String>,
    problems: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step under its own name.
    pub fn add_step(mut self, step: impl Step) -> Self {
        let name = step.name().to_string();
        if self.steps.insert(name.clone(), Arc::new(step)).is_some() {
            self.problems.push(format!("step '{}' registered twice", name));
        }
        self
    }

    pub fn set_entry(mut self, step: impl Into<String>) -> Self {
        self.entry = Some(step.into());
        self
    }

    /// Unconditional edge from `from` to `to`.
    pub fn add_edge(self, from: impl Into<String>, to: Target) -> Self {
        self.dispose(from.into(), Disposition::Static(to))
    }

    /// Conditional edge: after `from` runs, `branch` maps the post-merge
    /// state to a label which is looked up in `targets`.
    pub fn add_conditional_edges<F, L>(
        self,
        from: impl Into<String>,
        branch: F,
        targets: impl IntoIterator<Item = (L, Target)>,
    ) -> Self
    where
        F: Fn(&PipelineState) -> L + Send + Sync + 'static,
        L: Into<String>,
    {
        let from = from.into();
        let edge = ConditionalEdge::new(branch, targets);
        if edge.is_empty() {
            let mut this = self;
            this.problems
                .push(format!("conditional edge from '{}' has no targets", from));
            return this;
        }
        self.dispose(from, Disposition::Conditional(edge))
    }

    fn dispose(mut self, from: String, disposition: Disposition) -> Self {
        if self.dispositions.contains_key(&from) {
            self.problems
                .push(format!("step '{}' has more than one outgoing disposition", from));
        } else {
            self.dispositions.insert(from, disposition);
        }
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Every step reachable from the entry must have exactly one outgoing
    /// disposition, and every edge must name registered steps.
    pub fn build(self) -> Result<Graph> {
        if let Some(problem) = self.problems.first() {
            return Err(DroverError::InvalidGraph(problem.clone()));
        }

        let entry = self
            .entry
            .ok_or_else(|| DroverError::InvalidGraph("no entry step set".into()))?;
        if !self.steps.contains_key(&entry) {
            return Err(DroverError::StepNotFound(entry));
        }

        for (from, disposition) in &self.dispositions {
            if !self.steps.contains_key(from) {
                return Err(DroverError::InvalidGraph(format!(
                    "edge from unknown step '{}'",
                    from
                )));
            }
            for target in disposition.targets() {
                if let Target::Step(name) = target {
                    if !self.steps.contains_key(name) {
                        return Err(DroverError::InvalidGraph(format!(
                            "edge from '{}' to unknown step '{}'",
                            from, name
                        )));
                    }
                }
            }
        }

        let mut seen = HashSet::from([entry.clone()]);
        let mut queue = VecDeque::from([entry.clone()]);
        while let Some(current) = queue.pop_front() {
            let disposition = self.dispositions.get(&current).ok_or_else(|| {
                DroverError::InvalidGraph(format!("step '{}' has no outgoing edge", current))
            })?;
            for target in disposition.targets() {
                if let Target::Step(next) = target {
                    if seen.insert(next.clone()) {
                        queue.push_back(next.clone());
                    }
                }
            }
        }

        Ok(Graph {
            steps: self.steps,
            dispositions: self.dispositions,
            entry,
        })
    }
}

/// A validated, immutable graph definition.
pub struct Graph {
    steps: HashMap<String, Arc<dyn Step>>,
    dispositions: HashMap<String, Disposition>,
    entry: String,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("dispositions", &self.dispositions)
            .field("entry", &self.entry)
            .finish()
    }
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn step(&self, name: &str) -> Result<&Arc<dyn Step>> {
        self.steps
            .get(name)
            .ok_or_else(|| DroverError::StepNotFound(name.to_string()))
    }

    fn next(&self, current: &str, state: &PipelineState) -> Result<Target> {
        match self.dispositions.get(current) {
            Some(Disposition::Static(target)) => Ok(target.clone()),
            Some(Disposition::Conditional(edge)) => {
                let (label, target) = edge.resolve(current, state)?;
                debug!(step = %current, label = %label, next = %target, "Branch resolved");
                Ok(target)
            }
            None => Err(DroverError::InvalidGraph(format!(
                "step '{}' has no outgoing edge",
                current
            ))),
        }
    }
}

/// Runs a graph: one step at a time, merging each update into the state
/// and following the step's disposition until the terminal is reached.
///
/// The engine imposes no step limit unless one is set with
/// `with_step_limit`; bounding loops is the graph author's job.
pub struct GraphExecutor {
    graph: Arc<Graph>,
    step_limit: Option<usize>,
    name: String,
}

impl GraphExecutor {
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            step_limit: None,
            name: name.into(),
        }
    }

    /// Fail with `StepLimitExceeded` after this many step executions.
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run the graph from its entry step. Step errors are not caught.
    pub async fn run(&self, initial: PipelineState) -> Result<ExecutionResult> {
        let run_id = RunId::new();
        let start = Instant::now();
        let mut state = initial;
        let mut step_results = Vec::new();
        let mut current = self.graph.entry.clone();

        loop {
            if let Some(limit) = self.step_limit {
                if step_results.len() >= limit {
                    error!(graph = %self.name, run_id = %run_id, limit, "Graph step limit reached");
                    return Err(DroverError::StepLimitExceeded(limit));
                }
            }

            let step = self.graph.step(&current)?;
            info!(graph = %self.name, run_id = %run_id, step = %current, "Executing graph step");

            let step_start = Instant::now();
            let update: StateUpdate = match step.run(&state).await {
                Ok(update) => update,
                Err(e) => {
                    error!(
                        graph = %self.name,
                        run_id = %run_id,
                        step = %current,
                        error = %e,
                        "Graph step failed"
                    );
                    return Err(e);
                }
            };
            state.merge(update);

            let elapsed_ms = step_start.elapsed().as_millis() as u64;
            debug!(graph = %self.name, step = %current, elapsed_ms, "Step execution complete");
            step_results.push(StepResult {
                step: current.clone(),
                elapsed_ms,
            });

            match self.graph.next(&current, &state)? {
                Target::Step(next) => current = next,
                Target::Terminal => break,
            }
        }

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            graph = %self.name,
            run_id = %run_id,
            steps = step_results.len(),
            total_elapsed_ms,
            "Graph run complete"
        );
        Ok(ExecutionResult {
            run_id,
            state,
            step_results,
            total_elapsed_ms,
        })
    }
}
