use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use drover_core::error::{DroverError, Result};

use super::state::PipelineState;

/// Where control goes after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(String),
    Terminal,
}

impl Target {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step(name.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(name) => write!(f, "{}", name),
            Self::Terminal => write!(f, "<terminal>"),
        }
    }
}

/// Pure function of the post-merge state selecting a branch label.
pub type BranchFn = Arc<dyn Fn(&PipelineState) -> String + Send + Sync>;

/// A branch function plus its label → target table.
#[derive(Clone)]
pub struct ConditionalEdge {
    branch: BranchFn,
    targets: BTreeMap<String, Target>,
}

impl ConditionalEdge {
    pub fn new<F, L>(branch: F, targets: impl IntoIterator<Item = (L, Target)>) -> Self
    where
        F: Fn(&PipelineState) -> L + Send + Sync + 'static,
        L: Into<String>,
    {
        Self {
            branch: Arc::new(move |state| branch(state).into()),
            targets: targets.into_iter().map(|(l, t)| (l.into(), t)).collect(),
        }
    }

    /// Evaluate the branch function and look its label up.
    pub fn resolve(&self, from: &str, state: &PipelineState) -> Result<(String, Target)> {
        let label = (self.branch)(state);
        match self.targets.get(&label) {
            Some(target) => Ok((label, target.clone())),
            None => Err(DroverError::BranchNotMapped {
                step: from.to_string(),
                label,
            }),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// The single outgoing disposition of a step.
#[derive(Debug, Clone)]
pub enum Disposition {
    Static(Target),
    Conditional(ConditionalEdge),
}

impl Disposition {
    /// Every target this disposition can lead to.
    pub fn targets(&self) -> Vec<&Target> {
        match self {
            Self::Static(target) => vec![target],
            Self::Conditional(edge) => edge.targets().collect(),
        }
    }
}
