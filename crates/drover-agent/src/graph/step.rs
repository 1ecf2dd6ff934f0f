use futures::future::BoxFuture;

use drover_core::error::Result;

use super::state::{PipelineState, StateUpdate};

/// A named unit of work in a graph.
///
/// A step reads the shared state and returns the fields it wants to change;
/// the executor does the merge.
pub trait Step: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>>;
}

/// Wraps a synchronous function as a step.
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&PipelineState) -> Result<StateUpdate> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Step for FnStep<F>
where
    F: Fn(&PipelineState) -> Result<StateUpdate> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        let result = (self.f)(state);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_step() {
        let step = FnStep::new("greet", |state: &PipelineState| {
            let name = state.require_str("name")?;
            Ok(StateUpdate::new().set("greeting", format!("hello {}", name)))
        });
        assert_eq!(step.name(), "greet");

        let mut state = PipelineState::new();
        state.set_str("name", "driver");
        let update = step.run(&state).await.unwrap();
        assert_eq!(update.get("greeting"), Some(&serde_json::json!("hello driver")));

        assert!(step.run(&PipelineState::new()).await.is_err());
    }
}
