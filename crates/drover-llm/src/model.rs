use std::sync::Arc;

use serde::de::DeserializeOwned;

use drover_core::config::InvokeConfig;
use drover_core::error::{DroverError, Result};
use drover_core::traits::Caller;

use crate::retry::{Invocation, InvocationSpec, ResilientInvoker};

/// A model `Caller` bundled with its default invocation budget.
///
/// Pipeline steps call the model only through this type, so every model
/// call is bounded by a timeout and the shared retry policy.
#[derive(Clone)]
pub struct ModelInvoker {
    caller: Arc<dyn Caller>,
    invoker: ResilientInvoker,
    spec: InvocationSpec,
}

impl ModelInvoker {
    pub fn new(caller: Arc<dyn Caller>, spec: InvocationSpec) -> Self {
        Self {
            caller,
            invoker: ResilientInvoker::new("model"),
            spec,
        }
    }

    pub fn from_config(caller: Arc<dyn Caller>, config: &InvokeConfig) -> Self {
        Self::new(caller, InvocationSpec::from_config(config))
    }

    pub fn spec(&self) -> &InvocationSpec {
        &self.spec
    }

    /// Call the model under an explicit spec.
    pub async fn invoke_with(&self, prompt: &str, spec: &InvocationSpec) -> Result<Invocation> {
        let caller = Arc::clone(&self.caller);
        let prompt = prompt.to_string();
        self.invoker
            .invoke(spec, move || {
                let caller = Arc::clone(&caller);
                let prompt = prompt.clone();
                async move { caller.call(prompt).await }
            })
            .await
    }

    /// Call the model and return its raw text.
    pub async fn invoke_text(&self, prompt: &str) -> Result<String> {
        Ok(self.invoke_with(prompt, &self.spec).await?.raw)
    }

    /// Call the model and return its output repaired and parsed as JSON.
    pub async fn invoke_json(&self, prompt: &str) -> Result<serde_json::Value> {
        let spec = self.spec.clone().structured();
        self.invoke_with(prompt, &spec)
            .await?
            .structured
            .ok_or_else(|| DroverError::Parse("structured output missing".into()))
    }

    /// Call the model and deserialize its structured output into `T`.
    ///
    /// A reply that parses as JSON but has the wrong shape fails with
    /// `Parse` without being retried.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        prompt: &str,
    ) -> Result<(T, serde_json::Value)> {
        let value = self.invoke_json(prompt).await?;
        let typed = serde_json::from_value(value.clone())
            .map_err(|e| DroverError::Parse(format!("unexpected reply shape: {}", e)))?;
        Ok((typed, value))
    }
}
