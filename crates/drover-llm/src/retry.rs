use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use drover_core::config::InvokeConfig;
use drover_core::error::{DroverError, Result};

use crate::repair;

/// Budget for one resilient call site.
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    /// Wall-clock limit for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt; 0 means exactly one attempt.
    pub max_retries: u32,
    /// Fixed pause between a failed attempt and the next one.
    pub retry_delay: Duration,
    /// Repair and parse the output as JSON; parse failures are retried.
    pub parse_structured: bool,
}

impl InvocationSpec {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            parse_structured: false,
        }
    }

    pub fn from_config(config: &InvokeConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            parse_structured: false,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn structured(mut self) -> Self {
        self.parse_structured = true;
        self
    }

    /// Worst-case latency of a call under this spec.
    pub fn worst_case(&self) -> Duration {
        (self.timeout + self.retry_delay) * (self.max_retries + 1)
    }
}

/// Output of a successful resilient call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Raw text returned by the successful attempt.
    pub raw: String,
    /// Parsed value, present when the spec asked for structured output.
    pub structured: Option<serde_json::Value>,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Wraps an external call with a per-attempt timeout and bounded retries.
///
/// Each attempt runs as its own spawned task, so at most one attempt is in
/// flight per invocation. An attempt that exceeds its timeout is aborted at
/// its next await point; work it has already handed to the OS (an in-flight
/// HTTP request, a blocking thread) may still run to completion.
#[derive(Debug, Clone)]
pub struct ResilientInvoker {
    target: String,
}

impl ResilientInvoker {
    /// `target` names the collaborator in log output (e.g. `"model"`).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub async fn invoke<F, Fut>(&self, spec: &InvocationSpec, mut call: F) -> Result<Invocation>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let total_attempts = spec.max_retries + 1;
        let mut last_err = None;

        for attempt in 1..=total_attempts {
            debug!(
                target_name = %self.target,
                attempt,
                total_attempts,
                timeout_ms = spec.timeout.as_millis() as u64,
                "Starting attempt"
            );

            match self.attempt(spec, call()).await {
                Ok((raw, structured)) => {
                    info!(
                        target_name = %self.target,
                        attempts = attempt,
                        "Invocation succeeded"
                    );
                    return Ok(Invocation {
                        raw,
                        structured,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!(
                        target_name = %self.target,
                        attempt,
                        total_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < total_attempts && !spec.retry_delay.is_zero() {
                        tokio::time::sleep(spec.retry_delay).await;
                    }
                }
            }
        }

        error!(
            target_name = %self.target,
            attempts = total_attempts,
            "Retries exhausted"
        );
        Err(DroverError::RetryExhausted {
            attempts: total_attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| DroverError::InvokeFailure("no attempt made".into())),
            ),
        })
    }

    async fn attempt<Fut>(
        &self,
        spec: &InvocationSpec,
        fut: Fut,
    ) -> Result<(String, Option<serde_json::Value>)>
    where
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let mut handle = tokio::spawn(fut);

        let raw = match tokio::time::timeout(spec.timeout, &mut handle).await {
            Ok(Ok(Ok(raw))) => raw,
            Ok(Ok(Err(e))) if e.is_retryable() => return Err(e),
            Ok(Ok(Err(e))) => return Err(DroverError::InvokeFailure(e.to_string())),
            Ok(Err(join_err)) => {
                return Err(DroverError::InvokeFailure(format!(
                    "attempt task failed: {}",
                    join_err
                )))
            }
            Err(_) => {
                handle.abort();
                let timeout_ms = spec.timeout.as_millis() as u64;
                warn!(target_name = %self.target, timeout_ms, "Attempt timed out");
                return Err(DroverError::InvokeTimeout { timeout_ms });
            }
        };

        if !spec.parse_structured {
            return Ok((raw, None));
        }

        let value = repair::parse_structured(&raw)?;
        Ok((raw, Some(value)))
    }
}

impl Default for ResilientInvoker {
    fn default() -> Self {
        Self::new("call")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_timing_out_uses_every_attempt() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(1)).with_retries(2);
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("late".to_string())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(DroverError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, DroverError::InvokeTimeout { timeout_ms: 1000 }));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_once_then_succeed() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(5)).with_retries(1);
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DroverError::InvokeFailure("connection reset".into()))
                    } else {
                        Ok("hello".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.raw, "hello");
        assert_eq!(result.attempts, 2);
        assert!(result.structured.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt_on_slow_call() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(1));
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok("too slow".to_string())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(DroverError::RetryExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_callable_error_still_retried() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(1)).with_retries(1);
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>(DroverError::Config("bad key".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(DroverError::RetryExhausted { source, .. }) => {
                assert!(matches!(*source, DroverError::InvokeFailure(ref m) if m.contains("bad key")));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_failure_shares_retry_budget() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(1))
            .with_retries(2)
            .structured();
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok("I cannot answer that".to_string())
                    } else {
                        Ok("```json\n{'isEnd': True, 'action': 'none',}\n```".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        let value = result.structured.unwrap();
        assert_eq!(value["isEnd"], serde_json::json!(true));
        assert_eq!(value["action"], serde_json::json!("none"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_output_exhausts_as_parse_error() {
        let spec = InvocationSpec::new(Duration::from_secs(1))
            .with_retries(1)
            .structured();
        let invoker = ResilientInvoker::new("test");

        let result = invoker
            .invoke(&spec, || async { Ok("no structure here".to_string()) })
            .await;

        match result {
            Err(DroverError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, DroverError::Parse(_)));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_between_attempts() {
        let spec = InvocationSpec::new(Duration::from_secs(1))
            .with_retries(2)
            .with_delay(Duration::from_secs(5));
        let invoker = ResilientInvoker::new("test");

        let start = tokio::time::Instant::now();
        let result = invoker
            .invoke(&spec, || async {
                Err::<String, _>(DroverError::InvokeFailure("down".into()))
            })
            .await;
        let elapsed = start.elapsed();

        assert!(result.is_err());
        // Two pauses, none after the final attempt.
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let spec = InvocationSpec::new(Duration::from_secs(1));
        let invoker = ResilientInvoker::new("test");

        let f = finished.clone();
        let result = invoker
            .invoke(&spec, move || {
                let f = f.clone();
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    f.store(true, Ordering::SeqCst);
                    Ok("done".to_string())
                }
            })
            .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_attempt_counts_as_failure() {
        let calls = counter();
        let spec = InvocationSpec::new(Duration::from_secs(1)).with_retries(1);
        let invoker = ResilientInvoker::new("test");

        let c = calls.clone();
        let result = invoker
            .invoke(&spec, move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("provider client bug");
                    }
                    Ok("recovered".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(result.raw, "recovered");
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn test_worst_case_latency() {
        let spec = InvocationSpec::new(Duration::from_secs(2))
            .with_retries(2)
            .with_delay(Duration::from_secs(1));
        assert_eq!(spec.worst_case(), Duration::from_secs(9));
    }

    #[test]
    fn test_spec_from_config() {
        let spec = InvocationSpec::from_config(&InvokeConfig::default());
        assert_eq!(spec.timeout, Duration::from_secs(300));
        assert_eq!(spec.max_retries, 2);
        assert!(!spec.parse_structured);
    }
}
