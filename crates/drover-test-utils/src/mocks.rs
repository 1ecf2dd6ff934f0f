use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use drover_core::error::{DroverError, Result};
use drover_core::traits::{Caller, EmbeddingProvider, RecordStore, SemanticRetriever, Tool, WordSource};
use drover_core::types::{PipelineRecord, UserType};

/// One scripted reply from a `ScriptedCaller`.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Answer only after the given delay (use with a paused tokio clock).
    Slow(Duration, String),
}

/// A `Caller` that replays a fixed script of replies in order and records
/// every prompt it receives.
///
/// Once the script runs out every further call fails with `InvokeFailure`.
#[derive(Debug, Default)]
pub struct ScriptedCaller {
    script: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedCaller {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_replies(replies.into_iter().map(|r| Reply::Text(r.into())))
    }

    pub fn from_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl Caller for ScriptedCaller {
    fn call(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt);
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Fail(msg)) => Err(DroverError::InvokeFailure(msg)),
                Some(Reply::Slow(delay, text)) => {
                    tokio::time::sleep(delay).await;
                    Ok(text)
                }
                None => Err(DroverError::InvokeFailure("script exhausted".into())),
            }
        })
    }
}

/// Record store that keeps everything in memory, optionally failing every save.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<PipelineRecord>>,
    fail: bool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<PipelineRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().unwrap().iter().map(|r| r.kind()).collect()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn save(&self, record: PipelineRecord) -> BoxFuture<'_, Result<i64>> {
        Box::pin(async move {
            if self.fail {
                return Err(DroverError::Database("store unavailable".into()));
            }
            let mut records = self.records.lock().unwrap();
            records.push(record);
            Ok(records.len() as i64)
        })
    }
}

/// Fixed forbidden-word list, or a source that always fails.
#[derive(Debug, Clone, Default)]
pub struct StaticWords {
    words: Option<Vec<String>>,
}

impl StaticWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: Some(words.into_iter().map(Into::into).collect()),
        }
    }

    pub fn failing() -> Self {
        Self { words: None }
    }
}

impl WordSource for StaticWords {
    fn list_words(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            self.words
                .clone()
                .ok_or_else(|| DroverError::Database("word table unavailable".into()))
        })
    }
}

/// Embedder returning the same vector for every input text.
#[derive(Debug, Clone)]
pub struct FixedEmbedder {
    vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }
}

impl EmbeddingProvider for FixedEmbedder {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let n = texts.len();
        Box::pin(async move { Ok(vec![self.vector.clone(); n]) })
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }
}

/// Retriever returning a preset neighbour list, truncated to `k`.
#[derive(Debug, Clone, Default)]
pub struct FixedRetriever {
    labels: Vec<String>,
    queries: Arc<AtomicUsize>,
}

impl FixedRetriever {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SemanticRetriever for FixedRetriever {
    fn top_k(
        &self,
        _query_embedding: &[f32],
        _user_type: UserType,
        k: usize,
    ) -> BoxFuture<'_, Result<Vec<String>>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let labels: Vec<String> = self.labels.iter().take(k).cloned().collect();
        Box::pin(async move { Ok(labels) })
    }
}

/// Tool that echoes its params back, or fails when built with `failing`.
#[derive(Debug, Clone)]
pub struct StubTool {
    name: String,
    params: Vec<&'static str>,
    intents: Vec<&'static str>,
    output: Option<String>,
    fail: bool,
}

impl StubTool {
    pub fn new(name: &str, params: &[&'static str]) -> Self {
        Self {
            name: name.to_string(),
            params: params.to_vec(),
            intents: Vec::new(),
            output: None,
            fail: false,
        }
    }

    /// Return this fixed output instead of echoing the params.
    pub fn returning(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    pub fn for_intents(mut self, intents: &[&'static str]) -> Self {
        self.intents = intents.to_vec();
        self
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, &[])
        }
    }
}

impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Test tool"
    }

    fn required_params(&self) -> &[&str] {
        &self.params
    }

    fn intents(&self) -> &[&str] {
        &self.intents
    }

    fn execute(
        &self,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if self.fail {
                return Err(DroverError::ToolExecution {
                    tool: self.name.clone(),
                    message: "stub failure".into(),
                });
            }
            match &self.output {
                Some(out) => Ok(out.clone()),
                None => Ok(serde_json::Value::Object(params).to_string()),
            }
        })
    }
}
