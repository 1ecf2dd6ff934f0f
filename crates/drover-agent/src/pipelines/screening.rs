use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use drover_core::error::Result;
use drover_core::matcher::PatternMatcher;
use drover_core::traits::{RecordStore, WordSource};
use drover_core::types::{HistoryEntry, PipelineRecord, ScreeningRecord};
use drover_llm::ModelInvoker;

use super::{record_exchange, save_record, HISTORY};
use crate::graph::{GraphBuilder, GraphExecutor, PipelineState, StateUpdate, Step, Target};
use crate::prompts;

const USER_QUERY: &str = "user_query";
const IS_PASSED: &str = "is_passed";
const REASON: &str = "reason";

const WORD_CHECK: &str = "word_check";
const SEMANTIC_CHECK: &str = "semantic_check";

/// Verdict of one screening run.
#[derive(Debug, Clone)]
pub struct ScreeningOutcome {
    pub is_passed: bool,
    pub reason: String,
    pub history: Vec<HistoryEntry>,
    pub record_id: Option<i64>,
}

/// Forbidden-word scan followed, if clean, by a model safety check.
pub struct ScreeningPipeline {
    executor: GraphExecutor,
    store: Arc<dyn RecordStore>,
}

impl ScreeningPipeline {
    pub fn new(
        model: ModelInvoker,
        words: Arc<dyn WordSource>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let graph = GraphBuilder::new()
            .add_step(WordCheckStep { words })
            .add_step(SemanticCheckStep { model })
            .set_entry(WORD_CHECK)
            .add_conditional_edges(
                WORD_CHECK,
                |state: &PipelineState| {
                    if state.get_bool(IS_PASSED).unwrap_or(false) {
                        "pass"
                    } else {
                        "reject"
                    }
                },
                [
                    ("pass", Target::step(SEMANTIC_CHECK)),
                    ("reject", Target::Terminal),
                ],
            )
            .add_edge(SEMANTIC_CHECK, Target::Terminal)
            .build()?;

        Ok(Self {
            executor: GraphExecutor::new("screening", graph),
            store,
        })
    }

    pub async fn run(&self, user_id: &str, user_input: &str) -> Result<ScreeningOutcome> {
        let mut initial = PipelineState::new();
        initial.set_str(USER_QUERY, user_input);
        initial.set(IS_PASSED, json!(true));
        initial.set_str(REASON, "");
        initial.set(HISTORY, json!([]));

        let result = self.executor.run(initial).await?;
        let state = result.state;

        let is_passed = state.require_bool(IS_PASSED)?;
        let reason = state.require_str(REASON)?.to_string();
        let history: Vec<HistoryEntry> = state.list_as(HISTORY)?;

        let record_id = save_record(
            self.store.as_ref(),
            PipelineRecord::Screening(ScreeningRecord {
                user_id: user_id.to_string(),
                user_input: user_input.to_string(),
                is_passed,
                reason: reason.clone(),
                history: history.clone(),
                created_at: Utc::now(),
            }),
        )
        .await;

        info!(
            user_id,
            is_passed,
            elapsed_ms = result.total_elapsed_ms,
            "Input screening complete"
        );
        Ok(ScreeningOutcome {
            is_passed,
            reason,
            history,
            record_id,
        })
    }
}

/// Scans the input for forbidden words loaded fresh for each run.
struct WordCheckStep {
    words: Arc<dyn WordSource>,
}

impl Step for WordCheckStep {
    fn name(&self) -> &str {
        WORD_CHECK
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let query = state.require_str(USER_QUERY)?;

            // An unavailable word list degrades to an empty automaton.
            let words = match self.words.list_words().await {
                Ok(words) => words,
                Err(e) => {
                    error!(error = %e, "Failed to load forbidden words");
                    Vec::new()
                }
            };
            let matcher = PatternMatcher::from_words(&words);
            let matched = matcher.find_matches(query)?;

            if matched.is_empty() {
                return StateUpdate::new().set(IS_PASSED, true).append_ser(
                    HISTORY,
                    &HistoryEntry::system("Forbidden word check passed."),
                );
            }

            let listed: Vec<&str> = matched.iter().map(String::as_str).collect();
            let reason = format!(
                "Input rejected: contains forbidden words [{}].",
                listed.join(", ")
            );
            info!(matched = matched.len(), "Forbidden words found in input");
            StateUpdate::new()
                .set(IS_PASSED, false)
                .set(REASON, reason.clone())
                .append_ser(HISTORY, &HistoryEntry::system(reason))
        })
    }
}

#[derive(Deserialize)]
struct SafetyReply {
    #[serde(rename = "detectionAns")]
    is_safe: bool,
    #[serde(default)]
    reason: String,
}

/// One model call deciding whether the input is safe to answer.
struct SemanticCheckStep {
    model: ModelInvoker,
}

impl Step for SemanticCheckStep {
    fn name(&self) -> &str {
        SEMANTIC_CHECK
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let prompt = prompts::semantic_screening(state.require_str(USER_QUERY)?);
            let (reply, raw): (SafetyReply, Value) = self.model.invoke_as(&prompt).await?;

            let update = StateUpdate::new()
                .set(IS_PASSED, reply.is_safe)
                .set(REASON, reply.reason);
            record_exchange(update, HistoryEntry::system(prompt), &raw)
        })
    }
}
