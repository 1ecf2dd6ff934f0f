use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use drover_core::config::IntentConfig;
use drover_core::error::{DroverError, Result};
use drover_core::traits::{EmbeddingProvider, RecordStore, SemanticRetriever};
use drover_core::types::{HistoryEntry, IntentRecord, PipelineRecord, UserType};
use drover_llm::ModelInvoker;

use super::{record_exchange, save_record, HISTORY};
use crate::graph::{
    FnStep, GraphBuilder, GraphExecutor, PipelineState, StateUpdate, Step, Target,
};
use crate::prompts;

const USER_QUERY: &str = "user_query";
const USER_TYPE: &str = "user_type";
const CLEANED_DIALOG: &str = "cleaned_dialog";
const QUERY_CONTENT: &str = "query_content";
const INTENT_SHARES: &str = "intent_shares";
const TOP_INTENT: &str = "top_intent";
const IS_INTENT_CLEAR: &str = "is_intent_clear";
const OUTPUT: &str = "output";

const CLEAN: &str = "clean";
const EXTRACT_FEATURES: &str = "extract_features";
const RETRIEVE_AND_SCORE: &str = "retrieve_and_score";
const INTENT_CLEAR: &str = "intent_clear";
const INTENT_UNCLEAR: &str = "intent_unclear";

/// Share of the retrieved neighbours carrying one intent label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentShare {
    pub intent: String,
    pub share: f64,
}

/// Result of one intent-recognition run.
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub is_intent_clear: bool,
    /// The intent label when clear, otherwise a clarifying question.
    pub output: String,
    pub cleaned_input: String,
    pub shares: Vec<IntentShare>,
    pub history: Vec<HistoryEntry>,
    pub record_id: Option<i64>,
}

/// clean → extract features → retrieve and score → (clear | unclear).
pub struct IntentPipeline {
    executor: GraphExecutor,
    store: Arc<dyn RecordStore>,
}

impl IntentPipeline {
    pub fn new(
        model: ModelInvoker,
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Arc<dyn SemanticRetriever>,
        store: Arc<dyn RecordStore>,
        config: &IntentConfig,
    ) -> Result<Self> {
        let graph = GraphBuilder::new()
            .add_step(CleanStep {
                model: model.clone(),
            })
            .add_step(ExtractFeaturesStep {
                model: model.clone(),
            })
            .add_step(RetrieveAndScoreStep {
                embedder,
                retriever,
                top_k: config.top_k,
                threshold: config.clarity_threshold,
            })
            .add_step(FnStep::new(INTENT_CLEAR, |state: &PipelineState| {
                Ok(StateUpdate::new().set(OUTPUT, state.require_str(TOP_INTENT)?))
            }))
            .add_step(ClarifyStep { model })
            .set_entry(CLEAN)
            .add_edge(CLEAN, Target::step(EXTRACT_FEATURES))
            .add_edge(EXTRACT_FEATURES, Target::step(RETRIEVE_AND_SCORE))
            .add_conditional_edges(
                RETRIEVE_AND_SCORE,
                |state: &PipelineState| {
                    if state.get_bool(IS_INTENT_CLEAR).unwrap_or(false) {
                        "clear"
                    } else {
                        "unclear"
                    }
                },
                [
                    ("clear", Target::step(INTENT_CLEAR)),
                    ("unclear", Target::step(INTENT_UNCLEAR)),
                ],
            )
            .add_edge(INTENT_CLEAR, Target::Terminal)
            .add_edge(INTENT_UNCLEAR, Target::Terminal)
            .build()?;

        Ok(Self {
            executor: GraphExecutor::new("intent", graph),
            store,
        })
    }

    pub async fn run(
        &self,
        user_id: &str,
        user_type: UserType,
        user_input: &str,
    ) -> Result<IntentOutcome> {
        let mut initial = PipelineState::new();
        initial.set_str(USER_QUERY, user_input);
        initial.set(USER_TYPE, serde_json::to_value(user_type)?);
        initial.set(HISTORY, json!([]));

        let result = self.executor.run(initial).await?;
        let state = result.state;

        let outcome = IntentOutcome {
            is_intent_clear: state.require_bool(IS_INTENT_CLEAR)?,
            output: state.require_str(OUTPUT)?.to_string(),
            cleaned_input: state.require_str(CLEANED_DIALOG)?.to_string(),
            shares: state.list_as(INTENT_SHARES)?,
            history: state.list_as(HISTORY)?,
            record_id: None,
        };

        let record_id = save_record(
            self.store.as_ref(),
            PipelineRecord::Intent(IntentRecord {
                user_id: user_id.to_string(),
                user_input: user_input.to_string(),
                cleaned_input: outcome.cleaned_input.clone(),
                success_finish: true,
                is_intent_clear: outcome.is_intent_clear,
                output: outcome.output.clone(),
                history: outcome.history.clone(),
                created_at: Utc::now(),
            }),
        )
        .await;

        info!(
            user_id,
            user_type = user_type.as_str(),
            is_intent_clear = outcome.is_intent_clear,
            elapsed_ms = result.total_elapsed_ms,
            "Intent recognition complete"
        );
        Ok(IntentOutcome {
            record_id,
            ..outcome
        })
    }
}

/// Frequency share of each label of `user_type` among `neighbours`,
/// dividing by `k` and keeping the label set's order.
pub fn tally(neighbours: &[String], user_type: UserType, k: usize) -> Vec<IntentShare> {
    let labels = user_type.intent_labels();
    let mut counts = vec![0usize; labels.len()];

    for label in neighbours {
        match labels.iter().position(|l| *l == label.as_str()) {
            Some(i) => counts[i] += 1,
            None => warn!(label = %label, user_type = user_type.as_str(), "Ignoring unknown intent label"),
        }
    }

    labels
        .iter()
        .zip(counts)
        .map(|(label, count)| IntentShare {
            intent: label.to_string(),
            share: if k == 0 { 0.0 } else { count as f64 / k as f64 },
        })
        .collect()
}

/// First label with the highest share.
fn top_share(shares: &[IntentShare]) -> Option<&IntentShare> {
    shares.iter().fold(None, |best: Option<&IntentShare>, s| match best {
        Some(b) if b.share >= s.share => Some(b),
        _ => Some(s),
    })
}

#[derive(Deserialize)]
struct CleanReply {
    #[serde(rename = "cleanDialog")]
    clean_dialog: String,
}

struct CleanStep {
    model: ModelInvoker,
}

impl Step for CleanStep {
    fn name(&self) -> &str {
        CLEAN
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let prompt = prompts::pre_cleaning(state.require_str(USER_QUERY)?);
            let (reply, raw): (CleanReply, Value) = self.model.invoke_as(&prompt).await?;
            record_exchange(
                StateUpdate::new().set(CLEANED_DIALOG, reply.clean_dialog),
                HistoryEntry::system(prompt),
                &raw,
            )
        })
    }
}

#[derive(Deserialize)]
struct QueryReply {
    #[serde(rename = "queryContent")]
    query_content: String,
}

struct ExtractFeaturesStep {
    model: ModelInvoker,
}

impl Step for ExtractFeaturesStep {
    fn name(&self) -> &str {
        EXTRACT_FEATURES
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let prompt = prompts::feature_extraction(state.require_str(CLEANED_DIALOG)?);
            let (reply, raw): (QueryReply, Value) = self.model.invoke_as(&prompt).await?;
            record_exchange(
                StateUpdate::new().set(QUERY_CONTENT, reply.query_content),
                HistoryEntry::system(prompt),
                &raw,
            )
        })
    }
}

/// Embeds the query, fetches the top-K labelled neighbours and decides
/// whether one intent dominates.
struct RetrieveAndScoreStep {
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Arc<dyn SemanticRetriever>,
    top_k: usize,
    threshold: f64,
}

impl Step for RetrieveAndScoreStep {
    fn name(&self) -> &str {
        RETRIEVE_AND_SCORE
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let query = state.require_str(QUERY_CONTENT)?.to_string();
            let user_type: UserType = state.require_as(USER_TYPE)?;

            let embedding = self
                .embedder
                .embed(&[query])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| DroverError::Embedding("no vector returned".into()))?;
            let neighbours = self
                .retriever
                .top_k(&embedding, user_type, self.top_k)
                .await?;

            let shares = tally(&neighbours, user_type, self.top_k);
            let (top_intent, top) = top_share(&shares)
                .map(|s| (s.intent.clone(), s.share))
                .unwrap_or_default();
            let is_clear = top > self.threshold;
            debug!(
                neighbours = neighbours.len(),
                top_intent = %top_intent,
                top_share = top,
                is_clear,
                "Intent shares computed"
            );

            Ok(StateUpdate::new()
                .set(INTENT_SHARES, serde_json::to_value(&shares)?)
                .set(TOP_INTENT, top_intent)
                .set(IS_INTENT_CLEAR, is_clear))
        })
    }
}

struct ClarifyStep {
    model: ModelInvoker,
}

impl Step for ClarifyStep {
    fn name(&self) -> &str {
        INTENT_UNCLEAR
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let shares: Vec<IntentShare> = state.list_as(INTENT_SHARES)?;
            let shares_text = shares
                .iter()
                .map(|s| format!("- {}: {:.0}%", s.intent, s.share * 100.0))
                .collect::<Vec<_>>()
                .join("\n");

            let prompt =
                prompts::clarifying_question(state.require_str(CLEANED_DIALOG)?, &shares_text);
            let (reply, raw): (QueryReply, Value) = self.model.invoke_as(&prompt).await?;
            record_exchange(
                StateUpdate::new().set(OUTPUT, reply.query_content),
                HistoryEntry::system(prompt),
                &raw,
            )
        })
    }
}
