use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use drover_core::error::Result;
use drover_core::traits::RecordStore;
use drover_core::types::{DecisionRecord, HistoryEntry, PipelineRecord};
use drover_llm::ModelInvoker;
use drover_tools::ToolRegistry;

use super::{record_exchange, save_record, HISTORY};
use crate::graph::{GraphBuilder, GraphExecutor, PipelineState, StateUpdate, Step, Target};
use crate::prompts;

const USER_QUERY: &str = "user_query";
const INTENT: &str = "intent";
const CHAT_HISTORY: &str = "chat_history";
const USER_INFO: &str = "user_info";
const THOUGHT: &str = "thought";
const ACTION: &str = "action";
const OBSERVATION: &str = "observation";
const IS_END: &str = "is_end";
const ITERATIONS: &str = "iterations";
const FINAL_ANSWER: &str = "final_answer";

const THINK: &str = "think";
const TOOL_USE: &str = "tool_use";
const FINISH: &str = "finish";

/// Input to one decision run.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub user_id: String,
    /// Cleaned user dialogue.
    pub user_query: String,
    pub intent: String,
    pub chat_history: String,
    /// Facts about the user that tool parameters may be filled from.
    pub user_info: Value,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub final_answer: String,
    pub observations: Vec<String>,
    /// Number of think steps taken.
    pub iterations: usize,
    pub history: Vec<HistoryEntry>,
    pub record_id: Option<i64>,
}

/// ReAct loop: think → tool_use → think … → finish.
///
/// The loop leaves for `finish` once the model sets `isEnd`, or when
/// `max_iterations` think steps have run.
pub struct DecisionPipeline {
    executor: GraphExecutor,
    store: Arc<dyn RecordStore>,
}

impl DecisionPipeline {
    pub fn new(
        model: ModelInvoker,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn RecordStore>,
        max_iterations: usize,
    ) -> Result<Self> {
        let max_iterations = max_iterations.max(1);
        let graph = GraphBuilder::new()
            .add_step(ThinkStep {
                model: model.clone(),
                max_iterations,
            })
            .add_step(ToolUseStep {
                model: model.clone(),
                tools,
            })
            .add_step(FinishStep { model })
            .set_entry(THINK)
            .add_conditional_edges(
                THINK,
                move |state: &PipelineState| {
                    let is_end = state.get_bool(IS_END).unwrap_or(false);
                    if is_end || iterations(state) >= max_iterations {
                        "finish"
                    } else {
                        "tool"
                    }
                },
                [
                    ("finish", Target::step(FINISH)),
                    ("tool", Target::step(TOOL_USE)),
                ],
            )
            .add_edge(TOOL_USE, Target::step(THINK))
            .add_edge(FINISH, Target::Terminal)
            .build()?;

        Ok(Self {
            executor: GraphExecutor::new("decision", graph),
            store,
        })
    }

    pub async fn run(&self, request: DecisionRequest) -> Result<DecisionOutcome> {
        let mut initial = PipelineState::new();
        initial.set_str(USER_QUERY, request.user_query.as_str());
        initial.set_str(INTENT, request.intent.as_str());
        initial.set_str(CHAT_HISTORY, request.chat_history.as_str());
        initial.set(USER_INFO, request.user_info.clone());
        initial.set(ITERATIONS, json!(0));
        initial.set(HISTORY, json!([]));

        let result = self.executor.run(initial).await?;
        let state = result.state;

        let final_answer = state.require_str(FINAL_ANSWER)?.to_string();
        let observations = state.string_list(OBSERVATION);
        let history: Vec<HistoryEntry> = state.list_as(HISTORY)?;

        let record_id = save_record(
            self.store.as_ref(),
            PipelineRecord::Decision(DecisionRecord {
                user_id: request.user_id.clone(),
                user_input: request.user_query.clone(),
                observations: observations.clone(),
                final_answer: final_answer.clone(),
                history: history.clone(),
                created_at: Utc::now(),
            }),
        )
        .await;

        let iterations = iterations(&state);
        info!(
            user_id = %request.user_id,
            intent = %request.intent,
            iterations,
            tool_calls = observations.len(),
            elapsed_ms = result.total_elapsed_ms,
            "Decision complete"
        );
        Ok(DecisionOutcome {
            final_answer,
            observations,
            iterations,
            history,
            record_id,
        })
    }
}

fn iterations(state: &PipelineState) -> usize {
    state.get(ITERATIONS).and_then(Value::as_u64).unwrap_or(0) as usize
}

fn last(state: &PipelineState, key: &str) -> String {
    state.string_list(key).pop().unwrap_or_default()
}

/// Observations rendered as a JSON array for prompts.
fn observations_text(state: &PipelineState) -> String {
    Value::Array(state.get_list(OBSERVATION).to_vec()).to_string()
}

#[derive(Deserialize)]
struct ThinkReply {
    #[serde(rename = "thoughtAns")]
    thought: String,
    #[serde(default)]
    action: String,
    #[serde(rename = "isEnd")]
    is_end: bool,
}

struct ThinkStep {
    model: ModelInvoker,
    max_iterations: usize,
}

impl Step for ThinkStep {
    fn name(&self) -> &str {
        THINK
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let prompt = prompts::thinking(
                state.get_str(CHAT_HISTORY).unwrap_or_default(),
                state.require_str(USER_QUERY)?,
                &observations_text(state),
            );
            let (reply, raw): (ThinkReply, Value) = self.model.invoke_as(&prompt).await?;

            let count = iterations(state) + 1;
            if !reply.is_end && count >= self.max_iterations {
                warn!(
                    max_iterations = self.max_iterations,
                    "Reasoning loop hit its iteration limit, finishing early"
                );
            }
            debug!(iteration = count, is_end = reply.is_end, "Thought produced");

            record_exchange(
                StateUpdate::new()
                    .append(THOUGHT, reply.thought)
                    .append(ACTION, reply.action)
                    .set(IS_END, reply.is_end)
                    .set(ITERATIONS, count),
                HistoryEntry::user(prompt),
                &raw,
            )
        })
    }
}

#[derive(Deserialize)]
struct ToolChoice {
    #[serde(rename = "toolName")]
    tool_name: String,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct ParamReply {
    #[serde(rename = "paraList", default)]
    params: Value,
}

struct ToolUseStep {
    model: ModelInvoker,
    tools: Arc<ToolRegistry>,
}

impl Step for ToolUseStep {
    fn name(&self) -> &str {
        TOOL_USE
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let thought = last(state, THOUGHT);
            let action = last(state, ACTION);
            let offered = self.tools.definitions_for_intent(state.require_str(INTENT)?);

            let selection_prompt = prompts::tool_selection(
                &offered,
                state.require_str(USER_QUERY)?,
                &thought,
                &action,
            );
            let (choice, raw): (ToolChoice, Value) =
                self.model.invoke_as(&selection_prompt).await?;
            let mut update =
                record_exchange(StateUpdate::new(), HistoryEntry::user(selection_prompt), &raw)?;

            let chosen = offered
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(choice.tool_name.trim()));
            let result = match chosen {
                Some(definition) => {
                    let user_info = state.get(USER_INFO).cloned().unwrap_or(Value::Null);
                    let param_prompt = prompts::param_selection(
                        &definition.description,
                        &definition.required_params,
                        &user_info.to_string(),
                    );
                    let (reply, raw): (ParamReply, Value) =
                        self.model.invoke_as(&param_prompt).await?;
                    update = record_exchange(update, HistoryEntry::user(param_prompt), &raw)?;

                    let params = match reply.params {
                        Value::Object(map) => map,
                        other => {
                            warn!(tool = %definition.name, params = %other, "paraList is not an object");
                            Map::new()
                        }
                    };
                    self.tools.call(&definition.name, params).await
                }
                None => {
                    warn!(tool = %choice.tool_name, "Model chose a tool that was not offered");
                    String::new()
                }
            };

            let observation = format!(
                "Thought: {}. Action: {}. Tool called: {}. Reason: {}. Result: {}",
                thought, action, choice.tool_name, choice.reason, result
            );
            Ok(update.append(OBSERVATION, observation))
        })
    }
}

#[derive(Deserialize)]
struct ToneReply {
    #[serde(rename = "outputTone")]
    tone: String,
}

#[derive(Deserialize)]
struct FinishReply {
    content: String,
}

struct FinishStep {
    model: ModelInvoker,
}

impl Step for FinishStep {
    fn name(&self) -> &str {
        FINISH
    }

    fn run<'a>(&'a self, state: &'a PipelineState) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let tone_prompt = prompts::tone_analysis(state.get_str(CHAT_HISTORY).unwrap_or_default());
            let (tone, raw): (ToneReply, Value) = self.model.invoke_as(&tone_prompt).await?;
            let update = record_exchange(StateUpdate::new(), HistoryEntry::user(tone_prompt), &raw)?;

            let finish_prompt = prompts::finish(&observations_text(state), &tone.tone);
            let (reply, raw): (FinishReply, Value) = self.model.invoke_as(&finish_prompt).await?;
            record_exchange(
                update.set(FINAL_ANSWER, reply.content),
                HistoryEntry::user(finish_prompt),
                &raw,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use drover_core::error::DroverError;
    use drover_llm::InvocationSpec;
    use drover_test_utils::{InMemoryRecordStore, ScriptedCaller, StubTool};

    const THINK_MORE: &str =
        r#"{"thoughtAns": "need the coupon list", "action": "look up unused coupons", "isEnd": false}"#;
    const THINK_DONE: &str = r#"{"thoughtAns": "have what I need", "action": "", "isEnd": true}"#;
    const TONE: &str = r#"{"outputTone": "brief and friendly"}"#;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            StubTool::new("unused_coupons", &["user_id", "page", "limit"])
                .returning(r#"[{"name": "5 off"}]"#)
                .for_intents(&["coupon inquiry"]),
        );
        registry.register(StubTool::new("driver_docs", &[]).for_intents(&["certification inquiry"]));
        Arc::new(registry)
    }

    fn pipeline(caller: Arc<ScriptedCaller>, max_iterations: usize) -> DecisionPipeline {
        let spec = InvocationSpec::new(Duration::from_secs(5)).with_retries(1);
        DecisionPipeline::new(
            ModelInvoker::new(caller, spec),
            registry(),
            Arc::new(InMemoryRecordStore::new()),
            max_iterations,
        )
        .unwrap()
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            user_id: "7".into(),
            user_query: "Which coupons can I still use?".into(),
            intent: "coupon inquiry".into(),
            chat_history: String::new(),
            user_info: json!({"user_id": "7"}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_think_tool_think_finish() {
        let caller = Arc::new(ScriptedCaller::new([
            THINK_MORE,
            r#"{"toolName": "unused_coupons", "reason": "lists coupons"}"#,
            r#"{"paraList": {"user_id": "7", "page": 1, "limit": 100}}"#,
            THINK_DONE,
            TONE,
            r#"{"content": "You have one unused coupon: 5 off."}"#,
        ]));
        let outcome = pipeline(caller.clone(), 8).run(request()).await.unwrap();

        assert_eq!(outcome.final_answer, "You have one unused coupon: 5 off.");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.observations.len(), 1);
        assert!(outcome.observations[0].contains("Tool called: unused_coupons"));
        assert!(outcome.observations[0].contains(r#"Result: [{"name": "5 off"}]"#));
        assert_eq!(outcome.history.len(), 12);
        assert_eq!(caller.remaining(), 0);

        let prompts = caller.prompts();
        // Only tools serving the intent are offered.
        assert!(prompts[1].contains("- unused_coupons"));
        assert!(!prompts[1].contains("driver_docs"));
        assert!(prompts[2].contains(r#"{"user_id":"7"}"#));
        assert!(prompts[3].contains("Tool called: unused_coupons"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_finish_skips_tools() {
        let caller = Arc::new(ScriptedCaller::new([
            THINK_DONE,
            TONE,
            r#"{"content": "Hello!"}"#,
        ]));
        let outcome = pipeline(caller, 8).run(request()).await.unwrap();
        assert_eq!(outcome.final_answer, "Hello!");
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.observations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_limit_forces_finish() {
        let caller = Arc::new(ScriptedCaller::new([
            THINK_MORE,
            r#"{"toolName": "nope", "reason": "guess"}"#,
            THINK_MORE,
            TONE,
            r#"{"content": "Sorry, I could not find that."}"#,
        ]));
        let outcome = pipeline(caller.clone(), 2).run(request()).await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.final_answer, "Sorry, I could not find that.");
        assert_eq!(caller.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unoffered_tool_yields_empty_result() {
        let caller = Arc::new(ScriptedCaller::new([
            THINK_MORE,
            r#"{"toolName": "driver_docs", "reason": "wrong intent"}"#,
            THINK_DONE,
            TONE,
            r#"{"content": "done"}"#,
        ]));
        let outcome = pipeline(caller, 8).run(request()).await.unwrap();
        assert!(outcome.observations[0].ends_with("Result: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_params_do_not_abort() {
        let caller = Arc::new(ScriptedCaller::new([
            THINK_MORE,
            r#"{"toolName": "Unused_Coupons ", "reason": "lists coupons"}"#,
            r#"{"paraList": {"user_id": "7"}}"#,
            THINK_DONE,
            TONE,
            r#"{"content": "done"}"#,
        ]));
        let outcome = pipeline(caller, 8).run(request()).await.unwrap();
        assert_eq!(outcome.observations.len(), 1);
        assert!(outcome.observations[0].ends_with("Result: "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_think_fails_run() {
        let caller = Arc::new(ScriptedCaller::new(["not json", "still not json"]));
        let err = pipeline(caller, 8).run(request()).await.unwrap_err();
        assert!(matches!(err, DroverError::RetryExhausted { attempts: 2, .. }));
    }
}
