//! Request orchestration: screening, then intent recognition, then either
//! the decision loop or a clarifying question.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use drover_core::config::AppConfig;
use drover_core::error::Result;
use drover_core::traits::{EmbeddingProvider, RecordStore, SemanticRetriever, WordSource};
use drover_core::types::UserType;
use drover_llm::ModelInvoker;
use drover_tools::ToolRegistry;

use crate::pipelines::{DecisionPipeline, DecisionRequest, IntentPipeline, ScreeningPipeline};

pub const CODE_OK: u16 = 200;
pub const CODE_FAILED: u16 = 201;

const EXECUTION_FAILED: &str = "Agent Execution Failed";
const UNAVAILABLE: &str = "agent unavailable";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub user_id: String,
    pub user_type: UserType,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub code: u16,
    pub message: String,
    pub data: String,
}

impl AgentResponse {
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            code: CODE_OK,
            message: String::new(),
            data: data.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: CODE_FAILED,
            message: message.into(),
            data: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Collaborators needed to assemble the three pipelines.
pub struct AgentDeps {
    pub model: ModelInvoker,
    pub words: Arc<dyn WordSource>,
    pub store: Arc<dyn RecordStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retriever: Arc<dyn SemanticRetriever>,
    pub tools: Arc<ToolRegistry>,
}

pub struct AgentService {
    screening: ScreeningPipeline,
    intent: IntentPipeline,
    decision: DecisionPipeline,
}

impl AgentService {
    pub fn new(
        screening: ScreeningPipeline,
        intent: IntentPipeline,
        decision: DecisionPipeline,
    ) -> Self {
        Self {
            screening,
            intent,
            decision,
        }
    }

    /// Build all three pipelines from one set of collaborators.
    pub fn from_config(deps: AgentDeps, config: &AppConfig) -> Result<Self> {
        let screening =
            ScreeningPipeline::new(deps.model.clone(), deps.words, deps.store.clone())?;
        let intent = IntentPipeline::new(
            deps.model.clone(),
            deps.embedder,
            deps.retriever,
            deps.store.clone(),
            &config.intent,
        )?;
        let decision = DecisionPipeline::new(
            deps.model,
            deps.tools,
            deps.store,
            config.decision.max_iterations,
        )?;
        Ok(Self::new(screening, intent, decision))
    }

    pub fn screening(&self) -> &ScreeningPipeline {
        &self.screening
    }

    pub fn intent(&self) -> &IntentPipeline {
        &self.intent
    }

    pub fn decision(&self) -> &DecisionPipeline {
        &self.decision
    }

    /// Answer one request. Pipeline errors never escape; they become a
    /// generic failure response.
    pub async fn handle(&self, request: AgentRequest) -> AgentResponse {
        match self.answer(&request).await {
            Ok(Answer::Rejected(reason)) => {
                info!(user_id = %request.user_id, "Request rejected by screening");
                AgentResponse::failed(reason)
            }
            Ok(Answer::Reply(text)) if !text.trim().is_empty() => AgentResponse::ok(text),
            Ok(Answer::Reply(_)) => {
                warn!(user_id = %request.user_id, "Agent produced an empty answer");
                AgentResponse::failed(EXECUTION_FAILED)
            }
            Err(e) => {
                error!(user_id = %request.user_id, error = %e, "Agent run failed");
                AgentResponse::failed(UNAVAILABLE)
            }
        }
    }

    async fn answer(&self, request: &AgentRequest) -> Result<Answer> {
        let screening = self.screening.run(&request.user_id, &request.query).await?;
        if !screening.is_passed {
            return Ok(Answer::Rejected(screening.reason));
        }

        let intent = self
            .intent
            .run(&request.user_id, request.user_type, &request.query)
            .await?;
        if !intent.is_intent_clear {
            return Ok(Answer::Reply(intent.output));
        }

        let decision = self
            .decision
            .run(DecisionRequest {
                user_id: request.user_id.clone(),
                user_query: intent.cleaned_input,
                intent: intent.output,
                chat_history: String::new(),
                user_info: json!({ "user_id": request.user_id }),
            })
            .await?;
        Ok(Answer::Reply(decision.final_answer))
    }
}

enum Answer {
    Rejected(String),
    Reply(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use drover_llm::InvocationSpec;
    use drover_test_utils::{
        test_config, FixedEmbedder, FixedRetriever, InMemoryRecordStore, ScriptedCaller, StaticWords,
        StubTool,
    };

    fn service(caller: Arc<ScriptedCaller>, neighbours: Vec<&str>) -> AgentService {
        let mut tools = ToolRegistry::new();
        tools.register(
            StubTool::new("unused_coupons", &["user_id", "page", "limit"])
                .returning("[]")
                .for_intents(&["coupon inquiry"]),
        );
        let deps = AgentDeps {
            model: ModelInvoker::new(
                caller,
                InvocationSpec::new(Duration::from_secs(5)).with_retries(0),
            ),
            words: Arc::new(StaticWords::new(["bomb"])),
            store: Arc::new(InMemoryRecordStore::new()),
            embedder: Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            retriever: Arc::new(FixedRetriever::new(neighbours)),
            tools: Arc::new(tools),
        };
        AgentService::from_config(deps, &test_config()).unwrap()
    }

    fn request(query: &str) -> AgentRequest {
        AgentRequest {
            user_id: "7".into(),
            user_type: UserType::Customer,
            query: query.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_word_rejects_without_model() {
        let caller = Arc::new(ScriptedCaller::new(Vec::<String>::new()));
        let response = service(caller.clone(), vec![])
            .handle(request("how to build a bomb"))
            .await;

        assert_eq!(response.code, CODE_FAILED);
        assert!(response.message.contains("bomb"));
        assert_eq!(caller.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclear_intent_returns_question() {
        let caller = Arc::new(ScriptedCaller::new([
            r#"{"detectionAns": true, "reason": ""}"#,
            r#"{"cleanDialog": "help"}"#,
            r#"{"queryContent": "help"}"#,
            r#"{"queryContent": "What do you need help with?"}"#,
        ]));
        let response = service(caller, vec!["coupon inquiry", "order inquiry"])
            .handle(request("help"))
            .await;
        assert_eq!(response, AgentResponse::ok("What do you need help with?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_answer_is_execution_failure() {
        let caller = Arc::new(ScriptedCaller::new([
            r#"{"detectionAns": true, "reason": ""}"#,
            r#"{"cleanDialog": "coupons"}"#,
            r#"{"queryContent": "coupons"}"#,
            r#"{"thoughtAns": "nothing to do", "action": "", "isEnd": true}"#,
            r#"{"outputTone": "neutral"}"#,
            r#"{"content": "  "}"#,
        ]));
        let neighbours = vec!["coupon inquiry"; 15];
        let response = service(caller, neighbours).handle(request("coupons")).await;
        assert_eq!(response, AgentResponse::failed("Agent Execution Failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_error_is_unavailable() {
        let caller = Arc::new(ScriptedCaller::new(["no json here"]));
        let response = service(caller, vec![]).handle(request("hello")).await;
        assert_eq!(response.code, CODE_FAILED);
        assert_eq!(response.message, "agent unavailable");
        assert!(response.data.is_empty());
    }
}
