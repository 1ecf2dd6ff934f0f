use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use drover_core::config::ModelConfig;
use drover_core::error::{DroverError, Result};
use drover_core::traits::Caller;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible chat client. Works with OpenAI, DashScope, Ollama, vLLM, Groq, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/chat/completions") {
                    base.to_string()
                } else {
                    format!("{}/chat/completions", base)
                }
            }
            None => OPENAI_API_URL.to_string(),
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_content(body: ChatResponse) -> Result<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| DroverError::InvokeFailure("response contained no message content".into()))
}

impl Caller for OpenAiClient {
    fn call(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: &self.config.model_id,
                messages: vec![OaiMessage {
                    role: "user",
                    content: &prompt,
                }],
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
                stream: false,
            };

            let mut req = self.http.post(self.endpoint()).json(&request);
            if let Some(ref key) = self.config.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| DroverError::InvokeFailure(format!("request failed: {}", e)))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(status = %status, "Model API returned error status");
                return Err(DroverError::InvokeFailure(format!(
                    "model API error {}: {}",
                    status, body
                )));
            }

            let body: ChatResponse = resp
                .json()
                .await
                .map_err(|e| DroverError::InvokeFailure(format!("bad response body: {}", e)))?;

            let content = extract_content(body)?;
            debug!(chars = content.len(), model = %self.config.model_id, "Model call complete");
            Ok(content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            model_id: "qwen-plus".into(),
            api_key: None,
            base_url: base_url.map(String::from),
            max_tokens: 512,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(OpenAiClient::new(config(None)).endpoint(), OPENAI_API_URL);
        assert_eq!(
            OpenAiClient::new(config(Some("http://localhost:11434/v1/"))).endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            OpenAiClient::new(config(Some("https://host/v1/chat/completions"))).endpoint(),
            "https://host/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![OaiMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 10,
            temperature: None,
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_extract_content() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), "{\"ok\": true}");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            extract_content(empty),
            Err(DroverError::InvokeFailure(_))
        ));
    }
}
