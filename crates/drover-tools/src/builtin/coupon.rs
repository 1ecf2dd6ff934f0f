use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, error};

use drover_core::config::ToolsConfig;
use drover_core::error::{DroverError, Result};
use drover_core::traits::Tool;

const TOOL_NAME: &str = "unused_coupons";

/// Returned to the model whenever the lookup fails, so it answers instead of
/// calling the tool again.
pub const LOOKUP_FAILED_ADVICE: &str =
    "Tool call failed. Do not call it again; ask the user to check their coupons in the app.";

/// Looks up the coupons a user has not used yet, one page at a time.
pub struct UnusedCouponsTool {
    http: Client,
    base_url: String,
    timeout_secs: u64,
}

impl UnusedCouponsTool {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.coupon_base_url.clone(), config.timeout_secs)
    }

    fn url(&self, user_id: &str, page: &str, limit: &str) -> String {
        format!(
            "{}/coupon/info/findNoUsePage/{}/{}/{}",
            self.base_url, user_id, page, limit
        )
    }

    async fn lookup(&self, params: &Map<String, Value>) -> Result<String> {
        let user_id = integer_param(params, "user_id")?;
        let page = integer_param(params, "page")?;
        let limit = integer_param(params, "limit")?;
        let url = self.url(&user_id, &page, &limit);
        debug!(url = %url, "Fetching unused coupons");

        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| failure(format!("request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| failure(format!("bad status: {}", e)))?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| failure(format!("bad response body: {}", e)))?;
        records_from_page(&body)
    }
}

fn failure(message: String) -> DroverError {
    DroverError::ToolExecution {
        tool: TOOL_NAME.to_string(),
        message,
    }
}

/// Accept integers given either as JSON numbers or numeric strings.
fn integer_param(params: &Map<String, Value>, key: &str) -> Result<String> {
    let value = params
        .get(key)
        .ok_or_else(|| failure(format!("missing {}", key)))?;
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(|n| n.to_string())
        .ok_or_else(|| failure(format!("{} is not an integer: {}", key, value)))
}

/// Extract `data.records` from a page response whose `code` must be 200.
fn records_from_page(body: &Value) -> Result<String> {
    let code = body.get("code").and_then(Value::as_i64);
    if code != Some(200) {
        return Err(failure(format!("error response code {:?}", code)));
    }
    body.pointer("/data/records")
        .map(|records| records.to_string())
        .ok_or_else(|| failure("response has no data.records".into()))
}

impl Tool for UnusedCouponsTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "List the coupons the user has not used yet."
    }

    fn required_params(&self) -> &[&str] {
        &["user_id", "page", "limit"]
    }

    fn intents(&self) -> &[&str] {
        &["coupon inquiry"]
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs + 5
    }

    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            match self.lookup(&params).await {
                Ok(records) => {
                    debug!(chars = records.len(), "Coupon lookup succeeded");
                    Ok(records)
                }
                Err(e) => {
                    error!(error = %e, "Coupon lookup failed");
                    Ok(LOOKUP_FAILED_ADVICE.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    /// Serve exactly one HTTP response and report the request line.
    async fn serve_once(status: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request.lines().next().unwrap_or_default().to_string()
        });
        (base, handle)
    }

    #[test]
    fn test_url_shape() {
        let tool = UnusedCouponsTool::new("http://localhost:8511/", 10);
        assert_eq!(
            tool.url("7", "1", "100"),
            "http://localhost:8511/coupon/info/findNoUsePage/7/1/100"
        );
    }

    #[test]
    fn test_integer_params() {
        let p = params(json!({"user_id": "42", "page": 1, "limit": 10.0, "bad": "x"}));
        assert_eq!(integer_param(&p, "user_id").unwrap(), "42");
        assert_eq!(integer_param(&p, "page").unwrap(), "1");
        assert_eq!(integer_param(&p, "limit").unwrap(), "10");
        assert!(integer_param(&p, "bad").is_err());
        assert!(integer_param(&p, "absent").is_err());
    }

    #[test]
    fn test_records_from_page() {
        let ok = json!({"code": 200, "data": {"records": [{"name": "10% off"}], "total": 1}});
        assert_eq!(records_from_page(&ok).unwrap(), r#"[{"name":"10% off"}]"#);

        let rejected = json!({"code": 500, "message": "boom"});
        assert!(records_from_page(&rejected).is_err());

        let no_records = json!({"code": 200, "data": {}});
        assert!(records_from_page(&no_records).is_err());
    }

    #[tokio::test]
    async fn test_fetches_records_from_service() {
        let body = json!({"code": 200, "data": {"records": ["coupon-a"]}}).to_string();
        let (base, server) = serve_once("200 OK", body).await;
        let tool = UnusedCouponsTool::new(base, 5);

        let out = tool
            .execute(params(json!({"user_id": 3, "page": 1, "limit": 20})))
            .await
            .unwrap();
        assert_eq!(out, r#"["coupon-a"]"#);
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /coupon/info/findNoUsePage/3/1/20 "));
    }

    #[tokio::test]
    async fn test_error_code_yields_advice() {
        let body = json!({"code": 401, "data": null}).to_string();
        let (base, _server) = serve_once("200 OK", body).await;
        let tool = UnusedCouponsTool::new(base, 5);

        let out = tool
            .execute(params(json!({"user_id": 3, "page": 1, "limit": 20})))
            .await
            .unwrap();
        assert_eq!(out, LOOKUP_FAILED_ADVICE);
    }

    #[tokio::test]
    async fn test_unreachable_service_yields_advice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let tool = UnusedCouponsTool::new(base, 2);
        let out = tool
            .execute(params(json!({"user_id": 3, "page": 1, "limit": 20})))
            .await
            .unwrap();
        assert_eq!(out, LOOKUP_FAILED_ADVICE);
    }
}
