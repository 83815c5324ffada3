//! HTTP request node.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::{lenient_f64, parse_config};

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "http_request",
    name: "HTTP request",
    description: "Calls an external HTTP API",
    category: "network",
    inputs: &[],
    outputs: &[
        Port { name: "response_status", label: "response_status - status code" },
        Port { name: "response_text", label: "response_text - body text" },
        Port { name: "response_json", label: "response_json - decoded body" },
        Port { name: "response_success", label: "response_success - status < 400" },
        Port { name: "response_error", label: "response_error - failure message" },
    ],
};

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> Value {
    Value::String("10".to_string())
}

fn default_response_type() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HttpRequestConfig {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    headers: String,
    body: String,
    #[serde(default = "default_timeout")]
    timeout: Value,
    #[serde(default = "default_response_type")]
    response_type: String,
}

/// Sends a templated HTTP request. Failures surface through the documented
/// `response_*` outputs rather than failing the step.
pub struct HttpRequestNode {
    config: HttpRequestConfig,
}

impl HttpRequestNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(HttpRequestNode {
            config: parse_config(config),
        })
    }
}

fn failure(error: impl Into<String>) -> NodeOutput {
    let error = error.into();
    NodeOutput::advance()
        .with("success", false)
        .with("response_success", false)
        .with("response_error", error.clone())
        .with("error", error)
}

#[async_trait]
impl Node for HttpRequestNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let url = ctx.render_template(&self.config.url);
        let method = self.config.method.to_uppercase();
        let timeout_secs = lenient_f64(&self.config.timeout).unwrap_or(10.0);

        let method = match method.parse::<reqwest::Method>() {
            Ok(method) => method,
            Err(_) => return Ok(failure(format!("invalid method '{method}'"))),
        };

        let mut request = ctx
            .services
            .http
            .request(method.clone(), &url)
            .timeout(Duration::from_secs_f64(timeout_secs.max(0.1)));

        if !self.config.headers.is_empty() {
            let rendered = ctx.render_template(&self.config.headers);
            let headers: serde_json::Map<String, Value> = match serde_json::from_str(&rendered) {
                Ok(headers) => headers,
                Err(err) => {
                    warn!(url = %url, error = %err, "Invalid request headers JSON");
                    return Ok(failure("Invalid headers JSON format"));
                }
            };
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }

        if !self.config.body.is_empty()
            && (method == reqwest::Method::POST || method == reqwest::Method::PUT)
        {
            let rendered = ctx.render_template(&self.config.body);
            // JSON bodies get a JSON content type; anything else goes as text.
            match serde_json::from_str::<Value>(&rendered) {
                Ok(json_body) => request = request.json(&json_body),
                Err(_) => request = request.body(rendered),
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %url, error = %err, "HTTP request failed");
                let message = if err.is_timeout() {
                    format!("Request timeout after {timeout_secs} seconds")
                } else {
                    err.to_string()
                };
                return Ok(failure(message));
            }
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        let mut output = NodeOutput::advance()
            .with("success", true)
            .with("response_status", status)
            .with("response_text", text.clone())
            .with("response_success", status < 400)
            .with("response_error", "");

        if matches!(self.config.response_type.as_str(), "auto" | "json") {
            match serde_json::from_str::<Value>(&text) {
                Ok(json_value) => output = output.with("response_json", json_value),
                Err(_) if self.config.response_type == "json" => {
                    output = output.with("response_error", "Response is not valid JSON");
                }
                Err(_) => {}
            }
        }

        Ok(output)
    }
}
