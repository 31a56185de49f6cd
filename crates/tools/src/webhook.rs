//! Webhook-backed tool invocation
//!
//! Each configured tool is an HTTP endpoint. Arguments from the agent's tool
//! call are substituted into `{placeholders}` in the URL and body template;
//! the response body is returned verbatim for the tool-result history entry.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use voxflow_config::ApiToolConfig;
use voxflow_core::ToolCallRequest;

use crate::{ToolError, ToolExecutor};

/// Invokes configured webhook tools on behalf of the orchestrator
pub struct ToolInvoker {
    client: reqwest::Client,
    tools: HashMap<String, ApiToolConfig>,
}

impl ToolInvoker {
    pub fn new(tools: Vec<ApiToolConfig>) -> Self {
        let tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self {
            client: reqwest::Client::new(),
            tools,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute the tool call and return the response body as text
    async fn invoke_inner(&self, call: &ToolCallRequest) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let url = substitute(&tool.url, &call.arguments);

        tracing::info!(
            tool = %tool.name,
            method = %tool.method,
            call_id = %call.id,
            "Invoking tool webhook"
        );

        let mut request = match tool.method.to_uppercase().as_str() {
            "GET" => {
                let query: Vec<(String, String)> = call
                    .arguments
                    .iter()
                    .map(|(k, v)| (k.clone(), value_as_string(v)))
                    .collect();
                self.client.get(&url).query(&query)
            },
            "POST" => {
                let body = match &tool.param_template {
                    Some(template) => render_template(template, &call.arguments),
                    None => Value::Object(
                        call.arguments
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                };
                self.client.post(&url).json(&body)
            },
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "Unsupported method '{}' for tool '{}'",
                    other, tool.name
                )))
            },
        };

        if let Some(token) = &tool.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .timeout(Duration::from_secs(tool.timeout_secs))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ToolError::ExecutionFailed(format!(
                "{} returned {}: {}",
                tool.name, status, body
            )));
        }

        Ok(body)
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ToolInvoker {
    async fn invoke(&self, call: &ToolCallRequest) -> Result<String, ToolError> {
        self.invoke_inner(call).await
    }
}

/// Replace `{key}` placeholders with stringified argument values
fn substitute(template: &str, args: &HashMap<String, Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        out = out.replace(&format!("{{{}}}", key), &value_as_string(value));
    }
    out
}

/// Recursively substitute placeholders inside a JSON body template
fn render_template(template: &Value, args: &HashMap<String, Value>) -> Value {
    match template {
        Value::String(s) => {
            // A bare "{key}" placeholder takes the argument's native type
            let trimmed = s.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') && !trimmed.contains(' ') {
                let key = &trimmed[1..trimmed.len() - 1];
                if let Some(value) = args.get(key) {
                    return value.clone();
                }
            }
            Value::String(substitute(s, args))
        },
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_template(v, args)).collect())
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, args)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
