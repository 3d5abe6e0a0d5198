use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepcore::{Node, NodeContext, NodeError, NodeKind, NodeOutcome, RunState};
use stepruntime::{NodeFactory, NodeMetadata};

/// HTTP request node
///
/// The URL comes from the `url` config, falling back to `payload.url`.
/// Writes `http_status` and `http_body` into the payload.
pub struct HttpRequestNode {
    id: String,
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Task
    }

    fn node_type(&self) -> &str {
        "HttpRequestNode"
    }

    async fn execute(&self, ctx: NodeContext, mut state: RunState) -> Result<NodeOutcome, NodeError> {
        let url = match ctx.config.get("url").and_then(Value::as_str) {
            Some(url) => url.to_string(),
            None => state.require_str("url")?.to_string(),
        };
        let method_value = ctx.get_config_or("method", Value::String("GET".to_string()));
        let method = method_value.as_str().unwrap_or("GET");

        ctx.events.info(format!("{} {}", method, url));

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "DELETE" => self.client.delete(&url),
            "POST" | "PUT" => {
                let mut req = if method.eq_ignore_ascii_case("POST") {
                    self.client.post(&url)
                } else {
                    self.client.put(&url)
                };
                if let Some(body) = state.get("body") {
                    req = match body {
                        Value::String(text) => req.body(text.clone()),
                        json => req.json(json),
                    };
                }
                req
            }
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        // Add headers if provided
        let request = if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            let mut req = request;
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    req = req.header(key, val_str);
                }
            }
            req
        } else {
            request
        };

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        let fail_on_status = ctx
            .config
            .get("fail_on_status")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if fail_on_status && (status.is_client_error() || status.is_server_error()) {
            return Err(NodeError::ExecutionFailed(format!("{} {} returned {}", method, url, status)));
        }

        state.set("http_status", status.as_u16());
        state.set("http_body", body_text);
        state.record_visit(&self.id);
        Ok(NodeOutcome::Continue(state))
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, node_id: &str, _config: &Map<String, Value>) -> Result<Arc<dyn Node>, NodeError> {
        Ok(Arc::new(HttpRequestNode::new(node_id)))
    }

    fn node_type(&self) -> &str {
        "HttpRequestNode"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            kind: NodeKind::Task,
        }
    }
}
