use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use usdt_link_core::PortError;

use crate::LinkAdapterConfig;

/// JSON-RPC over HTTP to the node of each supported chain.
#[derive(Debug, Clone)]
pub struct HttpRpcAdapter {
    client: reqwest::Client,
    endpoints: BTreeMap<u64, String>,
    next_id: Arc<AtomicU64>,
}

impl HttpRpcAdapter {
    pub fn new(config: &LinkAdapterConfig) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(config.rpc_timeout())
            .build()
            .map_err(|e| PortError::Transport(format!("failed to build rpc client: {e}")))?;
        let endpoints = usdt_link_core::list_all()
            .iter()
            .filter_map(|d| config.rpc_url(d.chain_id).map(|url| (d.chain_id, url)))
            .collect();
        Ok(Self {
            client,
            endpoints,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn with_endpoint(mut self, chain_id: u64, url: impl Into<String>) -> Self {
        self.endpoints.insert(chain_id, url.into());
        self
    }

    pub fn endpoint(&self, chain_id: u64) -> Result<&str, PortError> {
        self.endpoints
            .get(&chain_id)
            .map(String::as_str)
            .ok_or_else(|| PortError::NotFound(format!("no rpc endpoint for chain {chain_id}")))
    }

    pub async fn call(&self, chain_id: u64, method: &str, params: Value) -> Result<Value, PortError> {
        let url = self.endpoint(chain_id)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(chain_id, method, id, "rpc call");
        post_json_rpc(&self.client, url, &payload).await
    }
}

/// POST a JSON-RPC envelope and unwrap `result`. A JSON-RPC `error` object
/// keeps its code so callers can tell wallet and node failures apart.
pub(crate) async fn post_json_rpc(
    client: &reqwest::Client,
    url: &str,
    payload: &Value,
) -> Result<Value, PortError> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| PortError::Transport(format!("rpc request failed: {e}")))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| PortError::Transport(format!("rpc json decode failed: {e}")))?;
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string());
        return Err(PortError::Rpc { code, message });
    }
    if !status.is_success() {
        return Err(PortError::Transport(format!("rpc status {status}: {body}")));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| PortError::Transport("rpc response missing result".to_owned()))
}
