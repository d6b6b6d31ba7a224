#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::{json, Value};
use tiny_http::{Header, Response, Server, StatusCode};

use usdt_link_adapters::LinkAdapterConfig;
use usdt_link_core::list_all;

pub const ACCOUNT: &str = "0x1111111111111111111111111111111111112222";
pub const RECIPIENT: &str = "0x000000000000000000000000000000000000beef";

const BALANCE_OF: &str = "0x70a08231";
const DECIMALS: &str = "0x313ce567";

/// JSON-RPC endpoint on a background thread. Every request body is recorded.
pub struct MockNode {
    pub url: String,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().expect("bodies lock").clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.bodies()
            .iter()
            .filter_map(|b| b["method"].as_str().map(str::to_owned))
            .collect()
    }
}

pub fn result(value: Value) -> (u16, Value) {
    (200, json!({ "jsonrpc": "2.0", "id": 1, "result": value }))
}

pub fn rpc_error(code: i64, message: &str) -> (u16, Value) {
    (
        200,
        json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": code, "message": message } }),
    )
}

pub fn spawn_node<F>(handler: F) -> MockNode
where
    F: Fn(&str, &Value) -> (u16, Value) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").expect("start server");
    let url = format!("http://{}", server.server_addr());
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&bodies);

    thread::spawn(move || {
        for mut req in server.incoming_requests() {
            let mut raw = String::new();
            let _ = req.as_reader().read_to_string(&mut raw);
            let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
            if let Ok(mut g) = recorded.lock() {
                g.push(body.clone());
            }
            let method = body["method"].as_str().unwrap_or_default().to_owned();
            let (code, payload) = handler(&method, &body["params"]);
            let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("content type header");
            let response = Response::from_string(payload.to_string())
                .with_status_code(StatusCode(code))
                .with_header(header);
            let _ = req.respond(response);
        }
    });

    MockNode { url, bodies }
}

fn word(n: u64) -> Value {
    Value::String(format!("0x{n:064x}"))
}

/// Node holding 25 USDT (6 decimals) and 1 native coin for every account.
pub fn usdt_node(method: &str, params: &Value) -> (u16, Value) {
    match method {
        "eth_call" => {
            let data = params[0]["data"].as_str().unwrap_or_default();
            if data.starts_with(BALANCE_OF) {
                result(word(25_000_000))
            } else if data.starts_with(DECIMALS) {
                result(word(6))
            } else {
                rpc_error(-32000, "execution reverted")
            }
        }
        "eth_getBalance" => result(json!("0xde0b6b3a7640000")),
        "eth_estimateGas" => result(json!("0xcb20")),
        "eth_gasPrice" => result(json!("0x3b9aca00")),
        "eth_getTransactionReceipt" => result(Value::Null),
        _ => rpc_error(-32601, "method not found"),
    }
}

pub fn config_for(node_url: &str) -> LinkAdapterConfig {
    LinkAdapterConfig {
        project_id: Some("test-project".to_owned()),
        receipt_poll_interval_ms: 1,
        rpc_overrides: list_all()
            .iter()
            .map(|d| (d.chain_id, node_url.to_owned()))
            .collect::<BTreeMap<_, _>>(),
        ..LinkAdapterConfig::default()
    }
}

pub fn account_id(chain_id: u64) -> String {
    format!("eip155:{chain_id}:{ACCOUNT}")
}
