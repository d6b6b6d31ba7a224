mod common;

use serde_json::{json, Value};

use common::{result, rpc_error, spawn_node};
use usdt_link_adapters::{HttpRpcAdapter, LinkAdapterConfig};
use usdt_link_core::{classify_transfer_error, PortError, TransferFailure};

fn adapter(url: &str) -> HttpRpcAdapter {
    HttpRpcAdapter::new(&LinkAdapterConfig::default())
        .expect("rpc client")
        .with_endpoint(1, url)
}

#[tokio::test]
async fn call_unwraps_result_and_sends_envelope() {
    let node = spawn_node(|method, _| match method {
        "eth_chainId" => result(json!("0x1")),
        _ => rpc_error(-32601, "method not found"),
    });

    let value = adapter(&node.url)
        .call(1, "eth_chainId", json!([]))
        .await
        .expect("chain id");
    assert_eq!(value, json!("0x1"));

    let bodies = node.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["jsonrpc"], "2.0");
    assert_eq!(bodies[0]["method"], "eth_chainId");
    assert!(bodies[0]["id"].is_u64());
}

#[tokio::test]
async fn null_result_is_passed_through() {
    let node = spawn_node(|_, _| result(Value::Null));
    let value = adapter(&node.url)
        .call(1, "eth_getTransactionReceipt", json!(["0x00"]))
        .await
        .expect("pending receipt");
    assert!(value.is_null());
}

#[tokio::test]
async fn error_object_keeps_rpc_code() {
    let node = spawn_node(|_, _| rpc_error(-32000, "execution reverted: insufficient allowance"));
    let err = adapter(&node.url)
        .call(1, "eth_estimateGas", json!([{}]))
        .await
        .expect_err("reverted");
    assert!(matches!(err, PortError::Rpc { code: -32000, .. }));
    assert_eq!(
        classify_transfer_error(&err),
        TransferFailure::InsufficientAllowance
    );
}

#[tokio::test]
async fn http_failure_status_is_transport_error() {
    let node = spawn_node(|_, _| (502, json!({ "oops": true })));
    let err = adapter(&node.url)
        .call(1, "eth_blockNumber", json!([]))
        .await
        .expect_err("bad gateway");
    assert!(matches!(err, PortError::Transport(ref m) if m.contains("502")), "{err}");
}

#[tokio::test]
async fn unknown_chain_has_no_endpoint() {
    let err = HttpRpcAdapter::new(&LinkAdapterConfig::default())
        .expect("rpc client")
        .call(10, "eth_chainId", json!([]))
        .await
        .expect_err("no endpoint");
    assert!(matches!(err, PortError::NotFound(_)));
}
