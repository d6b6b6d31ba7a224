#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Notify};

use usdt_link_core::{
    ChainClient, PortError, ProposalNamespaces, SessionEvent, SessionManager, SessionPayload,
    SessionStore, TransferOrchestrator, WalletTransport,
};

pub const ACCOUNT: &str = "0x1111111111111111111111111111111111112222";
pub const RECIPIENT: &str = "0x000000000000000000000000000000000000beef";
pub const SESSION_TOPIC: &str = "session-topic-1";
pub const TX_HASH: &str = "0xabababababababababababababababababababababababababababababababab";

const BALANCE_OF: &str = "70a08231";
const DECIMALS: &str = "313ce567";

#[derive(Debug)]
struct FakeState {
    session: Option<SessionPayload>,
    wallet_chains: HashSet<u64>,
    token_balance: U256,
    decimals: u8,
    native_balance: U256,
    receipt_misses: usize,
    receipt_status: u8,
    send_error: Option<PortError>,
    init_error: Option<PortError>,
    disconnect_error: Option<PortError>,
    connect_error: Option<PortError>,
}

/// Scripted wallet: pairing is answered by the test through `approve`/`reject`,
/// chain reads are served from in-memory values.
pub struct FakeTransport {
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<FakeState>,
    requests: Mutex<Vec<(u64, String, Value)>>,
    pending: Mutex<Option<oneshot::Sender<Result<SessionPayload, PortError>>>>,
    /// Proposal topic of the latest `connect`.
    proposal: Mutex<Option<String>>,
    pub connect_calls: AtomicUsize,
    send_gate: Mutex<Option<Arc<Notify>>>,
    pub send_started: Notify,
}

impl Default for FakeTransport {
    fn default() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            events,
            state: Mutex::new(FakeState {
                session: None,
                wallet_chains: HashSet::from([1, 11_155_111]),
                token_balance: U256::from(25_000_000u64),
                decimals: 6,
                native_balance: U256::from(10u64).pow(U256::from(18u64)),
                receipt_misses: 0,
                receipt_status: 1,
                send_error: None,
                init_error: None,
                disconnect_error: None,
                connect_error: None,
            }),
            requests: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            proposal: Mutex::new(None),
            connect_calls: AtomicUsize::new(0),
            send_gate: Mutex::new(None),
            send_started: Notify::new(),
        }
    }
}

pub fn session_payload(accounts: &[&str]) -> SessionPayload {
    SessionPayload {
        topic: SESSION_TOPIC.to_owned(),
        pairing_topic: None,
        accounts: accounts.iter().map(|a| (*a).to_owned()).collect(),
        peer_name: Some("MetaMask Wallet".to_owned()),
    }
}

/// Pairing URI of the `n`th proposal.
pub fn pairing_uri(n: usize) -> String {
    format!("wc:pairing-topic-{n}@2?relay-protocol=irn&symKey=00")
}

pub fn account_id(chain_id: u64) -> String {
    format!("eip155:{chain_id}:{ACCOUNT}")
}

impl FakeTransport {
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Peer approves the pending pairing.
    pub fn approve(&self, accounts: &[&str]) -> SessionPayload {
        let mut session = session_payload(accounts);
        session.pairing_topic = self.proposal.lock().unwrap().clone();
        self.state.lock().unwrap().session = Some(session.clone());
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(Ok(session.clone()));
        }
        self.emit(SessionEvent::Connected {
            session: session.clone(),
        });
        session
    }

    /// Session settles on the transport but no event reaches the app.
    pub fn settle_silently(&self, accounts: &[&str]) -> SessionPayload {
        let session = session_payload(accounts);
        self.state.lock().unwrap().session = Some(session.clone());
        session
    }

    /// The wallet settles an earlier proposal after the app moved on. The
    /// session replaces the transport's and a Connected event is emitted.
    pub fn settle_proposal(&self, pairing: &str, topic: &str, accounts: &[&str]) -> SessionPayload {
        let session = SessionPayload {
            topic: topic.to_owned(),
            pairing_topic: Some(pairing.to_owned()),
            accounts: accounts.iter().map(|a| (*a).to_owned()).collect(),
            peer_name: Some("MetaMask Wallet".to_owned()),
        };
        self.state.lock().unwrap().session = Some(session.clone());
        self.emit(SessionEvent::Connected {
            session: session.clone(),
        });
        session
    }

    pub fn reject(&self, code: i64, message: &str) {
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(Err(PortError::Rpc {
                code,
                message: message.to_owned(),
            }));
        }
    }

    pub fn set_token_balance(&self, raw: u64) {
        self.state.lock().unwrap().token_balance = U256::from(raw);
    }

    pub fn set_receipt_misses(&self, misses: usize) {
        self.state.lock().unwrap().receipt_misses = misses;
    }

    pub fn set_receipt_status(&self, status: u8) {
        self.state.lock().unwrap().receipt_status = status;
    }

    pub fn set_send_error(&self, err: PortError) {
        self.state.lock().unwrap().send_error = Some(err);
    }

    pub fn set_init_error(&self, err: PortError) {
        self.state.lock().unwrap().init_error = Some(err);
    }

    pub fn set_disconnect_error(&self, err: PortError) {
        self.state.lock().unwrap().disconnect_error = Some(err);
    }

    pub fn set_connect_error(&self, err: PortError) {
        self.state.lock().unwrap().connect_error = Some(err);
    }

    pub fn set_wallet_chains(&self, chains: &[u64]) {
        self.state.lock().unwrap().wallet_chains = chains.iter().copied().collect();
    }

    /// Hold `eth_sendTransaction` until the returned notify is signalled.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn requests(&self) -> Vec<(u64, String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|(_, m, _)| m).collect()
    }

    pub fn has_pending_pairing(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }
}

fn word(value: U256) -> Value {
    Value::String(alloy::primitives::hex::encode_prefixed(value.to_be_bytes::<32>()))
}

fn quantity(value: U256) -> Value {
    Value::String(format!("0x{value:x}"))
}

fn chain_param(params: &Value) -> Result<u64, PortError> {
    let raw = params[0]["chainId"]
        .as_str()
        .ok_or_else(|| PortError::Validation("chainId missing".to_owned()))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| PortError::Validation(e.to_string()))
}

#[async_trait]
impl WalletTransport for FakeTransport {
    async fn init(&self) -> Result<(), PortError> {
        match self.state.lock().unwrap().init_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn connect(&self, _namespaces: &ProposalNamespaces) -> Result<SessionPayload, PortError> {
        let n = self.connect_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = self.state.lock().unwrap().connect_error.clone() {
            return Err(e);
        }
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(tx);
        let uri = pairing_uri(n);
        *self.proposal.lock().unwrap() = usdt_link_core::pairing_topic(&uri);
        self.emit(SessionEvent::DisplayUri { uri });
        rx.await
            .map_err(|_| PortError::Transport("pairing abandoned".to_owned()))?
    }

    async fn disconnect(&self) -> Result<(), PortError> {
        let mut g = self.state.lock().unwrap();
        g.session = None;
        match g.disconnect_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn current_session(&self) -> Option<SessionPayload> {
        self.state.lock().unwrap().session.clone()
    }

    async fn request(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError> {
        self.requests
            .lock()
            .unwrap()
            .push((chain_id, method.to_owned(), params.clone()));

        match method {
            "wallet_switchEthereumChain" => {
                let target = chain_param(&params)?;
                if self.state.lock().unwrap().wallet_chains.contains(&target) {
                    Ok(Value::Null)
                } else {
                    Err(PortError::Rpc {
                        code: 4902,
                        message: format!("Unrecognized chain ID \"{target:#x}\""),
                    })
                }
            }
            "wallet_addEthereumChain" => {
                let target = chain_param(&params)?;
                self.state.lock().unwrap().wallet_chains.insert(target);
                Ok(Value::Null)
            }
            "eth_call" => {
                let data = params[0]["data"].as_str().unwrap_or_default().to_owned();
                let g = self.state.lock().unwrap();
                if data.starts_with(&format!("0x{BALANCE_OF}")) {
                    Ok(word(g.token_balance))
                } else if data.starts_with(&format!("0x{DECIMALS}")) {
                    Ok(word(U256::from(g.decimals)))
                } else {
                    Err(PortError::Rpc {
                        code: -32000,
                        message: "execution reverted".to_owned(),
                    })
                }
            }
            "eth_getBalance" => Ok(quantity(self.state.lock().unwrap().native_balance)),
            "eth_estimateGas" => Ok(quantity(U256::from(52_000u64))),
            "eth_gasPrice" => Ok(quantity(U256::from(1_000_000_000u64))),
            "eth_sendTransaction" => {
                self.send_started.notify_one();
                let gate = self.send_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                match self.state.lock().unwrap().send_error.clone() {
                    Some(e) => Err(e),
                    None => Ok(Value::String(TX_HASH.to_owned())),
                }
            }
            "eth_getTransactionReceipt" => {
                let mut g = self.state.lock().unwrap();
                if g.receipt_misses > 0 {
                    g.receipt_misses -= 1;
                    return Ok(Value::Null);
                }
                Ok(serde_json::json!({
                    "transactionHash": params[0],
                    "from": ACCOUNT,
                    "to": "0xdAC17F958D2ee523a2206206994597C13D831ec7",
                    "blockNumber": "0x10",
                    "gasUsed": "0xcb20",
                    "status": format!("0x{:x}", g.receipt_status),
                }))
            }
            _ => Err(PortError::NotImplemented("fake transport method")),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, PortError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), PortError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PortError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

pub type TestSession = SessionManager<FakeTransport, MemoryStore>;
pub type TestOrchestrator = TransferOrchestrator<FakeTransport, MemoryStore>;

pub struct Stack {
    pub transport: Arc<FakeTransport>,
    pub store: Arc<MemoryStore>,
    pub session: TestSession,
    pub chain: Arc<ChainClient<FakeTransport>>,
    pub orchestrator: Arc<TestOrchestrator>,
}

pub fn new_stack() -> Stack {
    let transport = Arc::new(FakeTransport::default());
    let store = Arc::new(MemoryStore::default());
    let session = SessionManager::new(Arc::clone(&transport), Arc::clone(&store));
    let chain = Arc::new(
        ChainClient::new(Arc::clone(&transport)).with_receipt_poll_interval(Duration::from_millis(1)),
    );
    let orchestrator = Arc::new(TransferOrchestrator::new(session.clone(), Arc::clone(&chain)));
    Stack {
        transport,
        store,
        session,
        chain,
        orchestrator,
    }
}

/// Stack with a session the transport already holds, adopted via `initialize`.
pub async fn connected_stack() -> Stack {
    let stack = new_stack();
    stack.transport.settle_silently(&[&account_id(1)]);
    stack.session.initialize().await.expect("initialize");
    stack
}
