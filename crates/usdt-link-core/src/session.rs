//! Wallet session lifecycle: pairing, inbound session events, teardown.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::domain::{ProposalNamespaces, SessionEvent, SessionPayload, SessionState, SessionStatus};
use crate::error::WalletError;
use crate::ports::{PortError, SessionStore, WalletTransport};
use crate::state_machine::{session_transition, SessionAction};

/// Storage key of the cached session token.
pub const SESSION_STORAGE_KEY: &str = "@walletconnect_session";

const WC_USER_REJECTED: i64 = 5002;

/// Address part of the first namespace-qualified account
/// (`eip155:1:0xabc` -> `0xabc`).
pub fn extract_address(accounts: &[String]) -> Option<String> {
    let first = accounts.first()?;
    let address = first.split(':').nth(2)?;
    if address.is_empty() {
        return None;
    }
    Some(address.to_owned())
}

pub fn extract_chain_id(accounts: &[String]) -> Option<u64> {
    accounts.first()?.split(':').nth(1)?.parse().ok()
}

/// Proposal topic of a `wc:<topic>@<version>?...` pairing URI.
pub fn pairing_topic(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("wc:")?;
    let topic = rest.split(|c| c == '@' || c == '?').next()?;
    if topic.is_empty() {
        return None;
    }
    Some(topic.to_owned())
}

/// `<scheme>://wc?uri=<url-encoded pairing uri>`
pub fn deep_link(scheme: &str, pairing_uri: &str) -> String {
    format!("{scheme}://wc?uri={}", urlencoding::encode(pairing_uri))
}

/// Owns the single wallet session. Cheap to clone; clones share state.
pub struct SessionManager<T, S> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for SessionManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T, S> {
    transport: Arc<T>,
    store: Arc<S>,
    namespaces: ProposalNamespaces,
    tracker: Mutex<Tracker>,
    publisher: watch::Sender<SessionState>,
    cancel: Notify,
}

#[derive(Debug, Default)]
struct Tracker {
    state: SessionState,
    topic: Option<String>,
    in_progress: bool,
    attempt: u64,
    /// Set by a user cancel, cleared by the next initiate.
    cancelled: bool,
    /// Proposal topic of the pending attempt, once its URI is known.
    pairing_topic: Option<String>,
    discarded_topics: HashSet<String>,
    /// Proposals abandoned by cancel or teardown.
    discarded_pairings: HashSet<String>,
}

impl Tracker {
    fn transition(&mut self, action: SessionAction) -> bool {
        match session_transition(self.state.status, action) {
            Ok((to, transition)) => {
                debug!(from = ?transition.from, to = ?to, reason = transition.reason, "session transition");
                self.state.status = to;
                if to != SessionStatus::Connected {
                    self.state.account_address = None;
                }
                true
            }
            Err(e) => {
                warn!("{e}");
                false
            }
        }
    }

    fn reset(&mut self, action: SessionAction) {
        self.transition(action);
        self.state = SessionState::default();
        self.topic = None;
        self.in_progress = false;
    }

    /// Adopt a settled session. Returns false, leaving state untouched, when
    /// no account can be derived from it.
    fn adopt(&mut self, session: &SessionPayload, action: SessionAction) -> bool {
        let Some(address) = extract_address(&session.accounts) else {
            debug!(topic = %session.topic, "session carries no account, ignoring");
            return false;
        };
        if !self.transition(action) {
            return false;
        }
        self.state.account_address = Some(address);
        self.state.active_chain_id = extract_chain_id(&session.accounts);
        self.state.pairing_uri = None;
        self.topic = Some(session.topic.clone());
        self.in_progress = false;
        true
    }

    fn discard(&mut self, topic: &str) {
        info!(topic, "discarding session from cancelled pairing");
        self.discarded_topics.insert(topic.to_owned());
    }

    /// Forget the pending proposal; any session it settles later is stale.
    fn abandon_pairing(&mut self) {
        if let Some(pairing) = self.pairing_topic.take() {
            debug!(%pairing, "pairing abandoned");
            self.discarded_pairings.insert(pairing);
        }
    }

    /// True when `session` belongs to a cancelled attempt or to a proposal
    /// other than the one pending.
    fn is_stale(&self, session: &SessionPayload) -> bool {
        if self.discarded_topics.contains(&session.topic) {
            return true;
        }
        let Some(pairing) = session.pairing_topic.as_deref() else {
            return false;
        };
        if self.discarded_pairings.contains(pairing) {
            return true;
        }
        self.in_progress
            && self
                .pairing_topic
                .as_deref()
                .is_some_and(|pending| pending != pairing)
    }
}

impl<T, S> SessionManager<T, S>
where
    T: WalletTransport,
    S: SessionStore,
{
    pub fn new(transport: Arc<T>, store: Arc<S>) -> Self {
        Self::with_namespaces(transport, store, ProposalNamespaces::default())
    }

    pub fn with_namespaces(transport: Arc<T>, store: Arc<S>, namespaces: ProposalNamespaces) -> Self {
        let (publisher, _) = watch::channel(SessionState::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                namespaces,
                tracker: Mutex::new(Tracker::default()),
                publisher,
                cancel: Notify::new(),
            }),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }

    pub fn state(&self) -> SessionState {
        self.shared.publisher.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.publisher.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tracker>, WalletError> {
        self.shared
            .tracker
            .lock()
            .map_err(|e| PortError::Transport(format!("session lock poisoned: {e}")).into())
    }

    /// Run `f` against the tracker and publish the resulting state.
    fn update<R>(&self, f: impl FnOnce(&mut Tracker) -> R) -> Result<R, WalletError> {
        let mut g = self.lock()?;
        let out = f(&mut g);
        self.shared.publisher.send_replace(g.state.clone());
        Ok(out)
    }

    fn persist_token(&self, topic: &str) {
        if let Err(e) = self.shared.store.save(SESSION_STORAGE_KEY, topic) {
            warn!("failed to cache session token: {e}");
        }
    }

    fn purge_token(&self) {
        if let Err(e) = self.shared.store.remove(SESSION_STORAGE_KEY) {
            warn!("failed to purge session token: {e}");
        }
    }

    /// Bring up the transport and adopt any session it retained. A failed
    /// initialization purges the cached token so a poisoned session is not
    /// retried on every start.
    pub async fn initialize(&self) -> Result<SessionState, WalletError> {
        if let Err(e) = self.shared.transport.init().await {
            error!("wallet provider initialization failed: {e}");
            self.purge_token();
            self.update(|t| t.reset(SessionAction::InitFailed))?;
            return Err(WalletError::ProviderUnavailable(e.detail()));
        }

        match self.shared.transport.current_session() {
            Some(session) => {
                let adopted = self.update(|t| t.adopt(&session, SessionAction::Restore))?;
                if adopted {
                    info!(topic = %session.topic, "restored wallet session");
                    self.persist_token(&session.topic);
                }
            }
            None => {
                let cached = self.shared.store.load(SESSION_STORAGE_KEY).unwrap_or_else(|e| {
                    warn!("failed to read session token: {e}");
                    None
                });
                if cached.is_some() {
                    debug!("transport has no session, dropping stale token");
                    self.purge_token();
                }
            }
        }
        Ok(self.state())
    }

    /// Start a pairing and wait for the peer's answer.
    ///
    /// Returns [`WalletError::ConnectionInProgress`] while another attempt is
    /// pending (hosts should ignore it, see [`WalletError::is_silent`]) and
    /// [`WalletError::ConnectionCancelled`] if the attempt is cancelled or
    /// torn down before the peer answers.
    pub async fn initiate_connection(&self) -> Result<SessionState, WalletError> {
        let cancelled = self.shared.cancel.notified();
        tokio::pin!(cancelled);

        let has_live_session = self.shared.transport.current_session().is_some();
        let attempt = self.update(|t| {
            if t.in_progress {
                return Err(WalletError::ConnectionInProgress);
            }
            if t.state.status == SessionStatus::Connected && has_live_session {
                return Err(WalletError::AlreadyConnected);
            }
            t.transition(SessionAction::Initiate);
            t.state.pairing_uri = None;
            t.topic = None;
            t.pairing_topic = None;
            t.in_progress = true;
            t.cancelled = false;
            t.attempt = t.attempt.wrapping_add(1);
            Ok(t.attempt)
        })??;
        info!(attempt, "wallet pairing initiated");

        let outcome = tokio::select! {
            res = self.shared.transport.connect(&self.shared.namespaces) => res,
            _ = &mut cancelled => {
                debug!(attempt, "pairing wait abandoned");
                return Err(WalletError::ConnectionCancelled);
            }
        };

        match outcome {
            Ok(session) => self.finish_pairing(attempt, session),
            Err(e) => self.fail_pairing(attempt, e),
        }
    }

    fn finish_pairing(
        &self,
        attempt: u64,
        session: SessionPayload,
    ) -> Result<SessionState, WalletError> {
        let outcome = self.update(|t| {
            if t.attempt != attempt || t.cancelled || t.is_stale(&session) {
                t.discard(&session.topic);
                return Err(WalletError::ConnectionCancelled);
            }
            // The Connected event may have been handled first.
            if t.state.status == SessionStatus::Connected
                && t.topic.as_deref() == Some(session.topic.as_str())
            {
                return Ok(());
            }
            if t.adopt(&session, SessionAction::PeerApproved) {
                Ok(())
            } else {
                t.reset(SessionAction::Fail);
                Err(WalletError::NotConnected)
            }
        })?;
        outcome?;
        info!(topic = %session.topic, "wallet connected");
        self.persist_token(&session.topic);
        Ok(self.state())
    }

    fn fail_pairing(&self, attempt: u64, err: PortError) -> Result<SessionState, WalletError> {
        let stale = self.update(|t| t.attempt != attempt || t.cancelled)?;
        if stale {
            return Err(WalletError::ConnectionCancelled);
        }

        let message = err.detail();
        // Relay bookkeeping noise; the session may have settled regardless.
        if message.contains("session topic") || message.contains("No matching key") {
            if let Some(session) = self.shared.transport.current_session() {
                let adopted = self.update(|t| {
                    !t.is_stale(&session) && t.adopt(&session, SessionAction::PeerApproved)
                })?;
                if adopted {
                    warn!("pairing reported '{message}' but a session exists, adopting it");
                    self.persist_token(&session.topic);
                    return Ok(self.state());
                }
            }
        }

        self.update(|t| t.reset(SessionAction::Fail))?;
        if err.rpc_code() == Some(WC_USER_REJECTED) || message.contains("rejected") {
            info!("wallet rejected pairing");
            return Err(WalletError::ConnectionRejected);
        }
        warn!("wallet pairing failed: {err}");
        Err(err.into())
    }

    /// Drop a pending pairing. An established session is left alone.
    pub fn cancel_pending_connection(&self) -> Result<SessionState, WalletError> {
        self.update(|t| {
            if t.in_progress {
                t.cancelled = true;
                t.attempt = t.attempt.wrapping_add(1);
                t.abandon_pairing();
            }
            t.in_progress = false;
            t.state.pairing_uri = None;
            t.transition(SessionAction::Cancel);
        })?;
        self.shared.cancel.notify_waiters();
        Ok(self.state())
    }

    /// Close the session. Best effort: local state is reset and the cached
    /// token purged whatever the remote side says.
    pub async fn teardown(&self) {
        if let Err(e) = self.shared.transport.disconnect().await {
            warn!("remote disconnect failed, resetting locally: {e}");
        }
        let reset = self.update(|t| {
            if t.in_progress {
                t.attempt = t.attempt.wrapping_add(1);
                t.abandon_pairing();
            }
            t.reset(SessionAction::Disconnect);
            t.cancelled = false;
        });
        if let Err(e) = reset {
            error!("failed to reset session state: {e}");
        }
        self.shared.cancel.notify_waiters();
        self.purge_token();
        info!("wallet disconnected");
    }

    /// Re-derive state after the host returns from background. Peer approval
    /// may have landed while the in-process event was missed.
    pub fn resync_on_foreground(&self) -> Result<SessionState, WalletError> {
        let Some(session) = self.shared.transport.current_session() else {
            return Ok(self.state());
        };
        let adopted = self.update(|t| {
            if t.state.status == SessionStatus::Connected
                || t.discarded_topics.contains(&session.topic)
            {
                return false;
            }
            if t.is_stale(&session) || (t.cancelled && !t.in_progress) {
                t.discard(&session.topic);
                return false;
            }
            t.adopt(&session, SessionAction::Restore)
        })?;
        if adopted {
            info!(topic = %session.topic, "session recovered on foreground");
            self.persist_token(&session.topic);
        }
        Ok(self.state())
    }

    pub fn handle_event(&self, event: SessionEvent) {
        if let Err(e) = self.apply_event(event) {
            error!("failed to apply session event: {e}");
        }
    }

    fn apply_event(&self, event: SessionEvent) -> Result<(), WalletError> {
        match event {
            SessionEvent::DisplayUri { uri } => {
                self.update(|t| {
                    if t.in_progress && t.transition(SessionAction::UriReceived) {
                        t.pairing_topic = pairing_topic(&uri);
                        debug!(pairing = ?t.pairing_topic, "pairing uri received");
                        t.state.pairing_uri = Some(uri);
                    }
                })?;
            }
            SessionEvent::Connected { session } => {
                let adopted = self.update(|t| {
                    if t.discarded_topics.contains(&session.topic) {
                        return false;
                    }
                    if t.is_stale(&session) {
                        t.discard(&session.topic);
                        return false;
                    }
                    if t.in_progress || t.state.status == SessionStatus::Connected {
                        return t.adopt(&session, SessionAction::PeerApproved);
                    }
                    t.discard(&session.topic);
                    false
                })?;
                if adopted {
                    info!(topic = %session.topic, "connect event received");
                    self.persist_token(&session.topic);
                }
            }
            SessionEvent::Updated { topic, accounts } => {
                self.update(|t| {
                    if t.topic.as_deref() != Some(topic.as_str()) {
                        return;
                    }
                    if let Some(address) = extract_address(&accounts) {
                        debug!(%address, "session updated");
                        t.state.account_address = Some(address);
                        if let Some(chain_id) = extract_chain_id(&accounts) {
                            t.state.active_chain_id = Some(chain_id);
                        }
                    }
                })?;
            }
            SessionEvent::Changed { topic, name, data } => {
                let current = self.shared.transport.current_session();
                self.update(|t| {
                    if t.topic.as_deref() != Some(topic.as_str()) {
                        return;
                    }
                    debug!(event = %name, "session event");
                    if name == "chainChanged" {
                        if let Some(chain_id) = chain_id_from_event(&data) {
                            t.state.active_chain_id = Some(chain_id);
                        }
                    }
                    let Some(session) = current.filter(|s| s.topic == topic) else {
                        return;
                    };
                    if let Some(address) = extract_address(&session.accounts) {
                        t.state.account_address = Some(address);
                    }
                })?;
            }
            SessionEvent::Deleted { topic } => {
                let deleted = self.update(|t| {
                    if t.topic.as_deref() != Some(topic.as_str()) {
                        return false;
                    }
                    t.reset(SessionAction::SessionDeleted);
                    true
                })?;
                if deleted {
                    info!(%topic, "session deleted by peer");
                    self.purge_token();
                }
            }
            SessionEvent::Disconnected => {
                let was_connected = self.update(|t| {
                    let was = t.state.status == SessionStatus::Connected;
                    if was {
                        t.reset(SessionAction::Disconnect);
                    }
                    was
                })?;
                if was_connected {
                    info!("transport disconnected");
                    self.purge_token();
                }
            }
        }
        Ok(())
    }
}

impl<T, S> SessionManager<T, S>
where
    T: WalletTransport + 'static,
    S: SessionStore + 'static,
{
    /// Feed transport events into [`SessionManager::handle_event`] until the
    /// transport closes its channel.
    pub fn spawn_event_loop(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.shared.transport.subscribe();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session event loop lagged");
                        if let Err(e) = manager.resync_on_foreground() {
                            error!("resync after lag failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("session event loop finished");
        })
    }
}

/// `chainChanged` payloads come as a number, a hex string or a CAIP-2 id.
fn chain_id_from_event(data: &Value) -> Option<u64> {
    if let Some(n) = data.as_u64() {
        return Some(n);
    }
    let raw = data.as_str()?;
    let raw = raw.rsplit(':').next().unwrap_or(raw);
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
