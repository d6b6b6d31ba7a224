use crate::domain::SessionStatus;
use crate::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Initiate,
    UriReceived,
    PeerApproved,
    Restore,
    Cancel,
    Fail,
    Disconnect,
    SessionDeleted,
    InitFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub reason: &'static str,
}

pub fn session_transition(
    from: SessionStatus,
    action: SessionAction,
) -> Result<(SessionStatus, StateTransition), TransitionError> {
    use SessionAction as A;
    use SessionStatus as S;

    let (to, reason) = match (from, action) {
        (S::Disconnected, A::Initiate) => (S::Connecting, "pairing_requested"),
        // The transport dropped the session behind our back; pair again.
        (S::Connected, A::Initiate) => (S::Connecting, "re_pairing"),
        (S::Connecting, A::UriReceived) => (S::Connecting, "pairing_uri_received"),
        (S::Connecting, A::PeerApproved) => (S::Connected, "peer_approved"),
        (S::Connected, A::PeerApproved) => (S::Connected, "session_refreshed"),
        (S::Disconnected, A::Restore) => (S::Connected, "session_restored"),
        (S::Connecting, A::Restore) => (S::Connected, "session_restored"),
        (S::Connecting, A::Cancel) => (S::Disconnected, "pairing_cancelled"),
        (S::Disconnected, A::Cancel) => (S::Disconnected, "nothing_pending"),
        (S::Connected, A::Cancel) => (S::Connected, "session_kept"),
        (S::Connecting, A::Fail) => (S::Disconnected, "pairing_failed"),
        (_, A::Disconnect) => (S::Disconnected, "disconnected"),
        (S::Connected, A::SessionDeleted) => (S::Disconnected, "session_deleted"),
        (_, A::InitFailed) => (S::Disconnected, "provider_init_failed"),
        _ => return Err(TransitionError { from, action }),
    };

    Ok((
        to,
        StateTransition {
            from,
            to,
            reason,
        },
    ))
}
