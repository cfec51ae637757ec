//! Call session model
//!
//! A [`CallSession`] is the coordinator's record of one call attempt, inbound
//! or outbound. Sessions are created by the coordinator and only ever mutated
//! by translated provider notifications, so the transition rules live here
//! next to the data they protect.
//!
//! # State machine
//!
//! ```text
//!  outbound:  Initiating ──► Ringing ──► Connected ──► Disconnected
//!                 │             ▲            ▲              ▲
//!                 └─────────────┴────────────┘              │
//!  inbound:                  Ringing ──► Connected ─────────┤
//!                                                           │
//!  any non-terminal state ──────────────────────────────────┘
//! ```
//!
//! `Disconnected` is terminal: once a session reaches it, every further
//! transition is rejected and its participant set is frozen.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque call identifier supplied by the calling provider
pub type CallId = String;

/// Direction of a call from the local user's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Call placed by the local user
    Outbound,
    /// Call received from a remote party
    Inbound,
}

/// Coordinator-level call state
///
/// Providers usually expose a richer state set (hold, lobby, early media...);
/// those are folded into these four values by
/// [`ProviderCallState::coordinator_state`](crate::provider::ProviderCallState::coordinator_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Outbound call is being set up
    Initiating,
    /// Remote side is alerting (outbound) or the local side is (inbound)
    Ringing,
    /// Media is flowing
    Connected,
    /// Call has ended
    Disconnected,
}

impl CallState {
    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }

    /// Check whether moving from `self` to `next` is a legal transition
    ///
    /// Transitions only move forward; skipping intermediate states is allowed
    /// because providers do not always report `Ringing`.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Initiating, Ringing) | (Initiating, Connected) | (Ringing, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Initiating => "Initiating",
            CallState::Ringing => "Ringing",
            CallState::Connected => "Connected",
            CallState::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndCode {
    /// The local user hung up
    LocalHangup,
    /// The remote party hung up
    RemoteHangup,
    /// An incoming call was declined by the local user
    Declined,
    /// An incoming call was turned away because another one was pending
    Rejected,
    /// A pending incoming call was replaced by a newer one
    Displaced,
    /// The call failed (network, media or signaling failure)
    Failed,
    /// The coordinator was disposed while the call was alive
    Disposed,
    /// The provider did not say
    Unknown,
}

/// Structured end reason attached to a session when it disconnects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndReason {
    /// Coarse end code
    pub code: EndCode,
    /// Provider-specific sub code, if any
    pub subcode: Option<u32>,
    /// Free-form provider message, if any
    pub message: Option<String>,
}

impl EndReason {
    /// Create an end reason with only a code
    pub fn new(code: EndCode) -> Self {
        Self {
            code,
            subcode: None,
            message: None,
        }
    }

    pub fn local_hangup() -> Self {
        Self::new(EndCode::LocalHangup)
    }

    pub fn remote_hangup() -> Self {
        Self::new(EndCode::RemoteHangup)
    }

    pub fn unknown() -> Self {
        Self::new(EndCode::Unknown)
    }

    /// Attach a provider sub code
    pub fn with_subcode(mut self, subcode: u32) -> Self {
        self.subcode = Some(subcode);
        self
    }

    /// Attach a provider message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        if let Some(subcode) = self.subcode {
            write!(f, " ({})", subcode)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// State of a remote participant as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantState {
    Idle,
    Connecting,
    Ringing,
    Connected,
    Hold,
    InLobby,
    EarlyMedia,
    Disconnected,
}

/// Reference to a remote participant of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Provider identifier of the participant
    pub id: String,
    /// Last known participant state
    pub state: ParticipantState,
}

impl ParticipantRef {
    pub fn new(id: impl Into<String>, state: ParticipantState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

/// Outcome of applying a state to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed; carries the state the session left
    Applied { previous: CallState },
    /// The session was already in the requested state
    Unchanged,
    /// The transition is not allowed from the current state
    Rejected { current: CallState },
}

/// One active or pending call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    /// Provider call identifier
    pub id: CallId,
    /// Who placed the call
    pub direction: CallDirection,
    /// Current coordinator state
    pub state: CallState,
    /// Set exactly once, on the transition to `Disconnected`
    pub end_reason: Option<EndReason>,
    /// Remote participants keyed by participant id
    pub remote_participants: HashMap<String, ParticipantRef>,
    /// Callee for outbound calls, caller for inbound calls (when known)
    pub remote_id: Option<String>,
    /// Whether the local microphone is muted on this call
    pub is_muted: bool,
    /// A local hang-up was accepted by the provider and is awaiting confirmation
    pub is_ending: bool,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    fn with_direction(
        id: impl Into<CallId>,
        direction: CallDirection,
        state: CallState,
        remote_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            direction,
            state,
            end_reason: None,
            remote_participants: HashMap::new(),
            remote_id,
            is_muted: false,
            is_ending: false,
            created_at: Utc::now(),
            connected_at: None,
            ended_at: None,
        }
    }

    /// New outbound session in `Initiating`
    pub fn outbound(id: impl Into<CallId>, target: impl Into<String>) -> Self {
        Self::with_direction(
            id,
            CallDirection::Outbound,
            CallState::Initiating,
            Some(target.into()),
        )
    }

    /// New inbound session in `Ringing`
    pub fn inbound(id: impl Into<CallId>, caller: Option<String>) -> Self {
        Self::with_direction(id, CallDirection::Inbound, CallState::Ringing, caller)
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a coordinator state to this session
    ///
    /// `end_reason` is only recorded when the target state is `Disconnected`;
    /// a missing reason becomes `LocalHangup` if a local hang-up was pending
    /// and `Unknown` otherwise.
    pub fn apply_state(&mut self, next: CallState, end_reason: Option<EndReason>) -> Transition {
        if self.state == next {
            return Transition::Unchanged;
        }
        // Connecting or early media reported after ringing is progress, not a step back
        if next == CallState::Initiating && !self.is_disconnected() {
            return Transition::Unchanged;
        }
        if !self.state.can_transition_to(next) {
            return Transition::Rejected { current: self.state };
        }

        let previous = self.state;
        self.state = next;
        match next {
            CallState::Connected => {
                if self.connected_at.is_none() {
                    self.connected_at = Some(Utc::now());
                }
            }
            CallState::Disconnected => {
                let reason = end_reason.unwrap_or_else(|| {
                    if self.is_ending {
                        EndReason::local_hangup()
                    } else {
                        EndReason::unknown()
                    }
                });
                self.end_reason = Some(reason);
                self.ended_at = Some(Utc::now());
                self.is_ending = false;
            }
            _ => {}
        }
        Transition::Applied { previous }
    }

    /// Add a participant; returns `false` if it was already known or the call is over
    pub fn add_participant(&mut self, participant: ParticipantRef) -> bool {
        if self.is_disconnected() || self.remote_participants.contains_key(&participant.id) {
            return false;
        }
        self.remote_participants
            .insert(participant.id.clone(), participant);
        true
    }

    /// Remove a participant; returns the removed entry
    pub fn remove_participant(&mut self, participant_id: &str) -> Option<ParticipantRef> {
        if self.is_disconnected() {
            return None;
        }
        self.remote_participants.remove(participant_id)
    }

    /// Update a participant's state; returns its previous state
    pub fn update_participant_state(
        &mut self,
        participant_id: &str,
        state: ParticipantState,
    ) -> Option<ParticipantState> {
        if self.is_disconnected() {
            return None;
        }
        let participant = self.remote_participants.get_mut(participant_id)?;
        let previous = participant.state;
        participant.state = state;
        Some(previous)
    }

    /// Time spent connected, if the call ever connected
    pub fn connected_duration(&self) -> Option<chrono::Duration> {
        let connected_at = self.connected_at?;
        let until = self.ended_at.unwrap_or_else(Utc::now);
        Some(until - connected_at)
    }
}
