//! Calling and device provider contracts
//!
//! The coordinator never talks to a concrete calling SDK. Instead it drives
//! the traits in this module, and providers push their notifications back
//! through a [`ProviderEventSink`] handed to them when the agent is created.
//!
//! ```text
//! ┌──────────────────────┐  create_agent / start_call / hang_up ...
//! │  SessionCoordinator  │ ───────────────────────────────────────►┌──────────────┐
//! │                      │                                          │   Provider   │
//! │   (single inbox)     │ ◄─────────────────────────────────────── │  (SDK glue)  │
//! └──────────────────────┘        ProviderEventSink::push           └──────────────┘
//! ```
//!
//! Every pushed [`ProviderEvent`] lands in the same inbox as caller
//! commands, so provider notifications and caller operations are processed
//! strictly in arrival order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallId, CallState, EndReason, ParticipantState};
use crate::error::{InitError, ProviderResult};

/// Access token used to create a call agent
///
/// The token itself is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    token: String,
    user_id: Option<String>,
    expires_on: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
            expires_on: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_on: DateTime<Utc>) -> Self {
        self.expires_on = Some(expires_on);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.expires_on
    }

    /// Local sanity checks done before the provider is contacted
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), InitError> {
        if self.token.trim().is_empty() {
            return Err(InitError::invalid_credential("token is empty"));
        }
        if let Some(expires_on) = self.expires_on {
            if expires_on <= now {
                return Err(InitError::invalid_credential(format!(
                    "token expired at {}",
                    expires_on.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_len", &self.token.len())
            .field("user_id", &self.user_id)
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Target of an outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub id: String,
}

impl CallTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Options passed to [`CallAgent::start_call`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartCallOptions {
    /// Start with the microphone muted
    pub muted: bool,
}

/// Options passed to [`ProviderCall::hang_up`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HangUpOptions {
    /// End the call for all participants, not just the local user
    pub for_everyone: bool,
}

/// Media permissions requested from the device provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePermissionRequest {
    pub audio: bool,
    pub video: bool,
}

impl DevicePermissionRequest {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Audio device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Call state as reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderCallState {
    None,
    Connecting,
    Ringing,
    EarlyMedia,
    InLobby,
    Connected,
    LocalHold,
    RemoteHold,
    Disconnecting,
    Disconnected,
}

impl ProviderCallState {
    /// Fold a provider state into the coordinator's state set
    ///
    /// | Provider state | Coordinator state |
    /// |----------------|-------------------|
    /// | `None`, `Connecting`, `EarlyMedia`, `InLobby` | `Initiating` |
    /// | `Ringing` | `Ringing` |
    /// | `Connected`, `LocalHold`, `RemoteHold` | `Connected` |
    /// | `Disconnecting` | no change |
    /// | `Disconnected` | `Disconnected` |
    ///
    /// A session already past `Initiating` treats a late pre-connect state
    /// as no change.
    pub fn coordinator_state(&self) -> Option<CallState> {
        match self {
            ProviderCallState::None
            | ProviderCallState::Connecting
            | ProviderCallState::EarlyMedia
            | ProviderCallState::InLobby => Some(CallState::Initiating),
            ProviderCallState::Ringing => Some(CallState::Ringing),
            ProviderCallState::Connected
            | ProviderCallState::LocalHold
            | ProviderCallState::RemoteHold => Some(CallState::Connected),
            ProviderCallState::Disconnecting => None,
            ProviderCallState::Disconnected => Some(CallState::Disconnected),
        }
    }
}

/// Entry point of a calling SDK
#[async_trait]
pub trait CallingProvider: Send + Sync {
    /// Create a call agent for `credential`
    ///
    /// The provider keeps `events` and pushes every notification for this
    /// agent (incoming calls, call state changes, participant updates)
    /// through it.
    async fn create_agent(
        &self,
        credential: &Credential,
        events: ProviderEventSink,
    ) -> ProviderResult<Arc<dyn CallAgent>>;
}

/// An authenticated agent able to place calls
#[async_trait]
pub trait CallAgent: Send + Sync {
    fn display_name(&self) -> Option<String> {
        None
    }

    async fn start_call(
        &self,
        targets: &[CallTarget],
        options: &StartCallOptions,
    ) -> ProviderResult<Arc<dyn ProviderCall>>;

    /// Release the agent; no events may be pushed afterwards
    async fn dispose(&self) -> ProviderResult<()>;
}

/// A call the local user is part of
#[async_trait]
pub trait ProviderCall: Send + Sync {
    fn id(&self) -> CallId;

    async fn hang_up(&self, options: HangUpOptions) -> ProviderResult<()>;

    async fn mute(&self) -> ProviderResult<()>;

    async fn unmute(&self) -> ProviderResult<()>;
}

/// An unanswered incoming call
#[async_trait]
pub trait IncomingCallHandle: Send + Sync {
    fn id(&self) -> CallId;

    fn caller_id(&self) -> Option<String>;

    async fn accept(&self) -> ProviderResult<Arc<dyn ProviderCall>>;

    async fn reject(&self) -> ProviderResult<()>;
}

/// A remote participant announced by [`ProviderEvent::ParticipantsUpdated`]
pub trait RemoteParticipant: Send + Sync {
    fn id(&self) -> String;

    fn state(&self) -> ParticipantState;

    /// Start pushing [`ProviderEvent::ParticipantStateChanged`] for this
    /// participant through `events`
    fn subscribe_state(&self, call_id: &CallId, events: ProviderEventSink) -> ProviderResult<()>;
}

/// Audio device access
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Ask the user for media permissions; `Ok(false)` means denied
    async fn ask_device_permission(&self, request: DevicePermissionRequest) -> ProviderResult<bool>;

    async fn microphones(&self) -> ProviderResult<Vec<DeviceInfo>>;

    async fn speakers(&self) -> ProviderResult<Vec<DeviceInfo>>;
}

/// Notification pushed by a provider
#[derive(Clone)]
pub enum ProviderEvent {
    /// A new incoming call is ringing
    IncomingCall { call: Arc<dyn IncomingCallHandle> },
    /// A call changed state
    StateChanged {
        call_id: CallId,
        state: ProviderCallState,
        end_reason: Option<EndReason>,
    },
    /// Remote participants joined or left a call
    ParticipantsUpdated {
        call_id: CallId,
        added: Vec<Arc<dyn RemoteParticipant>>,
        removed: Vec<Arc<dyn RemoteParticipant>>,
    },
    /// A subscribed participant changed state
    ParticipantStateChanged {
        call_id: CallId,
        participant_id: String,
        state: ParticipantState,
    },
}

impl ProviderEvent {
    pub fn call_id(&self) -> CallId {
        match self {
            ProviderEvent::IncomingCall { call } => call.id(),
            ProviderEvent::StateChanged { call_id, .. }
            | ProviderEvent::ParticipantsUpdated { call_id, .. }
            | ProviderEvent::ParticipantStateChanged { call_id, .. } => call_id.clone(),
        }
    }
}

impl fmt::Debug for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderEvent::IncomingCall { call } => f
                .debug_struct("IncomingCall")
                .field("call_id", &call.id())
                .field("caller_id", &call.caller_id())
                .finish(),
            ProviderEvent::StateChanged {
                call_id,
                state,
                end_reason,
            } => f
                .debug_struct("StateChanged")
                .field("call_id", call_id)
                .field("state", state)
                .field("end_reason", end_reason)
                .finish(),
            ProviderEvent::ParticipantsUpdated {
                call_id,
                added,
                removed,
            } => f
                .debug_struct("ParticipantsUpdated")
                .field("call_id", call_id)
                .field("added", &added.iter().map(|p| p.id()).collect::<Vec<_>>())
                .field("removed", &removed.iter().map(|p| p.id()).collect::<Vec<_>>())
                .finish(),
            ProviderEvent::ParticipantStateChanged {
                call_id,
                participant_id,
                state,
            } => f
                .debug_struct("ParticipantStateChanged")
                .field("call_id", call_id)
                .field("participant_id", participant_id)
                .field("state", state)
                .finish(),
        }
    }
}

type ForwardFn = dyn Fn(ProviderEvent) -> bool + Send + Sync;

/// Handle through which a provider pushes [`ProviderEvent`]s
///
/// Cloning is cheap. Pushing never blocks; it returns `false` once the
/// receiving coordinator is gone or the agent the sink belongs to has been
/// replaced.
#[derive(Clone)]
pub struct ProviderEventSink {
    forward: Arc<ForwardFn>,
}

impl ProviderEventSink {
    /// Build a sink from a forwarding function
    pub fn new<F>(forward: F) -> Self
    where
        F: Fn(ProviderEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            forward: Arc::new(forward),
        }
    }

    /// A sink that drops everything
    pub fn detached() -> Self {
        Self::new(|_| false)
    }

    pub fn push(&self, event: ProviderEvent) -> bool {
        (self.forward)(event)
    }
}

impl fmt::Debug for ProviderEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEventSink").finish_non_exhaustive()
    }
}
