//! Session coordinator
//!
//! [`SessionCoordinator`] owns the two call slots of a softphone:
//!
//! - the **active** slot: an outbound call placed with
//!   [`start_call`](SessionCoordinator::start_call) or an accepted incoming call
//! - the **pending** slot: an incoming call that is still ringing
//!
//! The slots live inside a single actor task. Caller operations and provider
//! notifications are both messages in the actor's inbox and are handled one
//! at a time in arrival order, so no two mutations ever interleave. The
//! handle returned by [`SessionCoordinator::new`] is cheap to clone; the actor
//! stops once every handle has been dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softphone_core::{CoordinatorConfig, Credential, SessionCoordinator};
//! use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = SessionCoordinator::new(
//!     Arc::new(MockCallingProvider::new()),
//!     Arc::new(MockDeviceProvider::granting()),
//!     CoordinatorConfig::default(),
//! )?;
//!
//! coordinator.initialize(Credential::new("token")).await?;
//! let session = coordinator.start_call("user123").await?;
//! println!("calling {} ({})", session.id, session.state);
//!
//! coordinator.end_active(true).await?;
//! # Ok(())
//! # }
//! ```

mod actor;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::call::CallSession;
use crate::config::{ConfigError, CoordinatorConfig};
use crate::error::{CallError, CallResult, InitError, InitResult};
use crate::events::{CoordinatorEvent, IncomingCallObserver, ObserverId, ObserverRegistry, SessionObserver};
use crate::provider::{CallingProvider, Credential, DeviceInfo, DeviceProvider};

use actor::{Command, CoordinatorActor, Envelope};

/// Result of a successful [`SessionCoordinator::initialize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHandle {
    /// Display name reported by the call agent
    pub display_name: Option<String>,
    /// User id carried by the credential
    pub user_id: Option<String>,
    /// Microphones found during initialization; empty if enumeration failed
    pub microphones: Vec<DeviceInfo>,
    /// Speakers found during initialization; empty if enumeration failed
    pub speakers: Vec<DeviceInfo>,
    pub initialized_at: DateTime<Utc>,
}

/// Read-only copy of the coordinator state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub agent: Option<AgentHandle>,
    pub active: Option<CallSession>,
    pub pending: Option<CallSession>,
    /// Incoming calls parked behind the pending one, oldest first
    pub queued: Vec<CallSession>,
}

impl CoordinatorSnapshot {
    pub fn is_initialized(&self) -> bool {
        self.agent.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_none() && self.queued.is_empty()
    }
}

/// Handle to the call-session coordinator
#[derive(Clone)]
pub struct SessionCoordinator {
    commands: mpsc::UnboundedSender<Envelope>,
    observers: Arc<ObserverRegistry>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl SessionCoordinator {
    /// Create a coordinator and spawn its actor
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        provider: Arc<dyn CallingProvider>,
        devices: Arc<dyn DeviceProvider>,
        config: CoordinatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let observers = Arc::new(ObserverRegistry::new());

        let actor = CoordinatorActor::new(
            provider,
            devices,
            config,
            inbox,
            commands.downgrade(),
            observers.clone(),
            events.clone(),
        );
        tokio::spawn(actor.run());
        info!("Session coordinator started");

        Ok(Self {
            commands,
            observers,
            events,
        })
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope::Command(command(reply)))
            .ok()?;
        response.await.ok()
    }

    /// Establish the provider session
    ///
    /// Validates the credential, creates the call agent, asks for audio
    /// permission and lists audio devices. Device listing failures are only
    /// logged. From now on the provider's incoming calls are routed to the
    /// pending slot.
    pub async fn initialize(&self, credential: Credential) -> InitResult<AgentHandle> {
        self.request(|reply| Command::Initialize { credential, reply })
            .await
            .unwrap_or(Err(InitError::CoordinatorClosed))
    }

    /// Place an outbound call to `target_id` and bind it active
    ///
    /// Errors: [`CallError::InvalidTarget`] for an empty target,
    /// [`CallError::NotInitialized`] without agent and
    /// [`CallError::CallAlreadyActive`] while a call is active.
    pub async fn start_call(&self, target_id: impl Into<String>) -> CallResult<CallSession> {
        let target = target_id.into();
        self.request(|reply| Command::StartCall { target, reply })
            .await
            .unwrap_or(Err(CallError::CoordinatorClosed))
    }

    /// Accept the pending incoming call and make it active
    pub async fn accept_pending(&self) -> CallResult<CallSession> {
        self.request(|reply| Command::AcceptPending { reply })
            .await
            .unwrap_or(Err(CallError::CoordinatorClosed))
    }

    /// Decline the pending incoming call
    pub async fn reject_pending(&self) -> CallResult<()> {
        self.request(|reply| Command::RejectPending { reply })
            .await
            .unwrap_or(Err(CallError::CoordinatorClosed))
    }

    /// Hang up the active call
    ///
    /// Calling this again before the call is gone returns
    /// [`CallError::NoActiveCall`].
    pub async fn end_active(&self, for_everyone: bool) -> CallResult<()> {
        self.request(|reply| Command::EndActive {
            for_everyone,
            reply,
        })
        .await
        .unwrap_or(Err(CallError::CoordinatorClosed))
    }

    /// Mute the local microphone on the active call
    pub async fn mute_active(&self) -> CallResult<()> {
        self.set_muted(true).await
    }

    /// Unmute the local microphone on the active call
    pub async fn unmute_active(&self) -> CallResult<()> {
        self.set_muted(false).await
    }

    async fn set_muted(&self, muted: bool) -> CallResult<()> {
        self.request(|reply| Command::SetMuted { muted, reply })
            .await
            .unwrap_or(Err(CallError::CoordinatorClosed))
    }

    /// Copy of the current state
    ///
    /// The snapshot reflects every operation and provider notification
    /// submitted before this call.
    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        self.request(|reply| Command::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    /// End all calls and release the call agent
    ///
    /// The active call is hung up and pending or queued calls are declined;
    /// each ends with [`EndCode::Disposed`](crate::call::EndCode::Disposed).
    /// Provider failures are logged. The coordinator can be initialized
    /// again afterwards.
    pub async fn dispose(&self) {
        let _ = self.request(|reply| Command::Dispose { reply }).await;
    }

    /// Wait until observers have handled every event emitted so far
    ///
    /// Must not be awaited from inside an observer callback: the dispatcher
    /// is waiting for that callback to return.
    pub async fn flush_observers(&self) {
        let _ = self.request(|reply| Command::FlushObservers { reply }).await;
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Register `handler` to run once for every incoming call bound pending
    pub fn on_incoming_call<F, Fut>(&self, handler: F) -> ObserverId
    where
        F: Fn(CallSession) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.subscribe(Arc::new(IncomingCallObserver::new(handler)))
    }

    /// Raw event receiver
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Raw events as a stream; events missed by a lagging reader are skipped
    pub fn event_stream(&self) -> impl Stream<Item = CoordinatorEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }
}
