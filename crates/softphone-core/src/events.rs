//! Coordinator events and observer dispatch
//!
//! Every state change the coordinator makes is described by a
//! [`CoordinatorEvent`]. Events reach consumers two ways:
//!
//! - [`SessionObserver`] implementations registered with
//!   [`SessionCoordinator::subscribe`](crate::SessionCoordinator::subscribe)
//! - raw broadcast receivers from
//!   [`SessionCoordinator::subscribe_events`](crate::SessionCoordinator::subscribe_events)
//!
//! Observers are called from a dispatcher task, never from the task that
//! owns the call slots. An observer may therefore call back into the
//! coordinator (for example accept a call from `on_incoming_call`) without
//! blocking it. Events are handed to observers one at a time, in the order
//! the coordinator produced them; all observers finish an event before the
//! next one is delivered.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error};
use uuid::Uuid;

use crate::call::{CallId, CallSession, CallState, EndReason, ParticipantRef, ParticipantState};
use crate::coordinator::AgentHandle;

/// Identifier of a registered observer
pub type ObserverId = Uuid;

/// Something the coordinator did
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A call agent was created
    AgentReady { agent: AgentHandle },
    /// The call agent was released
    AgentDisposed,
    /// An outbound call was placed and bound active
    CallStarted { session: CallSession },
    /// An incoming call was bound pending
    IncomingCall { session: CallSession },
    /// An incoming call was parked behind the pending one
    IncomingCallQueued { session: CallSession, position: usize },
    /// An incoming call was turned away without being bound
    IncomingCallRejected {
        call_id: CallId,
        caller_id: Option<String>,
    },
    /// The pending call was accepted and is now active
    Accepted { session: CallSession },
    /// A session changed state
    StateChanged {
        session: CallSession,
        previous: CallState,
    },
    /// A session reached `Connected`
    Connected { session: CallSession },
    /// A local hang-up was accepted by the provider
    Ending { session: CallSession },
    /// A session reached `Disconnected` and was unbound
    Ended {
        session: CallSession,
        reason: EndReason,
    },
    ParticipantAdded {
        call_id: CallId,
        participant: ParticipantRef,
    },
    ParticipantRemoved {
        call_id: CallId,
        participant: ParticipantRef,
    },
    ParticipantStateChanged {
        call_id: CallId,
        participant_id: String,
        state: ParticipantState,
    },
    /// Local microphone mute changed on the active call
    MuteChanged { call_id: CallId, muted: bool },
    /// Subscribing to one participant's state failed; the batch went on
    SubscriptionFailed {
        call_id: CallId,
        participant_id: String,
        error: String,
    },
}

impl CoordinatorEvent {
    /// Stable name of the event variant
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorEvent::AgentReady { .. } => "agent_ready",
            CoordinatorEvent::AgentDisposed => "agent_disposed",
            CoordinatorEvent::CallStarted { .. } => "call_started",
            CoordinatorEvent::IncomingCall { .. } => "incoming_call",
            CoordinatorEvent::IncomingCallQueued { .. } => "incoming_call_queued",
            CoordinatorEvent::IncomingCallRejected { .. } => "incoming_call_rejected",
            CoordinatorEvent::Accepted { .. } => "accepted",
            CoordinatorEvent::StateChanged { .. } => "state_changed",
            CoordinatorEvent::Connected { .. } => "connected",
            CoordinatorEvent::Ending { .. } => "ending",
            CoordinatorEvent::Ended { .. } => "ended",
            CoordinatorEvent::ParticipantAdded { .. } => "participant_added",
            CoordinatorEvent::ParticipantRemoved { .. } => "participant_removed",
            CoordinatorEvent::ParticipantStateChanged { .. } => "participant_state_changed",
            CoordinatorEvent::MuteChanged { .. } => "mute_changed",
            CoordinatorEvent::SubscriptionFailed { .. } => "subscription_failed",
        }
    }

    /// Call the event refers to, if any
    pub fn call_id(&self) -> Option<&str> {
        match self {
            CoordinatorEvent::AgentReady { .. } | CoordinatorEvent::AgentDisposed => None,
            CoordinatorEvent::CallStarted { session }
            | CoordinatorEvent::IncomingCall { session }
            | CoordinatorEvent::IncomingCallQueued { session, .. }
            | CoordinatorEvent::Accepted { session }
            | CoordinatorEvent::StateChanged { session, .. }
            | CoordinatorEvent::Connected { session }
            | CoordinatorEvent::Ending { session }
            | CoordinatorEvent::Ended { session, .. } => Some(&session.id),
            CoordinatorEvent::IncomingCallRejected { call_id, .. }
            | CoordinatorEvent::ParticipantAdded { call_id, .. }
            | CoordinatorEvent::ParticipantRemoved { call_id, .. }
            | CoordinatorEvent::ParticipantStateChanged { call_id, .. }
            | CoordinatorEvent::MuteChanged { call_id, .. }
            | CoordinatorEvent::SubscriptionFailed { call_id, .. } => Some(call_id),
        }
    }
}

/// Receives coordinator notifications
///
/// Every method has a no-op default, so implementations only override what
/// they care about. [`on_event`](SessionObserver::on_event) routes each event
/// to the matching method; override it to see the raw events instead.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_agent_ready(&self, _agent: AgentHandle) {}

    async fn on_agent_disposed(&self) {}

    async fn on_call_started(&self, _session: CallSession) {}

    /// Called once per incoming call, when it is bound pending
    async fn on_incoming_call(&self, _session: CallSession) {}

    async fn on_incoming_call_queued(&self, _session: CallSession, _position: usize) {}

    async fn on_incoming_call_rejected(&self, _call_id: CallId, _caller_id: Option<String>) {}

    async fn on_accepted(&self, _session: CallSession) {}

    async fn on_state_changed(&self, _session: CallSession, _previous: CallState) {}

    async fn on_connected(&self, _session: CallSession) {}

    async fn on_ending(&self, _session: CallSession) {}

    /// Called exactly once per session, after it has been unbound
    async fn on_ended(&self, _session: CallSession, _reason: EndReason) {}

    async fn on_participant_added(&self, _call_id: CallId, _participant: ParticipantRef) {}

    async fn on_participant_removed(&self, _call_id: CallId, _participant: ParticipantRef) {}

    async fn on_participant_state_changed(
        &self,
        _call_id: CallId,
        _participant_id: String,
        _state: ParticipantState,
    ) {
    }

    async fn on_mute_changed(&self, _call_id: CallId, _muted: bool) {}

    async fn on_subscription_failed(&self, _call_id: CallId, _participant_id: String, _error: String) {}

    async fn on_event(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::AgentReady { agent } => self.on_agent_ready(agent).await,
            CoordinatorEvent::AgentDisposed => self.on_agent_disposed().await,
            CoordinatorEvent::CallStarted { session } => self.on_call_started(session).await,
            CoordinatorEvent::IncomingCall { session } => self.on_incoming_call(session).await,
            CoordinatorEvent::IncomingCallQueued { session, position } => {
                self.on_incoming_call_queued(session, position).await
            }
            CoordinatorEvent::IncomingCallRejected { call_id, caller_id } => {
                self.on_incoming_call_rejected(call_id, caller_id).await
            }
            CoordinatorEvent::Accepted { session } => self.on_accepted(session).await,
            CoordinatorEvent::StateChanged { session, previous } => {
                self.on_state_changed(session, previous).await
            }
            CoordinatorEvent::Connected { session } => self.on_connected(session).await,
            CoordinatorEvent::Ending { session } => self.on_ending(session).await,
            CoordinatorEvent::Ended { session, reason } => self.on_ended(session, reason).await,
            CoordinatorEvent::ParticipantAdded {
                call_id,
                participant,
            } => self.on_participant_added(call_id, participant).await,
            CoordinatorEvent::ParticipantRemoved {
                call_id,
                participant,
            } => self.on_participant_removed(call_id, participant).await,
            CoordinatorEvent::ParticipantStateChanged {
                call_id,
                participant_id,
                state,
            } => {
                self.on_participant_state_changed(call_id, participant_id, state)
                    .await
            }
            CoordinatorEvent::MuteChanged { call_id, muted } => {
                self.on_mute_changed(call_id, muted).await
            }
            CoordinatorEvent::SubscriptionFailed {
                call_id,
                participant_id,
                error,
            } => {
                self.on_subscription_failed(call_id, participant_id, error)
                    .await
            }
        }
    }
}

/// Observer that only forwards incoming calls to a closure
pub struct IncomingCallObserver<F, Fut> {
    handler: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> IncomingCallObserver<F, Fut>
where
    F: Fn(CallSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> SessionObserver for IncomingCallObserver<F, Fut>
where
    F: Fn(CallSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_incoming_call(&self, session: CallSession) {
        (self.handler)(session).await;
    }
}

/// Registered observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn SessionObserver>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer; returns `false` if the id was unknown
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        match observers.iter().position(|(existing, _)| *existing == id) {
            Some(pos) => {
                observers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver one event to every observer and wait for all of them
    ///
    /// Each observer runs in its own task so a panicking observer is logged
    /// and does not affect the others.
    pub async fn deliver(&self, event: CoordinatorEvent) {
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(id, observer)| (*id, observer.clone()))
            .collect();

        let tasks: Vec<_> = observers
            .into_iter()
            .map(|(id, observer)| {
                let event = event.clone();
                (
                    id,
                    tokio::spawn(async move {
                        observer.on_event(event).await;
                    }),
                )
            })
            .collect();

        for (id, task) in tasks {
            if let Err(e) = task.await {
                error!(observer_id = %id, "Error delivering event to observer: {}", e);
            }
        }
    }
}

enum Dispatch {
    Event(CoordinatorEvent),
    Barrier(oneshot::Sender<()>),
}

/// Fan-out used by the coordinator actor
///
/// Sends every event to raw broadcast subscribers and queues it for the
/// observer dispatcher.
pub(crate) struct EventNotifier {
    broadcast: broadcast::Sender<CoordinatorEvent>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl EventNotifier {
    /// Create the notifier and spawn its observer dispatcher
    pub(crate) fn spawn(
        registry: Arc<ObserverRegistry>,
        broadcast: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        let (dispatch, inbox) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(registry, inbox));
        Self {
            broadcast,
            dispatch,
        }
    }

    pub(crate) fn emit(&self, event: CoordinatorEvent) {
        debug!(kind = event.kind(), call_id = ?event.call_id(), "Emitting coordinator event");
        // No raw subscribers is fine
        let _ = self.broadcast.send(event.clone());
        if self.dispatch.send(Dispatch::Event(event)).is_err() {
            error!("Observer dispatcher has stopped");
        }
    }

    /// Resolve `done` once every event emitted so far reached all observers
    pub(crate) fn barrier(&self, done: oneshot::Sender<()>) {
        if let Err(mpsc::error::SendError(Dispatch::Barrier(done))) =
            self.dispatch.send(Dispatch::Barrier(done))
        {
            let _ = done.send(());
        }
    }
}

async fn run_dispatcher(registry: Arc<ObserverRegistry>, mut inbox: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(item) = inbox.recv().await {
        match item {
            Dispatch::Event(event) => registry.deliver(event).await,
            Dispatch::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Observer dispatcher stopped");
}
