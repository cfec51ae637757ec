use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{AgentHandle, CoordinatorSnapshot};
use crate::call::{
    CallId, CallSession, CallState, EndCode, EndReason, ParticipantRef, ParticipantState, Transition,
};
use crate::config::{CoordinatorConfig, HangUpPolicy, IncomingCallPolicy};
use crate::error::{CallError, CallResult, InitError, InitResult};
use crate::events::{CoordinatorEvent, EventNotifier, ObserverRegistry};
use crate::provider::{
    CallAgent, CallTarget, CallingProvider, Credential, DeviceInfo, DevicePermissionRequest,
    DeviceProvider, HangUpOptions, IncomingCallHandle, ProviderCall, ProviderEvent,
    ProviderEventSink, RemoteParticipant, StartCallOptions,
};

pub(super) enum Command {
    Initialize {
        credential: Credential,
        reply: oneshot::Sender<InitResult<AgentHandle>>,
    },
    StartCall {
        target: String,
        reply: oneshot::Sender<CallResult<CallSession>>,
    },
    AcceptPending {
        reply: oneshot::Sender<CallResult<CallSession>>,
    },
    RejectPending {
        reply: oneshot::Sender<CallResult<()>>,
    },
    EndActive {
        for_everyone: bool,
        reply: oneshot::Sender<CallResult<()>>,
    },
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<CallResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<CoordinatorSnapshot>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
    FlushObservers {
        reply: oneshot::Sender<()>,
    },
}

/// One inbox item
pub(super) enum Envelope {
    Command(Command),
    /// Provider notification tagged with the agent generation that produced it
    Provider { generation: u64, event: ProviderEvent },
}

struct ActiveCall {
    session: CallSession,
    call: Arc<dyn ProviderCall>,
}

struct PendingCall {
    session: CallSession,
    handle: Arc<dyn IncomingCallHandle>,
}

struct Agent {
    agent: Arc<dyn CallAgent>,
    handle: AgentHandle,
}

pub(super) struct CoordinatorActor {
    provider: Arc<dyn CallingProvider>,
    devices: Arc<dyn DeviceProvider>,
    config: CoordinatorConfig,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    loopback: mpsc::WeakUnboundedSender<Envelope>,
    notifier: EventNotifier,
    /// Bumped whenever an agent is created or disposed
    generation: Arc<AtomicU64>,
    agent: Option<Agent>,
    active: Option<ActiveCall>,
    pending: Option<PendingCall>,
    queued: VecDeque<PendingCall>,
}

impl CoordinatorActor {
    pub(super) fn new(
        provider: Arc<dyn CallingProvider>,
        devices: Arc<dyn DeviceProvider>,
        config: CoordinatorConfig,
        inbox: mpsc::UnboundedReceiver<Envelope>,
        loopback: mpsc::WeakUnboundedSender<Envelope>,
        observers: Arc<ObserverRegistry>,
        events: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            provider,
            devices,
            config,
            inbox,
            loopback,
            notifier: EventNotifier::spawn(observers, events),
            generation: Arc::new(AtomicU64::new(0)),
            agent: None,
            active: None,
            pending: None,
            queued: VecDeque::new(),
        }
    }

    pub(super) async fn run(mut self) {
        while let Some(envelope) = self.inbox.recv().await {
            match envelope {
                Envelope::Command(command) => self.handle_command(command).await,
                Envelope::Provider { generation, event } => {
                    if generation != self.generation.load(Ordering::SeqCst) {
                        debug!(generation, ?event, "Dropping event from a released call agent");
                        continue;
                    }
                    self.handle_provider_event(event).await;
                }
            }
        }
        if self.agent.is_some() {
            warn!("All coordinator handles dropped while a call agent was still alive");
        }
        info!("Session coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        // A dropped receiver means the caller gave up waiting
        match command {
            Command::Initialize { credential, reply } => {
                let _ = reply.send(self.initialize(credential).await);
            }
            Command::StartCall { target, reply } => {
                let _ = reply.send(self.start_call(target).await);
            }
            Command::AcceptPending { reply } => {
                let _ = reply.send(self.accept_pending().await);
            }
            Command::RejectPending { reply } => {
                let _ = reply.send(self.reject_pending().await);
            }
            Command::EndActive {
                for_everyone,
                reply,
            } => {
                let _ = reply.send(self.end_active(for_everyone).await);
            }
            Command::SetMuted { muted, reply } => {
                let _ = reply.send(self.set_muted(muted).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Dispose { reply } => {
                self.dispose().await;
                let _ = reply.send(());
            }
            Command::FlushObservers { reply } => self.notifier.barrier(reply),
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        self.notifier.emit(event);
    }

    /// Sink handed to the provider for the current agent generation
    fn event_sink(&self) -> ProviderEventSink {
        let loopback = self.loopback.clone();
        let current = self.generation.clone();
        let generation = current.load(Ordering::SeqCst);
        ProviderEventSink::new(move |event| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            match loopback.upgrade() {
                Some(sender) => sender.send(Envelope::Provider { generation, event }).is_ok(),
                None => false,
            }
        })
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            agent: self.agent.as_ref().map(|agent| agent.handle.clone()),
            active: self.active.as_ref().map(|active| active.session.clone()),
            pending: self.pending.as_ref().map(|pending| pending.session.clone()),
            queued: self.queued.iter().map(|queued| queued.session.clone()).collect(),
        }
    }

    async fn initialize(&mut self, credential: Credential) -> InitResult<AgentHandle> {
        if self.agent.is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        credential.validate(Utc::now())?;

        info!(user_id = ?credential.user_id(), "Creating call agent");
        self.generation.fetch_add(1, Ordering::SeqCst);
        let agent = match self
            .provider
            .create_agent(&credential, self.event_sink())
            .await
        {
            Ok(agent) => agent,
            Err(e) => {
                error!("Failed to create call agent: {}", e);
                return Err(InitError::from_agent_creation(e));
            }
        };

        if self.config.request_audio_permission {
            let denied = match self
                .devices
                .ask_device_permission(DevicePermissionRequest::audio_only())
                .await
            {
                Ok(true) => None,
                Ok(false) => Some(InitError::permission_denied("audio access was not granted")),
                Err(e) => Some(InitError::permission_denied(e.to_string())),
            };
            if let Some(denied) = denied {
                error!("Audio device permission denied: {}", denied);
                self.generation.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = agent.dispose().await {
                    warn!("Failed to release call agent after permission denial: {}", e);
                }
                return Err(denied);
            }
            debug!("Audio device permission granted");
        }

        let (microphones, speakers) = if self.config.enumerate_devices {
            self.enumerate_devices().await
        } else {
            (Vec::new(), Vec::new())
        };

        let handle = AgentHandle {
            display_name: agent.display_name(),
            user_id: credential.user_id().map(str::to_string),
            microphones,
            speakers,
            initialized_at: Utc::now(),
        };
        info!(
            display_name = ?handle.display_name,
            microphones = handle.microphones.len(),
            speakers = handle.speakers.len(),
            "Call agent ready"
        );
        self.agent = Some(Agent {
            agent,
            handle: handle.clone(),
        });
        self.emit(CoordinatorEvent::AgentReady {
            agent: handle.clone(),
        });
        Ok(handle)
    }

    async fn enumerate_devices(&self) -> (Vec<DeviceInfo>, Vec<DeviceInfo>) {
        let microphones = match self.devices.microphones().await {
            Ok(microphones) => microphones,
            Err(e) => {
                warn!("Could not enumerate microphones: {}", e);
                return (Vec::new(), Vec::new());
            }
        };
        match self.devices.speakers().await {
            Ok(speakers) => (microphones, speakers),
            Err(e) => {
                warn!("Could not enumerate speakers: {}", e);
                (Vec::new(), Vec::new())
            }
        }
    }

    async fn start_call(&mut self, target: String) -> CallResult<CallSession> {
        let target = target.trim().to_string();
        if target.is_empty() {
            return Err(CallError::invalid_target("target id is empty"));
        }
        let agent = match &self.agent {
            Some(agent) => agent.agent.clone(),
            None => return Err(CallError::NotInitialized),
        };
        if let Some(active) = &self.active {
            return Err(CallError::CallAlreadyActive {
                call_id: active.session.id.clone(),
            });
        }

        info!(target = %target, "Starting outbound call");
        let call = agent
            .start_call(&[CallTarget::new(target.clone())], &StartCallOptions::default())
            .await
            .map_err(|e| {
                error!(target = %target, "Failed to start call: {}", e);
                CallError::from(e)
            })?;

        let session = CallSession::outbound(call.id(), target);
        info!(call_id = %session.id, "Outbound call bound active");
        self.active = Some(ActiveCall {
            session: session.clone(),
            call,
        });
        self.emit(CoordinatorEvent::CallStarted {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn accept_pending(&mut self) -> CallResult<CallSession> {
        let handle = match &self.pending {
            Some(pending) if !pending.session.is_ending => pending.handle.clone(),
            _ => return Err(CallError::NoPendingCall),
        };
        if let Some(active) = &self.active {
            return Err(CallError::CallAlreadyActive {
                call_id: active.session.id.clone(),
            });
        }

        let call = handle.accept().await.map_err(|e| {
            error!(call_id = %handle.id(), "Failed to accept incoming call: {}", e);
            CallError::from(e)
        })?;

        let Some(PendingCall { mut session, .. }) = self.pending.take() else {
            return Err(CallError::NoPendingCall);
        };
        let call_id = call.id();
        if call_id != session.id {
            debug!(incoming_id = %session.id, call_id = %call_id, "Accepted call has a new id");
            session.id = call_id;
        }
        info!(call_id = %session.id, "Incoming call accepted");
        self.active = Some(ActiveCall {
            session: session.clone(),
            call,
        });
        self.emit(CoordinatorEvent::Accepted {
            session: session.clone(),
        });
        self.promote_queued();
        Ok(session)
    }

    async fn reject_pending(&mut self) -> CallResult<()> {
        let handle = match &self.pending {
            Some(pending) if !pending.session.is_ending => pending.handle.clone(),
            _ => return Err(CallError::NoPendingCall),
        };

        handle.reject().await.map_err(|e| {
            error!(call_id = %handle.id(), "Failed to reject incoming call: {}", e);
            CallError::from(e)
        })?;
        info!(call_id = %handle.id(), "Incoming call declined");

        match self.config.hang_up_policy {
            HangUpPolicy::AwaitConfirmation => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.session.is_ending = true;
                    let session = pending.session.clone();
                    self.emit(CoordinatorEvent::Ending { session });
                }
            }
            HangUpPolicy::Optimistic => {
                if let Some(pending) = self.pending.take() {
                    self.finish(pending.session, Some(EndReason::new(EndCode::Declined)));
                }
                self.promote_queued();
            }
        }
        Ok(())
    }

    async fn end_active(&mut self, for_everyone: bool) -> CallResult<()> {
        let call = match &self.active {
            Some(active) if !active.session.is_ending => active.call.clone(),
            _ => return Err(CallError::NoActiveCall),
        };

        info!(call_id = %call.id(), for_everyone, "Hanging up active call");
        call.hang_up(HangUpOptions { for_everyone })
            .await
            .map_err(|e| {
                error!(call_id = %call.id(), "Failed to hang up: {}", e);
                CallError::from(e)
            })?;

        match self.config.hang_up_policy {
            HangUpPolicy::AwaitConfirmation => {
                if let Some(active) = self.active.as_mut() {
                    active.session.is_ending = true;
                    let session = active.session.clone();
                    self.emit(CoordinatorEvent::Ending { session });
                }
            }
            HangUpPolicy::Optimistic => {
                if let Some(active) = self.active.take() {
                    self.finish(active.session, Some(EndReason::local_hangup()));
                }
            }
        }
        Ok(())
    }

    async fn set_muted(&mut self, muted: bool) -> CallResult<()> {
        let (call, currently_muted) = match &self.active {
            Some(active) if !active.session.is_ending => {
                (active.call.clone(), active.session.is_muted)
            }
            _ => return Err(CallError::NoActiveCall),
        };
        if currently_muted == muted {
            return Ok(());
        }

        let result = if muted {
            call.mute().await
        } else {
            call.unmute().await
        };
        result.map_err(|e| {
            error!(call_id = %call.id(), muted, "Failed to change microphone state: {}", e);
            CallError::from(e)
        })?;

        if let Some(active) = self.active.as_mut() {
            active.session.is_muted = muted;
            let call_id = active.session.id.clone();
            debug!(call_id = %call_id, muted, "Microphone state changed");
            self.emit(CoordinatorEvent::MuteChanged { call_id, muted });
        }
        Ok(())
    }

    async fn dispose(&mut self) {
        info!("Disposing session coordinator state");
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(active) = self.active.take() {
            if !active.session.is_ending {
                let options = HangUpOptions {
                    for_everyone: self.config.hang_up_for_everyone,
                };
                if let Err(e) = active.call.hang_up(options).await {
                    warn!(call_id = %active.session.id, "Hang-up during dispose failed: {}", e);
                }
            }
            self.finish(active.session, Some(EndReason::new(EndCode::Disposed)));
        }

        let pending = self.pending.take().into_iter().chain(self.queued.drain(..)).collect::<Vec<_>>();
        for call in pending {
            if !call.session.is_ending {
                if let Err(e) = call.handle.reject().await {
                    warn!(call_id = %call.session.id, "Reject during dispose failed: {}", e);
                }
            }
            self.finish(call.session, Some(EndReason::new(EndCode::Disposed)));
        }

        if let Some(agent) = self.agent.take() {
            if let Err(e) = agent.agent.dispose().await {
                warn!("Failed to release call agent: {}", e);
            }
            self.emit(CoordinatorEvent::AgentDisposed);
        }
    }

    /// Move a session to `Disconnected` and report it; the caller has already unbound it
    fn finish(&self, mut session: CallSession, reason: Option<EndReason>) {
        match session.apply_state(CallState::Disconnected, reason) {
            Transition::Applied { previous } => {
                let reason = session.end_reason.clone().unwrap_or_else(EndReason::unknown);
                info!(call_id = %session.id, reason = %reason, "Call ended");
                self.emit(CoordinatorEvent::StateChanged {
                    session: session.clone(),
                    previous,
                });
                self.emit(CoordinatorEvent::Ended { session, reason });
            }
            other => {
                warn!(call_id = %session.id, ?other, "Unbound a session that was already disconnected");
            }
        }
    }

    /// Fill the empty pending slot from the queue
    fn promote_queued(&mut self) {
        if self.pending.is_some() {
            return;
        }
        if let Some(next) = self.queued.pop_front() {
            info!(call_id = %next.session.id, "Promoting queued incoming call");
            let session = next.session.clone();
            self.pending = Some(next);
            self.emit(CoordinatorEvent::IncomingCall { session });
        }
    }

    async fn handle_provider_event(&mut self, event: ProviderEvent) {
        debug!(?event, "Provider event");
        match event {
            ProviderEvent::IncomingCall { call } => self.on_incoming_call(call).await,
            ProviderEvent::StateChanged {
                call_id,
                state,
                end_reason,
            } => match state.coordinator_state() {
                Some(next) => self.on_state_changed(call_id, next, end_reason),
                None => debug!(call_id = %call_id, ?state, "Provider state has no coordinator mapping"),
            },
            ProviderEvent::ParticipantsUpdated {
                call_id,
                added,
                removed,
            } => self.on_participants_updated(call_id, added, removed),
            ProviderEvent::ParticipantStateChanged {
                call_id,
                participant_id,
                state,
            } => self.on_participant_state_changed(call_id, participant_id, state),
        }
    }

    fn is_known(&self, call_id: &str) -> bool {
        self.active.as_ref().is_some_and(|a| a.session.id == call_id)
            || self.pending.as_ref().is_some_and(|p| p.session.id == call_id)
            || self.queued.iter().any(|q| q.session.id == call_id)
    }

    async fn on_incoming_call(&mut self, handle: Arc<dyn IncomingCallHandle>) {
        let call_id = handle.id();
        let caller_id = handle.caller_id();
        if self.is_known(&call_id) {
            debug!(call_id = %call_id, "Duplicate incoming call notification ignored");
            return;
        }
        info!(call_id = %call_id, caller_id = ?caller_id, "Incoming call received");

        let session = CallSession::inbound(call_id.clone(), caller_id.clone());
        if self.pending.is_none() {
            self.pending = Some(PendingCall {
                session: session.clone(),
                handle,
            });
            self.emit(CoordinatorEvent::IncomingCall { session });
            return;
        }

        match self.config.incoming_policy {
            IncomingCallPolicy::Reject => self.turn_away(handle, caller_id).await,
            IncomingCallPolicy::Queue => {
                if self.queued.len() >= self.config.incoming_queue_capacity {
                    warn!(call_id = %call_id, "Incoming call queue is full");
                    self.turn_away(handle, caller_id).await;
                    return;
                }
                self.queued.push_back(PendingCall {
                    session: session.clone(),
                    handle,
                });
                let position = self.queued.len();
                info!(call_id = %call_id, position, "Incoming call queued");
                self.emit(CoordinatorEvent::IncomingCallQueued { session, position });
            }
            IncomingCallPolicy::Replace => {
                if let Some(displaced) = self.pending.take() {
                    if !displaced.session.is_ending {
                        if let Err(e) = displaced.handle.reject().await {
                            warn!(call_id = %displaced.session.id, "Failed to reject displaced call: {}", e);
                        }
                    }
                    self.finish(displaced.session, Some(EndReason::new(EndCode::Displaced)));
                }
                self.pending = Some(PendingCall {
                    session: session.clone(),
                    handle,
                });
                self.emit(CoordinatorEvent::IncomingCall { session });
            }
        }
    }

    async fn turn_away(&self, handle: Arc<dyn IncomingCallHandle>, caller_id: Option<String>) {
        let call_id = handle.id();
        info!(call_id = %call_id, "Rejecting incoming call while another one is pending");
        if let Err(e) = handle.reject().await {
            warn!(call_id = %call_id, "Failed to reject incoming call: {}", e);
        }
        self.emit(CoordinatorEvent::IncomingCallRejected { call_id, caller_id });
    }

    fn on_state_changed(&mut self, call_id: CallId, next: CallState, end_reason: Option<EndReason>) {
        if let Some(active) = self.active.as_mut().filter(|a| a.session.id == call_id) {
            match active.session.apply_state(next, end_reason) {
                Transition::Applied { previous } => {
                    let session = active.session.clone();
                    info!(call_id = %call_id, from = %previous, to = %next, "Call state changed");
                    self.emit(CoordinatorEvent::StateChanged {
                        session: session.clone(),
                        previous,
                    });
                    match next {
                        CallState::Connected => self.emit(CoordinatorEvent::Connected { session }),
                        CallState::Disconnected => {
                            self.active = None;
                            let reason = session.end_reason.clone().unwrap_or_else(EndReason::unknown);
                            info!(call_id = %call_id, reason = %reason, "Call ended");
                            self.emit(CoordinatorEvent::Ended { session, reason });
                        }
                        _ => {}
                    }
                }
                Transition::Unchanged => {
                    debug!(call_id = %call_id, state = %next, "Call already in reported state");
                }
                Transition::Rejected { current } => {
                    warn!(call_id = %call_id, from = %current, to = %next, "Ignoring illegal call state transition");
                }
            }
            return;
        }

        if self.pending.as_ref().is_some_and(|p| p.session.id == call_id) {
            if next != CallState::Disconnected {
                debug!(call_id = %call_id, state = %next, "Pending call only tracks disconnection");
                return;
            }
            if let Some(pending) = self.pending.take() {
                let reason = end_reason.or_else(|| {
                    pending
                        .session
                        .is_ending
                        .then(|| EndReason::new(EndCode::Declined))
                });
                self.finish(pending.session, reason);
            }
            self.promote_queued();
            return;
        }

        if let Some(pos) = self.queued.iter().position(|q| q.session.id == call_id) {
            if next != CallState::Disconnected {
                debug!(call_id = %call_id, state = %next, "Queued call only tracks disconnection");
                return;
            }
            if let Some(queued) = self.queued.remove(pos) {
                self.finish(queued.session, end_reason);
            }
            return;
        }

        debug!(call_id = %call_id, state = %next, "State change for unknown call ignored");
    }

    fn on_participants_updated(
        &mut self,
        call_id: CallId,
        added: Vec<Arc<dyn RemoteParticipant>>,
        removed: Vec<Arc<dyn RemoteParticipant>>,
    ) {
        if !self.active.as_ref().is_some_and(|a| a.session.id == call_id) {
            debug!(call_id = %call_id, "Participant update for unknown call ignored");
            return;
        }
        debug!(
            call_id = %call_id,
            added = added.len(),
            removed = removed.len(),
            "Remote participants updated"
        );

        let sink = self.event_sink();
        for participant in added {
            let participant_id = participant.id();
            let reference = ParticipantRef::new(participant_id.clone(), participant.state());
            let inserted = self
                .active
                .as_mut()
                .is_some_and(|a| a.session.add_participant(reference.clone()));
            if !inserted {
                debug!(call_id = %call_id, participant_id = %participant_id, "Participant already known");
                continue;
            }
            info!(call_id = %call_id, participant_id = %participant_id, state = ?reference.state, "Remote participant added");
            self.emit(CoordinatorEvent::ParticipantAdded {
                call_id: call_id.clone(),
                participant: reference,
            });

            let subscribed = catch_unwind(AssertUnwindSafe(|| {
                participant.subscribe_state(&call_id, sink.clone())
            }));
            let failure = match subscribed {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("participant subscription panicked".to_string()),
            };
            if let Some(error) = failure {
                warn!(
                    call_id = %call_id,
                    participant_id = %participant_id,
                    "Could not subscribe to participant state: {}",
                    error
                );
                self.emit(CoordinatorEvent::SubscriptionFailed {
                    call_id: call_id.clone(),
                    participant_id,
                    error,
                });
            }
        }

        for participant in removed {
            let participant_id = participant.id();
            let removed = self
                .active
                .as_mut()
                .and_then(|a| a.session.remove_participant(&participant_id));
            match removed {
                Some(reference) => {
                    info!(call_id = %call_id, participant_id = %participant_id, "Remote participant removed");
                    self.emit(CoordinatorEvent::ParticipantRemoved {
                        call_id: call_id.clone(),
                        participant: reference,
                    });
                }
                None => debug!(call_id = %call_id, participant_id = %participant_id, "Removed participant was not known"),
            }
        }
    }

    fn on_participant_state_changed(
        &mut self,
        call_id: CallId,
        participant_id: String,
        state: ParticipantState,
    ) {
        let previous = self
            .active
            .as_mut()
            .filter(|a| a.session.id == call_id)
            .and_then(|a| a.session.update_participant_state(&participant_id, state));
        match previous {
            Some(previous) if previous != state => {
                debug!(call_id = %call_id, participant_id = %participant_id, ?previous, ?state, "Participant state changed");
                self.emit(CoordinatorEvent::ParticipantStateChanged {
                    call_id,
                    participant_id,
                    state,
                });
            }
            Some(_) => {}
            None => debug!(call_id = %call_id, participant_id = %participant_id, "Participant state for unknown participant ignored"),
        }
    }
}
