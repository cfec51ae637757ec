//! In-memory providers for tests and demos
//!
//! [`MockCallingProvider`] records every request the coordinator makes and
//! lets the test script provider behavior: failures for individual
//! operations, and notifications pushed with the `push_*` helpers. Pushes go
//! through the same [`ProviderEventSink`] a real SDK binding would use.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
//! use softphone_core::{CoordinatorConfig, Credential, ProviderCallState, SessionCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = MockCallingProvider::new();
//! let coordinator = SessionCoordinator::new(
//!     Arc::new(provider.clone()),
//!     Arc::new(MockDeviceProvider::granting()),
//!     CoordinatorConfig::default(),
//! )?;
//! coordinator.initialize(Credential::new("token")).await?;
//!
//! let session = coordinator.start_call("user123").await?;
//! provider.push_state(&session.id, ProviderCallState::Connected);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::call::{CallId, EndCode, EndReason, ParticipantState};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    CallAgent, CallTarget, CallingProvider, Credential, DeviceInfo, DevicePermissionRequest,
    DeviceProvider, HangUpOptions, IncomingCallHandle, ProviderCall, ProviderCallState,
    ProviderEvent, ProviderEventSink, RemoteParticipant, StartCallOptions,
};

#[derive(Default)]
struct MockState {
    sink: Option<ProviderEventSink>,
    display_name: Option<String>,
    confirm_hang_ups: bool,
    next_call: u64,

    fail_agent_creation: Option<ProviderError>,
    fail_start_call: Option<ProviderError>,
    fail_accept: Option<ProviderError>,
    fail_reject: Option<ProviderError>,
    fail_hang_up: Option<ProviderError>,
    fail_mute: Option<ProviderError>,

    agents_created: usize,
    agents_disposed: usize,
    started: Vec<String>,
    hang_ups: Vec<(CallId, HangUpOptions)>,
    accepted: Vec<CallId>,
    rejected: Vec<CallId>,
    mute_changes: Vec<(CallId, bool)>,
}

impl MockState {
    fn push(&self, event: ProviderEvent) -> bool {
        match &self.sink {
            Some(sink) => sink.push(event),
            None => {
                debug!(?event, "Mock provider has no agent, dropping event");
                false
            }
        }
    }
}

/// Scriptable in-memory calling provider
#[derive(Clone, Default)]
pub struct MockCallingProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockCallingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_name(self, name: impl Into<String>) -> Self {
        self.state.lock().display_name = Some(name.into());
        self
    }

    /// Report `Disconnected` right after every successful hang-up or reject
    pub fn confirming_hang_ups(self) -> Self {
        self.state.lock().confirm_hang_ups = true;
        self
    }

    pub fn fail_agent_creation(&self, error: ProviderError) {
        self.state.lock().fail_agent_creation = Some(error);
    }

    pub fn fail_start_call(&self, error: ProviderError) {
        self.state.lock().fail_start_call = Some(error);
    }

    pub fn fail_accept(&self, error: ProviderError) {
        self.state.lock().fail_accept = Some(error);
    }

    pub fn fail_reject(&self, error: ProviderError) {
        self.state.lock().fail_reject = Some(error);
    }

    pub fn fail_hang_up(&self, error: ProviderError) {
        self.state.lock().fail_hang_up = Some(error);
    }

    pub fn fail_mute(&self, error: ProviderError) {
        self.state.lock().fail_mute = Some(error);
    }

    /// Clear every scripted failure
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_agent_creation = None;
        state.fail_start_call = None;
        state.fail_accept = None;
        state.fail_reject = None;
        state.fail_hang_up = None;
        state.fail_mute = None;
    }

    /// Push a raw provider event; `false` if nobody received it
    pub fn push(&self, event: ProviderEvent) -> bool {
        self.state.lock().push(event)
    }

    pub fn push_state(&self, call_id: &str, state: ProviderCallState) -> bool {
        self.push(ProviderEvent::StateChanged {
            call_id: call_id.to_string(),
            state,
            end_reason: None,
        })
    }

    pub fn push_disconnected(&self, call_id: &str, reason: EndReason) -> bool {
        self.push(ProviderEvent::StateChanged {
            call_id: call_id.to_string(),
            state: ProviderCallState::Disconnected,
            end_reason: Some(reason),
        })
    }

    /// Ring the agent with a new incoming call
    pub fn push_incoming(&self, call_id: &str, caller_id: Option<&str>) -> bool {
        let call = MockIncomingCall {
            id: call_id.to_string(),
            caller_id: caller_id.map(str::to_string),
            state: self.state.clone(),
        };
        self.push(ProviderEvent::IncomingCall {
            call: Arc::new(call),
        })
    }

    pub fn push_participants(
        &self,
        call_id: &str,
        added: Vec<Arc<dyn RemoteParticipant>>,
        removed: Vec<Arc<dyn RemoteParticipant>>,
    ) -> bool {
        self.push(ProviderEvent::ParticipantsUpdated {
            call_id: call_id.to_string(),
            added,
            removed,
        })
    }

    pub fn has_agent(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    pub fn agents_created(&self) -> usize {
        self.state.lock().agents_created
    }

    pub fn agents_disposed(&self) -> usize {
        self.state.lock().agents_disposed
    }

    /// Targets passed to `start_call`, in order
    pub fn started_targets(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn hang_ups(&self) -> Vec<(CallId, HangUpOptions)> {
        self.state.lock().hang_ups.clone()
    }

    pub fn accepted(&self) -> Vec<CallId> {
        self.state.lock().accepted.clone()
    }

    pub fn rejected(&self) -> Vec<CallId> {
        self.state.lock().rejected.clone()
    }

    pub fn mute_changes(&self) -> Vec<(CallId, bool)> {
        self.state.lock().mute_changes.clone()
    }
}

#[async_trait]
impl CallingProvider for MockCallingProvider {
    async fn create_agent(
        &self,
        credential: &Credential,
        events: ProviderEventSink,
    ) -> ProviderResult<Arc<dyn CallAgent>> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_agent_creation.clone() {
            return Err(error);
        }
        state.agents_created += 1;
        state.sink = Some(events);
        debug!(user_id = ?credential.user_id(), "Mock call agent created");
        Ok(Arc::new(MockAgent {
            state: self.state.clone(),
        }))
    }
}

/// Agent returned by [`MockCallingProvider`]
pub struct MockAgent {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl CallAgent for MockAgent {
    fn display_name(&self) -> Option<String> {
        self.state.lock().display_name.clone()
    }

    async fn start_call(
        &self,
        targets: &[CallTarget],
        _options: &StartCallOptions,
    ) -> ProviderResult<Arc<dyn ProviderCall>> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_start_call.clone() {
            return Err(error);
        }
        state.next_call += 1;
        let id = format!("mock-call-{}", state.next_call);
        state
            .started
            .extend(targets.iter().map(|target| target.id.clone()));
        Ok(Arc::new(MockCall {
            id,
            state: self.state.clone(),
        }))
    }

    async fn dispose(&self) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.agents_disposed += 1;
        state.sink = None;
        Ok(())
    }
}

/// Call returned by [`MockAgent::start_call`] and [`MockIncomingCall::accept`]
pub struct MockCall {
    id: CallId,
    state: Arc<Mutex<MockState>>,
}

impl MockCall {
    fn set_muted(&self, muted: bool) -> ProviderResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_mute.clone() {
            return Err(error);
        }
        state.mute_changes.push((self.id.clone(), muted));
        Ok(())
    }
}

#[async_trait]
impl ProviderCall for MockCall {
    fn id(&self) -> CallId {
        self.id.clone()
    }

    async fn hang_up(&self, options: HangUpOptions) -> ProviderResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_hang_up.clone() {
            return Err(error);
        }
        state.hang_ups.push((self.id.clone(), options));
        if state.confirm_hang_ups {
            state.push(ProviderEvent::StateChanged {
                call_id: self.id.clone(),
                state: ProviderCallState::Disconnected,
                end_reason: Some(EndReason::local_hangup()),
            });
        }
        Ok(())
    }

    async fn mute(&self) -> ProviderResult<()> {
        self.set_muted(true)
    }

    async fn unmute(&self) -> ProviderResult<()> {
        self.set_muted(false)
    }
}

/// Incoming call pushed by [`MockCallingProvider::push_incoming`]
pub struct MockIncomingCall {
    id: CallId,
    caller_id: Option<String>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl IncomingCallHandle for MockIncomingCall {
    fn id(&self) -> CallId {
        self.id.clone()
    }

    fn caller_id(&self) -> Option<String> {
        self.caller_id.clone()
    }

    async fn accept(&self) -> ProviderResult<Arc<dyn ProviderCall>> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_accept.clone() {
            return Err(error);
        }
        state.accepted.push(self.id.clone());
        Ok(Arc::new(MockCall {
            id: self.id.clone(),
            state: self.state.clone(),
        }))
    }

    async fn reject(&self) -> ProviderResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_reject.clone() {
            return Err(error);
        }
        state.rejected.push(self.id.clone());
        if state.confirm_hang_ups {
            state.push(ProviderEvent::StateChanged {
                call_id: self.id.clone(),
                state: ProviderCallState::Disconnected,
                end_reason: Some(EndReason::new(EndCode::Declined)),
            });
        }
        Ok(())
    }
}

enum Fault {
    Error,
    Panic,
}

/// Remote participant whose state can be driven by the test
pub struct MockParticipant {
    id: String,
    state: Mutex<ParticipantState>,
    fault: Option<Fault>,
    subscription: Mutex<Option<(CallId, ProviderEventSink)>>,
}

impl MockParticipant {
    pub fn new(id: impl Into<String>, state: ParticipantState) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(state),
            fault: None,
            subscription: Mutex::new(None),
        })
    }

    /// A participant whose state subscription fails
    pub fn faulting(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(ParticipantState::Connecting),
            fault: Some(Fault::Error),
            subscription: Mutex::new(None),
        })
    }

    /// A participant whose state subscription panics
    pub fn panicking(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(ParticipantState::Connecting),
            fault: Some(Fault::Panic),
            subscription: Mutex::new(None),
        })
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Change state and notify the subscriber, if any
    pub fn set_state(&self, state: ParticipantState) -> bool {
        *self.state.lock() = state;
        match &*self.subscription.lock() {
            Some((call_id, sink)) => sink.push(ProviderEvent::ParticipantStateChanged {
                call_id: call_id.clone(),
                participant_id: self.id.clone(),
                state,
            }),
            None => false,
        }
    }
}

impl RemoteParticipant for MockParticipant {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn state(&self) -> ParticipantState {
        *self.state.lock()
    }

    fn subscribe_state(&self, call_id: &CallId, events: ProviderEventSink) -> ProviderResult<()> {
        match self.fault {
            Some(Fault::Error) => Err(ProviderError::failed(format!(
                "participant {} rejected the state subscription",
                self.id
            ))),
            Some(Fault::Panic) => panic!("participant {} state stream is broken", self.id),
            None => {
                *self.subscription.lock() = Some((call_id.clone(), events));
                Ok(())
            }
        }
    }
}

/// Scriptable device provider
pub struct MockDeviceProvider {
    permission: Result<bool, ProviderError>,
    fail_enumeration: bool,
    microphones: Vec<DeviceInfo>,
    speakers: Vec<DeviceInfo>,
    requests: Mutex<Vec<DevicePermissionRequest>>,
}

impl MockDeviceProvider {
    fn with_permission(permission: Result<bool, ProviderError>) -> Self {
        Self {
            permission,
            fail_enumeration: false,
            microphones: vec![DeviceInfo::new("mic-0", "Built-in Microphone").as_default()],
            speakers: vec![
                DeviceInfo::new("spk-0", "Built-in Speakers").as_default(),
                DeviceInfo::new("spk-1", "Headset"),
            ],
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Grants every permission request
    pub fn granting() -> Self {
        Self::with_permission(Ok(true))
    }

    /// Denies every permission request
    pub fn denying() -> Self {
        Self::with_permission(Ok(false))
    }

    /// Fails every permission request with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::with_permission(Err(error))
    }

    /// Grants permission but fails device enumeration
    pub fn with_failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    pub fn permission_requests(&self) -> Vec<DevicePermissionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DeviceProvider for MockDeviceProvider {
    async fn ask_device_permission(&self, request: DevicePermissionRequest) -> ProviderResult<bool> {
        self.requests.lock().push(request);
        self.permission.clone()
    }

    async fn microphones(&self) -> ProviderResult<Vec<DeviceInfo>> {
        if self.fail_enumeration {
            return Err(ProviderError::unavailable("device enumeration is not supported"));
        }
        Ok(self.microphones.clone())
    }

    async fn speakers(&self) -> ProviderResult<Vec<DeviceInfo>> {
        if self.fail_enumeration {
            return Err(ProviderError::unavailable("device enumeration is not supported"));
        }
        Ok(self.speakers.clone())
    }
}
