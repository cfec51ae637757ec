//! Call panel: the softphone's controls, driven by coordinator events
//!
//! [`CallPanel`] mirrors what a softphone window shows: which buttons are
//! enabled, a status line and a call quality label. It never changes call
//! state by itself; it only reacts to [`CoordinatorEvent`]s, so the panel
//! is always consistent with the coordinator.
//!
//! | Event | Effect |
//! |-------|--------|
//! | agent ready | call enabled, token submission disabled |
//! | call started / accepted | hang-up enabled, call disabled |
//! | incoming call | accept enabled, call disabled |
//! | connected | voice controls enabled |
//! | ending / ended | panel back to idle, voice controls reset |

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use softphone_core::{
    CallId, CallResult, CoordinatorEvent, SessionCoordinator, SessionObserver,
};
use thiserror::Error;
use tracing::{debug, info, warn};

const VOLUME_STEP: f32 = 0.1;

/// Enabled state of each control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub submit_token: bool,
    pub call: bool,
    pub hang_up: bool,
    pub accept: bool,
    pub voice_controls: bool,
}

impl Affordances {
    /// Before a token has been submitted
    pub fn initial() -> Self {
        Self {
            submit_token: true,
            call: false,
            hang_up: false,
            accept: false,
            voice_controls: false,
        }
    }
}

impl Default for Affordances {
    fn default() -> Self {
        Self::initial()
    }
}

/// Why a voice control request was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("Voice controls are only available during a connected call")]
    Disabled,
    #[error("Cannot adjust volume - speaker is muted")]
    SpeakerMuted,
    #[error("No speakers detected")]
    NoSpeakers,
}

/// Local audio controls for the connected call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceControls {
    enabled: bool,
    microphone_muted: bool,
    speaker_muted: bool,
    volume: f32,
    speakers: usize,
}

impl VoiceControls {
    pub fn new() -> Self {
        Self {
            enabled: false,
            microphone_muted: false,
            speaker_muted: false,
            volume: 1.0,
            speakers: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn microphone_muted(&self) -> bool {
        self.microphone_muted
    }

    pub fn speaker_muted(&self) -> bool {
        self.speaker_muted
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Volume as a whole percentage
    pub fn volume_percent(&self) -> u32 {
        (self.volume * 100.0).round() as u32
    }

    /// Volume the speaker actually plays at
    pub fn effective_volume(&self) -> f32 {
        if self.speaker_muted { 0.0 } else { self.volume }
    }

    pub fn toggle_speaker(&mut self) -> Result<bool, ControlError> {
        if !self.enabled {
            return Err(ControlError::Disabled);
        }
        if self.speakers == 0 {
            return Err(ControlError::NoSpeakers);
        }
        self.speaker_muted = !self.speaker_muted;
        debug!(muted = self.speaker_muted, "Speaker toggled");
        Ok(self.speaker_muted)
    }

    pub fn volume_up(&mut self) -> Result<f32, ControlError> {
        self.step_volume(VOLUME_STEP)
    }

    pub fn volume_down(&mut self) -> Result<f32, ControlError> {
        self.step_volume(-VOLUME_STEP)
    }

    fn step_volume(&mut self, delta: f32) -> Result<f32, ControlError> {
        if !self.enabled {
            return Err(ControlError::Disabled);
        }
        if self.speaker_muted {
            warn!("Cannot adjust volume - speaker is muted");
            return Err(ControlError::SpeakerMuted);
        }
        // Snap to tenths so repeated steps land exactly on 0.0 and 1.0
        let next = ((self.volume + delta) * 10.0).round() / 10.0;
        self.volume = next.clamp(0.0, 1.0);
        debug!(volume = self.volume, "Volume changed");
        Ok(self.volume)
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    /// Back to defaults: disabled, unmuted, full volume
    fn reset(&mut self) {
        let speakers = self.speakers;
        *self = Self::new();
        self.speakers = speakers;
    }
}

impl Default for VoiceControls {
    fn default() -> Self {
        Self::new()
    }
}

/// View state of a softphone window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallPanel {
    affordances: Affordances,
    voice: VoiceControls,
    status: String,
    quality: String,
    active_call: Option<CallId>,
    pending_call: Option<CallId>,
    agent_ready: bool,
}

impl CallPanel {
    pub fn new() -> Self {
        Self {
            affordances: Affordances::initial(),
            voice: VoiceControls::new(),
            status: "Submit a token to start".to_string(),
            quality: "Call Quality: Not connected".to_string(),
            active_call: None,
            pending_call: None,
            agent_ready: false,
        }
    }

    pub fn affordances(&self) -> Affordances {
        self.affordances
    }

    pub fn voice(&self) -> &VoiceControls {
        &self.voice
    }

    pub fn voice_mut(&mut self) -> &mut VoiceControls {
        &mut self.voice
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn active_call(&self) -> Option<&str> {
        self.active_call.as_deref()
    }

    pub fn pending_call(&self) -> Option<&str> {
        self.pending_call.as_deref()
    }

    pub fn is_agent_ready(&self) -> bool {
        self.agent_ready
    }

    /// Calling is possible once signed in and while no call is bound
    fn can_call(&self) -> bool {
        self.agent_ready && self.active_call.is_none() && self.pending_call.is_none()
    }

    /// Update the panel for one coordinator event
    pub fn apply(&mut self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::AgentReady { agent } => {
                self.agent_ready = true;
                self.affordances.call = self.can_call();
                self.affordances.submit_token = false;
                self.voice.speakers = agent.speakers.len();
                self.status = match &agent.display_name {
                    Some(name) => format!("Signed in as {}", name),
                    None => "Call agent ready".to_string(),
                };
            }
            CoordinatorEvent::AgentDisposed => {
                *self = Self::new();
            }
            CoordinatorEvent::CallStarted { session } => {
                self.active_call = Some(session.id.clone());
                self.affordances.hang_up = true;
                self.affordances.call = false;
                self.status = format!(
                    "Calling {}...",
                    session.remote_id.as_deref().unwrap_or("unknown")
                );
            }
            CoordinatorEvent::IncomingCall { session } => {
                self.pending_call = Some(session.id.clone());
                self.affordances.accept = true;
                self.affordances.call = false;
                self.status = format!(
                    "Incoming call from {}",
                    session.remote_id.as_deref().unwrap_or("Unknown")
                );
            }
            CoordinatorEvent::IncomingCallQueued { session, position } => {
                self.status = format!(
                    "Call from {} waiting ({} in line)",
                    session.remote_id.as_deref().unwrap_or("Unknown"),
                    position
                );
            }
            CoordinatorEvent::IncomingCallRejected { caller_id, .. } => {
                info!(caller_id = ?caller_id, "Busy: incoming call turned away");
            }
            CoordinatorEvent::Accepted { session } => {
                self.pending_call = None;
                self.active_call = Some(session.id.clone());
                self.affordances.accept = false;
                self.affordances.hang_up = true;
                self.affordances.call = false;
                self.status = "Call accepted".to_string();
            }
            CoordinatorEvent::StateChanged { .. } => {}
            CoordinatorEvent::Connected { session } => {
                if self.active_call.as_deref() == Some(session.id.as_str()) {
                    self.voice.enable();
                    self.affordances.voice_controls = true;
                    self.status = "Voice controls active - Call connected".to_string();
                    self.quality = "Call Quality: Connected".to_string();
                }
            }
            CoordinatorEvent::Ending { session } => {
                // The call stays bound until the provider confirms
                if self.active_call.as_deref() == Some(session.id.as_str()) {
                    self.affordances.hang_up = false;
                    self.affordances.call = false;
                    self.silence();
                    self.status = "Hanging up...".to_string();
                }
            }
            CoordinatorEvent::Ended { session, reason } => {
                if self.active_call.as_deref() == Some(session.id.as_str()) {
                    self.active_call = None;
                    self.call_over();
                    self.status = format!("Call ended: {}", reason);
                } else if self.pending_call.as_deref() == Some(session.id.as_str()) {
                    self.pending_call = None;
                    self.affordances.accept = false;
                    self.affordances.call = self.can_call();
                    self.status = format!("Incoming call ended: {}", reason);
                }
            }
            CoordinatorEvent::MuteChanged { muted, .. } => {
                self.voice.microphone_muted = *muted;
                self.status = if *muted {
                    "Microphone: Muted - Others cannot hear you".to_string()
                } else {
                    "Microphone: Active - You can speak".to_string()
                };
            }
            CoordinatorEvent::ParticipantAdded { participant, .. } => {
                debug!(participant_id = %participant.id, "Participant joined");
            }
            CoordinatorEvent::ParticipantRemoved { participant, .. } => {
                debug!(participant_id = %participant.id, "Participant left");
            }
            CoordinatorEvent::ParticipantStateChanged { .. } => {}
            CoordinatorEvent::SubscriptionFailed { participant_id, error, .. } => {
                warn!(participant_id = %participant_id, "Participant updates unavailable: {}", error);
            }
        }
    }

    /// Controls after the active call has been unbound
    fn call_over(&mut self) {
        self.affordances.hang_up = false;
        self.affordances.accept = self.pending_call.is_some();
        self.affordances.call = self.can_call();
        self.affordances.submit_token = !self.agent_ready;
        self.silence();
    }

    fn silence(&mut self) {
        self.affordances.voice_controls = false;
        self.voice.reset();
        self.quality = "Call Quality: Not connected".to_string();
    }

    /// Ask the coordinator to flip the microphone
    ///
    /// The panel itself changes when the resulting mute event arrives.
    pub async fn toggle_microphone(&self, coordinator: &SessionCoordinator) -> CallResult<bool> {
        let mute = !self.voice.microphone_muted;
        if mute {
            coordinator.mute_active().await?;
        } else {
            coordinator.unmute_active().await?;
        }
        Ok(mute)
    }
}

impl Default for CallPanel {
    fn default() -> Self {
        Self::new()
    }
}

/// [`CallPanel`] shared with the coordinator as an observer
#[derive(Clone, Default)]
pub struct SharedPanel {
    inner: Arc<Mutex<CallPanel>>,
}

impl SharedPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current panel state
    pub fn view(&self) -> CallPanel {
        self.inner.lock().clone()
    }

    pub fn with_voice<T>(&self, f: impl FnOnce(&mut VoiceControls) -> T) -> T {
        f(self.inner.lock().voice_mut())
    }
}

#[async_trait]
impl SessionObserver for SharedPanel {
    async fn on_event(&self, event: CoordinatorEvent) {
        self.inner.lock().apply(&event);
    }
}
