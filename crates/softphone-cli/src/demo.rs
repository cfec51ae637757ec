//! Scripted softphone session against the in-memory provider
//!
//! Walks through a complete outbound call and an accepted incoming call,
//! capturing the call panel after every step.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use parking_lot::Mutex;
use softphone_core::mock::{MockCallingProvider, MockDeviceProvider, MockParticipant};
use softphone_core::{
    CoordinatorConfig, CoordinatorEvent, Credential, EndReason, ParticipantState,
    ProviderCallState, RemoteParticipant, SessionCoordinator, SessionObserver,
};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

use crate::presentation::{Affordances, CallPanel, SharedPanel};

const DEMO_TARGET: &str = "user123";
const DEMO_CALLER: &str = "8:acs:demo-caller";
const DEMO_INCOMING_ID: &str = "call-42";

/// Panel state captured after one step
#[derive(Debug, Clone)]
pub struct DemoStep {
    pub label: String,
    pub panel: CallPanel,
}

/// One coordinator event as seen by the demo
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct EventRecord {
    #[tabled(rename = "event")]
    pub kind: &'static str,
    #[tabled(rename = "call", display_with = "display_call")]
    pub call_id: Option<String>,
    pub detail: String,
}

fn display_call(call_id: &Option<String>) -> String {
    call_id.clone().unwrap_or_else(|| "-".to_string())
}

impl EventRecord {
    fn from_event(event: &CoordinatorEvent) -> Self {
        let detail = match event {
            CoordinatorEvent::AgentReady { agent } => format!(
                "{} microphone(s), {} speaker(s)",
                agent.microphones.len(),
                agent.speakers.len()
            ),
            CoordinatorEvent::StateChanged { session, previous } => {
                format!("{} -> {}", previous, session.state)
            }
            CoordinatorEvent::Ended { reason, .. } => reason.to_string(),
            CoordinatorEvent::IncomingCall { session } | CoordinatorEvent::CallStarted { session } => {
                session.remote_id.clone().unwrap_or_default()
            }
            CoordinatorEvent::IncomingCallQueued { position, .. } => format!("position {}", position),
            CoordinatorEvent::ParticipantAdded { participant, .. }
            | CoordinatorEvent::ParticipantRemoved { participant, .. } => {
                format!("{} ({:?})", participant.id, participant.state)
            }
            CoordinatorEvent::ParticipantStateChanged {
                participant_id,
                state,
                ..
            } => format!("{} -> {:?}", participant_id, state),
            CoordinatorEvent::MuteChanged { muted, .. } => {
                if *muted { "muted" } else { "unmuted" }.to_string()
            }
            CoordinatorEvent::SubscriptionFailed {
                participant_id,
                error,
                ..
            } => format!("{}: {}", participant_id, error),
            _ => String::new(),
        };
        Self {
            kind: event.kind(),
            call_id: event.call_id().map(str::to_string),
            detail,
        }
    }
}

#[derive(Default)]
struct EventLog {
    records: Mutex<Vec<EventRecord>>,
}

#[async_trait]
impl SessionObserver for EventLog {
    async fn on_event(&self, event: CoordinatorEvent) {
        self.records.lock().push(EventRecord::from_event(&event));
    }
}

/// Everything the demo observed
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub steps: Vec<DemoStep>,
    pub events: Vec<EventRecord>,
}

impl DemoReport {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(|record| record.kind).collect()
    }

    pub fn step(&self, label: &str) -> Option<&DemoStep> {
        self.steps.iter().find(|step| step.label == label)
    }
}

struct Demo {
    coordinator: SessionCoordinator,
    provider: MockCallingProvider,
    panel: SharedPanel,
    steps: Vec<DemoStep>,
}

impl Demo {
    async fn capture(&mut self, label: &str) {
        self.coordinator.flush_observers().await;
        info!(step = label, "Demo step complete");
        self.steps.push(DemoStep {
            label: label.to_string(),
            panel: self.panel.view(),
        });
    }
}

/// Run the scripted session and collect what happened
pub async fn run_demo(config: CoordinatorConfig) -> Result<DemoReport> {
    let provider = MockCallingProvider::new()
        .with_display_name("Demo User")
        .confirming_hang_ups();
    let coordinator = SessionCoordinator::new(
        Arc::new(provider.clone()),
        Arc::new(MockDeviceProvider::granting()),
        config,
    )
    .context("Invalid coordinator configuration")?;

    let panel = SharedPanel::new();
    let log = Arc::new(EventLog::default());
    coordinator.subscribe(Arc::new(panel.clone()));
    coordinator.subscribe(log.clone());

    let mut demo = Demo {
        coordinator,
        provider,
        panel,
        steps: Vec::new(),
    };
    demo.capture("Start").await;

    demo.coordinator
        .initialize(Credential::new("demo-token").with_user_id("8:acs:demo-user"))
        .await
        .context("Failed to initialize call agent")?;
    demo.capture("Token submitted").await;

    let session = demo
        .coordinator
        .start_call(DEMO_TARGET)
        .await
        .context("Failed to start call")?;
    demo.capture("Calling").await;

    demo.provider.push_state(&session.id, ProviderCallState::Ringing);
    demo.provider
        .push_state(&session.id, ProviderCallState::Connected);
    demo.capture("Connected").await;

    let participants: Vec<Arc<dyn RemoteParticipant>> = vec![
        MockParticipant::new(DEMO_TARGET, ParticipantState::Connected) as Arc<dyn RemoteParticipant>,
        MockParticipant::faulting("observer-bot"),
    ];
    demo.provider
        .push_participants(&session.id, participants, vec![]);
    demo.capture("Participants joined").await;

    let current = demo.panel.view();
    current
        .toggle_microphone(&demo.coordinator)
        .await
        .context("Failed to mute microphone")?;
    demo.panel.with_voice(|voice| {
        let _ = voice.volume_down();
        let _ = voice.volume_down();
        let _ = voice.toggle_speaker();
    });
    demo.capture("Muted, volume down, speaker off").await;

    demo.coordinator
        .end_active(true)
        .await
        .context("Failed to hang up")?;
    demo.capture("Hung up").await;

    demo.provider
        .push_incoming(DEMO_INCOMING_ID, Some(DEMO_CALLER));
    demo.capture("Incoming call").await;

    demo.coordinator
        .accept_pending()
        .await
        .context("Failed to accept incoming call")?;
    demo.provider
        .push_state(DEMO_INCOMING_ID, ProviderCallState::Connected);
    demo.capture("Accepted").await;

    demo.provider
        .push_disconnected(DEMO_INCOMING_ID, EndReason::remote_hangup());
    demo.capture("Caller hung up").await;

    demo.coordinator.dispose().await;
    demo.coordinator.flush_observers().await;

    let events = log.records.lock().clone();
    Ok(DemoReport {
        steps: demo.steps,
        events,
    })
}

fn flag(name: &str, enabled: bool) -> String {
    if enabled {
        format!("{} {}", "●".green(), name)
    } else {
        format!("{} {}", "○".dimmed(), name.dimmed())
    }
}

fn render_affordances(affordances: Affordances) -> String {
    [
        flag("submit token", affordances.submit_token),
        flag("call", affordances.call),
        flag("hang up", affordances.hang_up),
        flag("accept", affordances.accept),
        flag("voice", affordances.voice_controls),
    ]
    .join("  ")
}

#[derive(Tabled)]
struct KindCount {
    event: &'static str,
    count: usize,
}

/// Print the report to stdout
pub fn print_report(report: &DemoReport) {
    for (index, step) in report.steps.iter().enumerate() {
        let panel = &step.panel;
        println!("{} {}", format!("[{}]", index + 1).cyan(), step.label.bold());
        println!("    {}", render_affordances(panel.affordances()));
        println!("    {}", panel.status());
        println!("    {}", panel.quality().dimmed());
        if panel.voice().is_enabled() {
            let voice = panel.voice();
            println!(
                "    mic {}  speaker {}  volume {}%",
                if voice.microphone_muted() { "muted".red() } else { "live".green() },
                if voice.speaker_muted() { "muted".red() } else { "on".green() },
                voice.volume_percent()
            );
        }
    }

    println!();
    println!("{}", "Events".bold().underline());
    println!("{}", Table::new(&report.events).with(Style::rounded()).to_string());

    let mut counts: Vec<KindCount> = Vec::new();
    for record in &report.events {
        match counts.iter_mut().find(|c| c.event == record.kind) {
            Some(entry) => entry.count += 1,
            None => counts.push(KindCount {
                event: record.kind,
                count: 1,
            }),
        }
    }
    println!();
    println!("{}", Table::new(counts).with(Style::modern()).to_string());
}
