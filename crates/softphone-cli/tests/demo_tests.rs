//! Scripted demo session end to end

use softphone_cli::run_demo;
use softphone_core::{CoordinatorConfig, HangUpPolicy};

#[tokio::test]
async fn test_demo_walks_through_both_calls() {
    let report = run_demo(CoordinatorConfig::default()).await.unwrap();

    let start = report.step("Start").unwrap();
    assert!(start.panel.affordances().submit_token);
    assert!(!start.panel.affordances().call);

    let ready = report.step("Token submitted").unwrap();
    assert!(ready.panel.affordances().call);
    assert_eq!(ready.panel.status(), "Signed in as Demo User");

    let connected = report.step("Connected").unwrap();
    assert!(connected.panel.affordances().voice_controls);
    assert!(connected.panel.affordances().hang_up);
    assert_eq!(connected.panel.quality(), "Call Quality: Connected");

    let adjusted = report.step("Muted, volume down, speaker off").unwrap();
    let voice = adjusted.panel.voice();
    assert!(voice.microphone_muted());
    assert!(voice.speaker_muted());
    assert_eq!(voice.volume_percent(), 80);

    let hung_up = report.step("Hung up").unwrap();
    assert!(!hung_up.panel.affordances().hang_up);
    assert!(hung_up.panel.affordances().call);
    assert!(!hung_up.panel.voice().is_enabled());
    assert_eq!(hung_up.panel.voice().volume(), 1.0);
    assert_eq!(hung_up.panel.active_call(), None);

    let incoming = report.step("Incoming call").unwrap();
    assert!(incoming.panel.affordances().accept);
    assert_eq!(incoming.panel.pending_call(), Some("call-42"));

    let accepted = report.step("Accepted").unwrap();
    assert_eq!(accepted.panel.active_call(), Some("call-42"));
    assert!(accepted.panel.affordances().voice_controls);

    let ended = report.step("Caller hung up").unwrap();
    assert_eq!(ended.panel.status(), "Call ended: RemoteHangup");
    assert!(ended.panel.affordances().call);
}

#[tokio::test]
async fn test_demo_event_log() {
    let report = run_demo(CoordinatorConfig::default()).await.unwrap();
    let kinds = report.kinds();

    assert_eq!(kinds.first(), Some(&"agent_ready"));
    assert_eq!(kinds.last(), Some(&"agent_disposed"));
    assert_eq!(kinds.iter().filter(|k| **k == "ended").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "connected").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "participant_added").count(), 2);
    assert_eq!(kinds.iter().filter(|k| **k == "subscription_failed").count(), 1);
    assert!(kinds.contains(&"mute_changed"));
    assert!(kinds.contains(&"ending"));

    let incoming = report
        .events
        .iter()
        .find(|record| record.kind == "incoming_call")
        .unwrap();
    assert_eq!(incoming.call_id.as_deref(), Some("call-42"));
    assert_eq!(incoming.detail, "8:acs:demo-caller");
}

#[tokio::test]
async fn test_demo_with_optimistic_hang_up() {
    let report = run_demo(CoordinatorConfig::default().with_hang_up_policy(HangUpPolicy::Optimistic))
        .await
        .unwrap();
    assert!(!report.kinds().contains(&"ending"));
    assert_eq!(report.kinds().iter().filter(|k| **k == "ended").count(), 2);
}
