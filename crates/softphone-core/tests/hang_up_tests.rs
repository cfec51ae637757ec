//! Ending the active call under both hang-up policies

mod common;

use common::Harness;
use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
use softphone_core::{
    CallError, CoordinatorConfig, CoordinatorEvent, Credential, EndCode, EndReason, HangUpOptions,
    HangUpPolicy, ProviderCallState, ProviderError,
};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_end_without_active_call() {
    let h = Harness::ready().await;
    assert_eq!(h.coordinator.end_active(true).await, Err(CallError::NoActiveCall));
    assert!(h.provider.hang_ups().is_empty());
}

#[tokio::test]
async fn test_end_twice_reports_no_active_call() {
    let mut h = Harness::ready().await;
    let session = h.coordinator.start_call("user123").await.unwrap();
    h.provider.push_state(&session.id, ProviderCallState::Connected);
    h.drain().await;

    assert_ok!(h.coordinator.end_active(true).await);
    assert_eq!(h.coordinator.end_active(true).await, Err(CallError::NoActiveCall));
    assert_eq!(
        h.provider.hang_ups(),
        vec![(session.id.clone(), HangUpOptions { for_everyone: true })]
    );
}

#[tokio::test]
async fn test_await_confirmation_keeps_call_bound() {
    let mut h = Harness::ready().await;
    let session = h.coordinator.start_call("user123").await.unwrap();
    h.provider.push_state(&session.id, ProviderCallState::Connected);
    h.drain().await;

    assert_ok!(h.coordinator.end_active(false).await);
    let active = h.active().await.expect("bound until the provider confirms");
    assert!(active.is_ending);
    assert_eq!(h.drain_kinds().await, vec!["ending"]);

    // A new call cannot start while the old one is still winding down
    assert!(matches!(
        h.coordinator.start_call("user456").await,
        Err(CallError::CallAlreadyActive { .. })
    ));
    // Nor can its microphone be toggled
    assert_eq!(h.coordinator.mute_active().await, Err(CallError::NoActiveCall));

    h.provider.push_state(&session.id, ProviderCallState::Disconnected);
    assert!(h.active().await.is_none());
    let events = h.drain().await;
    match events.last() {
        Some(CoordinatorEvent::Ended { reason, .. }) => {
            assert_eq!(reason.code, EndCode::LocalHangup)
        }
        other => panic!("expected Ended, got {:?}", other),
    }
}

#[tokio::test]
async fn test_provider_reason_wins_over_pending_hangup() {
    let mut h = Harness::ready().await;
    let session = h.coordinator.start_call("user123").await.unwrap();
    assert_ok!(h.coordinator.end_active(true).await);
    h.provider.push_disconnected(
        &session.id,
        EndReason::new(EndCode::Failed).with_message("media timeout"),
    );

    let reason = h
        .drain()
        .await
        .into_iter()
        .find_map(|event| match event {
            CoordinatorEvent::Ended { reason, .. } => Some(reason),
            _ => None,
        })
        .expect("call ended");
    assert_eq!(reason.code, EndCode::Failed);
    assert_eq!(reason.message.as_deref(), Some("media timeout"));
}

#[tokio::test]
async fn test_optimistic_hangup_unbinds_immediately() {
    let mut h = Harness::ready_with(
        CoordinatorConfig::default().with_hang_up_policy(HangUpPolicy::Optimistic),
    )
    .await;
    let session = h.coordinator.start_call("user123").await.unwrap();
    h.provider.push_state(&session.id, ProviderCallState::Connected);
    h.drain().await;

    assert_ok!(h.coordinator.end_active(true).await);
    assert!(h.active().await.is_none());
    let events = h.drain().await;
    assert_eq!(
        events.iter().map(|e| e.kind()).collect::<Vec<_>>(),
        vec!["state_changed", "ended"]
    );
    assert!(matches!(
        &events[1],
        CoordinatorEvent::Ended { reason, .. } if reason.code == EndCode::LocalHangup
    ));

    // The late confirmation refers to a call nobody tracks any more
    h.provider.push_state(&session.id, ProviderCallState::Disconnected);
    assert!(h.drain().await.is_empty());
    assert_eq!(h.coordinator.end_active(true).await, Err(CallError::NoActiveCall));

    h.coordinator.flush_observers().await;
    assert_eq!(h.observer.count("ended"), 1);

    // The slot is free for a new call straight away
    assert_ok!(h.coordinator.start_call("user456").await);
}

#[tokio::test]
async fn test_hang_up_failure_keeps_call() {
    let mut h = Harness::ready().await;
    let session = h.coordinator.start_call("user123").await.unwrap();
    h.drain().await;
    h.provider.fail_hang_up(ProviderError::failed("signaling error"));

    let error = h.coordinator.end_active(true).await.unwrap_err();
    assert!(matches!(error, CallError::ProviderFailure { .. }));
    let active = h.active().await.expect("still active");
    assert_eq!(active.id, session.id);
    assert!(!active.is_ending);
    assert!(h.drain().await.is_empty());

    // Retrying is up to the caller
    h.provider.heal();
    assert_ok!(h.coordinator.end_active(true).await);
}

#[tokio::test]
async fn test_confirming_provider_completes_hangup() {
    let provider = MockCallingProvider::new().confirming_hang_ups();
    let mut h = Harness::with_provider(
        CoordinatorConfig::default(),
        provider,
        MockDeviceProvider::granting(),
    );
    h.coordinator
        .initialize(Credential::new("valid-token"))
        .await
        .unwrap();
    let session = h.coordinator.start_call("user123").await.unwrap();
    h.provider.push_state(&session.id, ProviderCallState::Connected);
    h.drain().await;

    assert_ok!(h.coordinator.end_active(true).await);
    assert!(h.active().await.is_none());
    assert_eq!(
        h.drain_kinds().await,
        vec!["ending", "state_changed", "ended"]
    );
}
