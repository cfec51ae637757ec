//! Incoming calls: pending slot, acceptance and second-call policies

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::Harness;
use softphone_core::{
    CallDirection, CallError, CallState, CoordinatorConfig, CoordinatorEvent, EndCode, EndReason,
    HangUpPolicy, IncomingCallPolicy, ProviderCallState, ProviderError,
};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_accept_incoming_call_scenario() {
    let mut h = Harness::ready().await;

    h.provider.push_incoming("call-42", Some("8:acs:remote"));
    let pending = h.pending().await.expect("call is pending");
    assert_eq!(pending.id, "call-42");
    assert_eq!(pending.direction, CallDirection::Inbound);
    assert_eq!(pending.state, CallState::Ringing);
    assert_eq!(pending.remote_id.as_deref(), Some("8:acs:remote"));

    let accepted = assert_ok!(h.coordinator.accept_pending().await);
    assert_eq!(accepted.id, "call-42");

    let snapshot = h.coordinator.snapshot().await;
    assert!(snapshot.pending.is_none());
    assert_eq!(snapshot.active.map(|s| s.id), Some("call-42".to_string()));
    assert_eq!(h.provider.accepted(), vec!["call-42".to_string()]);
    assert_eq!(h.drain_kinds().await, vec!["incoming_call", "accepted"]);

    h.provider.push_state("call-42", ProviderCallState::Connected);
    h.provider
        .push_disconnected("call-42", EndReason::remote_hangup());
    assert_eq!(
        h.drain_kinds().await,
        vec!["state_changed", "connected", "state_changed", "ended"]
    );
    assert!(h.coordinator.snapshot().await.is_idle());
}

#[tokio::test]
async fn test_accept_without_pending_call() {
    let h = Harness::ready().await;
    assert_eq!(
        h.coordinator.accept_pending().await,
        Err(CallError::NoPendingCall)
    );
    assert_eq!(
        h.coordinator.reject_pending().await,
        Err(CallError::NoPendingCall)
    );
}

#[tokio::test]
async fn test_accept_while_active_fails_and_keeps_pending() {
    let mut h = Harness::ready().await;
    let outbound = h.coordinator.start_call("user123").await.unwrap();
    h.provider.push_incoming("call-42", None);

    assert_eq!(
        h.coordinator.accept_pending().await,
        Err(CallError::CallAlreadyActive {
            call_id: outbound.id.clone()
        })
    );
    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.pending.map(|s| s.id), Some("call-42".to_string()));
    assert_eq!(snapshot.active.map(|s| s.id), Some(outbound.id));
    assert!(h.provider.accepted().is_empty());
    h.drain().await;
}

#[tokio::test]
async fn test_accept_failure_keeps_pending() {
    let h = Harness::ready().await;
    h.provider.push_incoming("call-42", None);
    h.provider
        .fail_accept(ProviderError::failed("media negotiation failed"));

    assert!(matches!(
        h.coordinator.accept_pending().await,
        Err(CallError::ProviderFailure { .. })
    ));
    assert_eq!(h.pending().await.map(|s| s.id), Some("call-42".to_string()));
    assert!(h.active().await.is_none());
}

#[tokio::test]
async fn test_caller_cancels_pending_call() {
    let mut h = Harness::ready().await;
    h.provider.push_incoming("call-42", None);
    // Pending calls only track disconnection
    h.provider.push_state("call-42", ProviderCallState::Connected);
    h.provider
        .push_disconnected("call-42", EndReason::remote_hangup());

    assert!(h.pending().await.is_none());
    let events = h.drain().await;
    assert_eq!(
        events.iter().map(|e| e.kind()).collect::<Vec<_>>(),
        vec!["incoming_call", "state_changed", "ended"]
    );
    assert!(matches!(
        &events[2],
        CoordinatorEvent::Ended { reason, .. } if reason.code == EndCode::RemoteHangup
    ));
}

#[tokio::test]
async fn test_reject_pending_awaits_confirmation() {
    let mut h = Harness::ready().await;
    h.provider.push_incoming("call-42", None);
    h.drain().await;

    assert_ok!(h.coordinator.reject_pending().await);
    assert_eq!(h.provider.rejected(), vec!["call-42".to_string()]);
    let pending = h.pending().await.expect("still bound until confirmed");
    assert!(pending.is_ending);
    assert_eq!(
        h.coordinator.reject_pending().await,
        Err(CallError::NoPendingCall)
    );
    assert_eq!(
        h.coordinator.accept_pending().await,
        Err(CallError::NoPendingCall)
    );

    h.provider.push_state("call-42", ProviderCallState::Disconnected);
    assert!(h.pending().await.is_none());
    let reason = h
        .drain()
        .await
        .into_iter()
        .find_map(|event| match event {
            CoordinatorEvent::Ended { reason, .. } => Some(reason),
            _ => None,
        })
        .expect("call ended");
    assert_eq!(reason.code, EndCode::Declined);
}

#[tokio::test]
async fn test_reject_pending_optimistic() {
    let mut h = Harness::ready_with(
        CoordinatorConfig::default().with_hang_up_policy(HangUpPolicy::Optimistic),
    )
    .await;
    h.provider.push_incoming("call-42", None);
    assert_ok!(h.coordinator.reject_pending().await);
    assert!(h.pending().await.is_none());
    assert_eq!(
        h.drain_kinds().await,
        vec!["incoming_call", "state_changed", "ended"]
    );
}

#[tokio::test]
async fn test_second_incoming_call_is_rejected_by_default() {
    let mut h = Harness::ready().await;
    h.provider.push_incoming("call-1", Some("alice"));
    h.provider.push_incoming("call-2", Some("bob"));

    assert_eq!(h.pending().await.map(|s| s.id), Some("call-1".to_string()));
    assert_eq!(h.provider.rejected(), vec!["call-2".to_string()]);

    let events = h.drain().await;
    assert_eq!(events.len(), 2);
    match &events[1] {
        CoordinatorEvent::IncomingCallRejected { call_id, caller_id } => {
            assert_eq!(call_id, "call-2");
            assert_eq!(caller_id.as_deref(), Some("bob"));
        }
        other => panic!("expected IncomingCallRejected, got {:?}", other),
    }

    // The provider's own disconnect for the rejected call is ignored
    h.provider.push_state("call-2", ProviderCallState::Disconnected);
    assert!(h.drain().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_incoming_notification_is_ignored() {
    let mut h = Harness::ready().await;
    h.provider.push_incoming("call-1", None);
    h.provider.push_incoming("call-1", None);
    assert_eq!(h.drain_kinds().await, vec!["incoming_call"]);
    assert!(h.provider.rejected().is_empty());
}

#[tokio::test]
async fn test_queue_policy_promotes_in_order() {
    let mut h = Harness::ready_with(
        CoordinatorConfig::default()
            .with_incoming_policy(IncomingCallPolicy::Queue)
            .with_incoming_queue_capacity(2),
    )
    .await;

    h.provider.push_incoming("call-1", None);
    h.provider.push_incoming("call-2", None);
    h.provider.push_incoming("call-3", None);
    h.provider.push_incoming("call-4", None);

    let snapshot = h.coordinator.snapshot().await;
    assert_eq!(snapshot.pending.map(|s| s.id), Some("call-1".to_string()));
    assert_eq!(
        snapshot.queued.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        vec!["call-2", "call-3"]
    );
    // Overflow falls back to rejection
    assert_eq!(h.provider.rejected(), vec!["call-4".to_string()]);

    let positions: Vec<usize> = h
        .drain()
        .await
        .into_iter()
        .filter_map(|event| match event {
            CoordinatorEvent::IncomingCallQueued { position, .. } => Some(position),
            _ => None,
        })
        .collect();
    assert_eq!(positions, vec![1, 2]);

    // Accepting frees the pending slot for the head of the queue
    assert_ok!(h.coordinator.accept_pending().await);
    assert_eq!(h.pending().await.map(|s| s.id), Some("call-2".to_string()));
    assert_eq!(h.drain_kinds().await, vec!["accepted", "incoming_call"]);

    // A queued caller hanging up leaves the queue
    h.provider
        .push_disconnected("call-3", EndReason::remote_hangup());
    assert!(h.coordinator.snapshot().await.queued.is_empty());

    // The caller of the pending call hangs up; nothing left to promote
    h.provider
        .push_disconnected("call-2", EndReason::remote_hangup());
    assert!(h.pending().await.is_none());
    assert_eq!(
        h.drain_kinds().await,
        vec!["state_changed", "ended", "state_changed", "ended"]
    );
}

#[tokio::test]
async fn test_replace_policy_displaces_pending_call() {
    let mut h = Harness::ready_with(
        CoordinatorConfig::default().with_incoming_policy(IncomingCallPolicy::Replace),
    )
    .await;

    h.provider.push_incoming("call-1", None);
    h.provider.push_incoming("call-2", None);

    assert_eq!(h.pending().await.map(|s| s.id), Some("call-2".to_string()));
    assert_eq!(h.provider.rejected(), vec!["call-1".to_string()]);

    let events = h.drain().await;
    assert_eq!(
        events.iter().map(|e| e.kind()).collect::<Vec<_>>(),
        vec!["incoming_call", "state_changed", "ended", "incoming_call"]
    );
    match &events[2] {
        CoordinatorEvent::Ended { session, reason } => {
            assert_eq!(session.id, "call-1");
            assert_eq!(reason.code, EndCode::Displaced);
        }
        other => panic!("expected Ended, got {:?}", other),
    }
}

#[tokio::test]
async fn test_on_incoming_call_handler_runs_once_per_call() {
    let mut h = Harness::ready_with(
        CoordinatorConfig::default()
            .with_incoming_policy(IncomingCallPolicy::Queue)
            .with_incoming_queue_capacity(1),
    )
    .await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    h.coordinator.on_incoming_call(move |_session| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    h.provider.push_incoming("call-1", None);
    h.provider.push_incoming("call-2", None);
    h.coordinator.flush_observers().await;
    // The queued call has not been offered yet
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    h.provider
        .push_disconnected("call-1", EndReason::remote_hangup());
    h.coordinator.flush_observers().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    h.drain().await;
}

#[tokio::test]
async fn test_observer_can_accept_from_callback() {
    let h = Harness::ready().await;
    let coordinator = h.coordinator.clone();
    let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();
    h.coordinator.on_incoming_call(move |session| {
        let coordinator = coordinator.clone();
        let accepted_tx = accepted_tx.clone();
        async move {
            let result = coordinator.accept_pending().await;
            let _ = accepted_tx.send((session.id, result));
        }
    });

    h.provider.push_incoming("call-42", None);
    let (call_id, result) = tokio::time::timeout(Duration::from_secs(5), accepted_rx.recv())
        .await
        .expect("callback ran")
        .expect("channel open");
    assert_eq!(call_id, "call-42");
    assert_eq!(result.map(|s| s.id), Ok("call-42".to_string()));
    assert_eq!(h.active().await.map(|s| s.id), Some("call-42".to_string()));
}

#[tokio::test]
async fn test_accepted_call_connecting_report_is_not_a_transition() {
    let mut h = Harness::ready().await;
    h.provider.push_incoming("call-42", None);
    assert_ok!(h.coordinator.accept_pending().await);
    h.drain().await;

    h.provider.push_state("call-42", ProviderCallState::Connecting);
    h.provider.push_state("call-42", ProviderCallState::EarlyMedia);
    assert!(h.drain().await.is_empty());
    assert_eq!(h.active().await.map(|s| s.state), Some(CallState::Ringing));

    h.provider.push_state("call-42", ProviderCallState::Connected);
    assert_eq!(h.drain_kinds().await, vec!["state_changed", "connected"]);
}
