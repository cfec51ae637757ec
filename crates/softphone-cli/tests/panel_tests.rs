//! Call panel driven by a live coordinator

use std::sync::Arc;

use softphone_cli::SharedPanel;
use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
use softphone_core::{
    CallError, CoordinatorConfig, Credential, EndReason, ProviderCallState, SessionCoordinator,
};

async fn signed_in() -> (SessionCoordinator, MockCallingProvider, SharedPanel) {
    let provider = MockCallingProvider::new();
    let coordinator = SessionCoordinator::new(
        Arc::new(provider.clone()),
        Arc::new(MockDeviceProvider::granting()),
        CoordinatorConfig::default(),
    )
    .unwrap();
    let panel = SharedPanel::new();
    coordinator.subscribe(Arc::new(panel.clone()));
    coordinator
        .initialize(Credential::new("valid-token"))
        .await
        .unwrap();
    (coordinator, provider, panel)
}

#[tokio::test]
async fn test_call_enabled_after_cancelled_incoming_following_a_call() {
    let (coordinator, provider, panel) = signed_in().await;

    let session = coordinator.start_call("user123").await.unwrap();
    provider.push_disconnected(&session.id, EndReason::remote_hangup());
    provider.push_incoming("call-42", Some("8:acs:caller"));
    provider.push_disconnected("call-42", EndReason::remote_hangup());
    coordinator.flush_observers().await;

    let snapshot = coordinator.snapshot().await;
    assert!(snapshot.is_idle());
    assert!(snapshot.is_initialized());

    let view = panel.view();
    assert!(view.affordances().call);
    assert!(!view.affordances().submit_token);
    assert!(coordinator.start_call("user456").await.is_ok());
}

#[tokio::test]
async fn test_call_disabled_while_hang_up_is_unconfirmed() {
    let (coordinator, provider, panel) = signed_in().await;

    let session = coordinator.start_call("user123").await.unwrap();
    provider.push_state(&session.id, ProviderCallState::Connected);
    coordinator.end_active(true).await.unwrap();
    coordinator.flush_observers().await;

    let view = panel.view();
    assert!(!view.affordances().call);
    assert!(!view.affordances().hang_up);
    assert!(!view.affordances().voice_controls);
    // The panel agrees with the coordinator
    assert!(matches!(
        coordinator.start_call("user456").await,
        Err(CallError::CallAlreadyActive { .. })
    ));

    provider.push_state(&session.id, ProviderCallState::Disconnected);
    coordinator.flush_observers().await;
    assert!(panel.view().affordances().call);
    assert!(coordinator.start_call("user456").await.is_ok());
}
