//! Shared helpers for coordinator integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
use softphone_core::{
    CallSession, CoordinatorConfig, CoordinatorEvent, Credential, SessionCoordinator,
    SessionObserver,
};
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("softphone_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Observer that records every event it sees
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CoordinatorEvent>>,
}

impl RecordingObserver {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl SessionObserver for RecordingObserver {
    async fn on_event(&self, event: CoordinatorEvent) {
        self.events.lock().push(event);
    }
}

pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub provider: MockCallingProvider,
    pub devices: Arc<MockDeviceProvider>,
    pub observer: Arc<RecordingObserver>,
    pub events: broadcast::Receiver<CoordinatorEvent>,
}

impl Harness {
    /// Coordinator with the given config; not initialized yet
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_devices(config, MockDeviceProvider::granting())
    }

    pub fn with_devices(config: CoordinatorConfig, devices: MockDeviceProvider) -> Self {
        Self::with_provider(config, MockCallingProvider::new(), devices)
    }

    pub fn with_provider(
        config: CoordinatorConfig,
        provider: MockCallingProvider,
        devices: MockDeviceProvider,
    ) -> Self {
        init_tracing();
        let devices = Arc::new(devices);
        let coordinator =
            SessionCoordinator::new(Arc::new(provider.clone()), devices.clone(), config)
                .expect("valid coordinator config");
        let observer = Arc::new(RecordingObserver::default());
        coordinator.subscribe(observer.clone());
        let events = coordinator.subscribe_events();
        Self {
            coordinator,
            provider,
            devices,
            observer,
            events,
        }
    }

    /// Initialized coordinator with default config
    pub async fn ready() -> Self {
        Self::ready_with(CoordinatorConfig::default()).await
    }

    pub async fn ready_with(config: CoordinatorConfig) -> Self {
        let mut harness = Self::new(config);
        harness
            .coordinator
            .initialize(Credential::new("valid-token").with_user_id("8:acs:local"))
            .await
            .expect("initialize succeeds");
        harness.drain().await;
        harness
    }

    /// Every raw event emitted up to now
    ///
    /// `snapshot` is ordered behind everything submitted before it, so all
    /// events produced so far are already in the broadcast buffer.
    pub async fn drain(&mut self) -> Vec<CoordinatorEvent> {
        self.coordinator.snapshot().await;
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub async fn drain_kinds(&mut self) -> Vec<&'static str> {
        self.drain().await.iter().map(|e| e.kind()).collect()
    }

    pub async fn active(&self) -> Option<CallSession> {
        self.coordinator.snapshot().await.active
    }

    pub async fn pending(&self) -> Option<CallSession> {
        self.coordinator.snapshot().await.pending
    }
}
