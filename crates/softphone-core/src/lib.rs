//! # softphone-core
//!
//! Call-session lifecycle coordination for softphone applications.
//!
//! This crate sits between a real-time calling SDK and a user interface. It
//! owns the active call and the pending incoming call, translates the SDK's
//! state notifications into a small state machine and tells observers what
//! changed. Nothing in here renders UI or moves audio: signaling and media
//! stay inside the injected [`CallingProvider`] and [`DeviceProvider`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Presentation / observers    │  SessionObserver, broadcast receivers
//! └──────────────▲───────────────┘
//!                │ CoordinatorEvent
//! ┌──────────────┴───────────────┐
//! │      SessionCoordinator      │  active slot, pending slot, queue
//! └──────────────▲───────────────┘
//!                │ ProviderEvent / provider calls
//! ┌──────────────┴───────────────┐
//! │ CallingProvider + DeviceProvider │  SDK bindings (or mock)
//! └──────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softphone_core::mock::{MockCallingProvider, MockDeviceProvider};
//! use softphone_core::{CoordinatorConfig, Credential, SessionCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = SessionCoordinator::new(
//!         Arc::new(MockCallingProvider::new()),
//!         Arc::new(MockDeviceProvider::granting()),
//!         CoordinatorConfig::default(),
//!     )?;
//!
//!     coordinator.on_incoming_call(|session| async move {
//!         println!("incoming call {} from {:?}", session.id, session.remote_id);
//!     });
//!
//!     let agent = coordinator.initialize(Credential::new("token")).await?;
//!     println!("agent ready with {} microphones", agent.microphones.len());
//!
//!     let session = coordinator.start_call("user123").await?;
//!     println!("{} is {}", session.id, session.state);
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod mock;
pub mod provider;

pub use call::{
    CallDirection, CallId, CallSession, CallState, EndCode, EndReason, ParticipantRef,
    ParticipantState,
};
pub use config::{ConfigError, CoordinatorConfig, HangUpPolicy, IncomingCallPolicy};
pub use coordinator::{AgentHandle, CoordinatorSnapshot, SessionCoordinator};
pub use error::{CallError, CallResult, InitError, InitResult, ProviderError, ProviderResult};
pub use events::{CoordinatorEvent, ObserverId, SessionObserver};
pub use provider::{
    CallAgent, CallTarget, CallingProvider, Credential, DeviceInfo, DevicePermissionRequest,
    DeviceProvider, HangUpOptions, IncomingCallHandle, ProviderCall, ProviderCallState,
    ProviderEvent, ProviderEventSink, RemoteParticipant, StartCallOptions,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
