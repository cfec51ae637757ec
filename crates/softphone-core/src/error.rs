//! Error types for the softphone core
//!
//! Two public error families are surfaced to callers:
//!
//! - [`InitError`] - returned by
//!   [`SessionCoordinator::initialize`](crate::SessionCoordinator::initialize)
//! - [`CallError`] - returned by every call operation
//!
//! Providers report failures with [`ProviderError`]; the coordinator always
//! translates those before they reach a caller, so presentation code never has
//! to understand provider-specific faults.
//!
//! # Rendering errors
//!
//! The coordinator does not render anything. Each error carries a stable
//! [`category`](CallError::category) for logs and an actionable
//! [`user_message`](CallError::user_message) for a presentation layer:
//!
//! ```rust
//! use softphone_core::CallError;
//!
//! let error = CallError::NoActiveCall;
//! assert_eq!(error.category(), "state");
//! assert_eq!(error.user_message(), "There is no active call to hang up.");
//! ```

use thiserror::Error;

use crate::call::CallId;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type for call operations
pub type CallResult<T> = Result<T, CallError>;

/// Result type for agent initialization
pub type InitResult<T> = Result<T, InitError>;

/// Failure reported by a calling or device provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider refused the request (bad token, call declined, ...)
    #[error("Provider rejected the request: {reason}")]
    Rejected { reason: String },

    /// The provider could not be reached
    #[error("Provider unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other provider fault
    #[error("Provider operation failed: {reason}")]
    Failed { reason: String },
}

impl ProviderError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }
}

/// Errors from establishing the provider session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Invalid credential: {reason}")]
    InvalidCredential { reason: String },

    #[error("Device permission denied: {reason}")]
    DevicePermissionDenied { reason: String },

    #[error("Call agent is already initialized")]
    AlreadyInitialized,

    #[error("Provider failure during initialization: {details}")]
    ProviderFailure { details: String },

    #[error("Session coordinator is not running")]
    CoordinatorClosed,
}

impl InitError {
    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential { reason: reason.into() }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::DevicePermissionDenied { reason: reason.into() }
    }

    /// Translate an agent-creation failure
    ///
    /// A provider rejection during agent creation always means the token was
    /// not accepted.
    pub fn from_agent_creation(error: ProviderError) -> Self {
        match error {
            ProviderError::Rejected { reason } => Self::InvalidCredential { reason },
            other => Self::ProviderFailure {
                details: other.to_string(),
            },
        }
    }

    /// Short, stable category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            InitError::InvalidCredential { .. } => "credential",
            InitError::DevicePermissionDenied { .. } => "permission",
            InitError::AlreadyInitialized => "state",
            InitError::ProviderFailure { .. } => "provider",
            InitError::CoordinatorClosed => "internal",
        }
    }

    /// Actionable message for the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            InitError::InvalidCredential { .. } => "Please submit a valid token!",
            InitError::DevicePermissionDenied { .. } => {
                "Microphone access was denied. Allow audio permissions and submit the token again."
            }
            InitError::AlreadyInitialized => "The call agent is already set up.",
            InitError::ProviderFailure { .. } => {
                "The calling service could not be reached. Try submitting the token again."
            }
            InitError::CoordinatorClosed => "The calling component has stopped. Restart the application.",
        }
    }
}

/// Errors from call operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call agent is not initialized")]
    NotInitialized,

    #[error("Invalid call target: {reason}")]
    InvalidTarget { reason: String },

    #[error("A call is already active: {call_id}")]
    CallAlreadyActive { call_id: CallId },

    #[error("No pending incoming call")]
    NoPendingCall,

    #[error("No active call")]
    NoActiveCall,

    #[error("Provider failure: {details}")]
    ProviderFailure { details: String },

    #[error("Session coordinator is not running")]
    CoordinatorClosed,
}

impl CallError {
    pub fn invalid_target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget { reason: reason.into() }
    }

    pub fn provider_failure(details: impl Into<String>) -> Self {
        Self::ProviderFailure { details: details.into() }
    }

    /// Check if the error only reflects the current slot state
    ///
    /// State errors leave the coordinator untouched and can be fixed by the
    /// user (hang up first, wait for a call, ...).
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            CallError::NotInitialized
                | CallError::CallAlreadyActive { .. }
                | CallError::NoPendingCall
                | CallError::NoActiveCall
        )
    }

    /// Short, stable category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            CallError::NotInitialized
            | CallError::CallAlreadyActive { .. }
            | CallError::NoPendingCall
            | CallError::NoActiveCall => "state",
            CallError::InvalidTarget { .. } => "input",
            CallError::ProviderFailure { .. } => "provider",
            CallError::CoordinatorClosed => "internal",
        }
    }

    /// Actionable message for the end user
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::NotInitialized => "Please initialize the call agent first.",
            CallError::InvalidTarget { .. } => "Please enter a user ID to call.",
            CallError::CallAlreadyActive { .. } => "Hang up the current call before starting another one.",
            CallError::NoPendingCall => "There is no incoming call to answer.",
            CallError::NoActiveCall => "There is no active call to hang up.",
            CallError::ProviderFailure { .. } => "The calling service failed. Check the logs for details.",
            CallError::CoordinatorClosed => "The calling component has stopped. Restart the application.",
        }
    }
}

impl From<ProviderError> for CallError {
    fn from(error: ProviderError) -> Self {
        CallError::ProviderFailure {
            details: error.to_string(),
        }
    }
}
