//! Coordinator configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with an incoming call while another one is already pending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomingCallPolicy {
    /// Decline the newcomer through the provider and keep the pending call
    #[default]
    Reject,
    /// Park the newcomer until the pending slot frees up
    Queue,
    /// Decline the pending call and bind the newcomer instead
    Replace,
}

/// When `end_active` releases the active slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangUpPolicy {
    /// Keep the session bound until the provider reports `Disconnected`
    #[default]
    AwaitConfirmation,
    /// Disconnect and unbind as soon as the provider accepted the hang-up
    Optimistic,
}

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Configuration for a [`SessionCoordinator`](crate::SessionCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Second incoming call handling
    pub incoming_policy: IncomingCallPolicy,
    /// Maximum number of parked calls under [`IncomingCallPolicy::Queue`]
    pub incoming_queue_capacity: usize,
    /// Hang-up confirmation handling
    pub hang_up_policy: HangUpPolicy,
    /// Default for `for_everyone` when hanging up on dispose
    pub hang_up_for_everyone: bool,
    /// Ask the device provider for microphone access during `initialize`
    pub request_audio_permission: bool,
    /// List microphones and speakers during `initialize`
    pub enumerate_devices: bool,
    /// Buffer size of the raw event broadcast channel
    pub event_channel_capacity: usize,
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self {
            incoming_policy: IncomingCallPolicy::Reject,
            incoming_queue_capacity: 4,
            hang_up_policy: HangUpPolicy::AwaitConfirmation,
            hang_up_for_everyone: true,
            request_audio_permission: true,
            enumerate_devices: true,
            event_channel_capacity: 256,
        }
    }

    pub fn with_incoming_policy(mut self, policy: IncomingCallPolicy) -> Self {
        self.incoming_policy = policy;
        self
    }

    pub fn with_incoming_queue_capacity(mut self, capacity: usize) -> Self {
        self.incoming_queue_capacity = capacity;
        self
    }

    pub fn with_hang_up_policy(mut self, policy: HangUpPolicy) -> Self {
        self.hang_up_policy = policy;
        self
    }

    pub fn with_hang_up_for_everyone(mut self, for_everyone: bool) -> Self {
        self.hang_up_for_everyone = for_everyone;
        self
    }

    pub fn with_audio_permission(mut self, request: bool) -> Self {
        self.request_audio_permission = request;
        self
    }

    pub fn with_device_enumeration(mut self, enumerate: bool) -> Self {
        self.enumerate_devices = enumerate;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_channel_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.incoming_policy == IncomingCallPolicy::Queue && self.incoming_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "incoming_queue_capacity",
                reason: "must be greater than zero with the queue policy".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.incoming_policy, IncomingCallPolicy::Reject);
        assert_eq!(config.hang_up_policy, HangUpPolicy::AwaitConfirmation);
        assert!(config.hang_up_for_everyone);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = CoordinatorConfig::new().with_event_channel_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "event_channel_capacity", .. })
        ));

        let config = CoordinatorConfig::new()
            .with_incoming_policy(IncomingCallPolicy::Queue)
            .with_incoming_queue_capacity(0);
        assert!(config.validate().is_err());

        // Capacity is irrelevant for the other policies
        let config = CoordinatorConfig::new().with_incoming_queue_capacity(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{ "incoming_policy": "replace", "hang_up_policy": "optimistic" }"#)
                .unwrap();
        assert_eq!(config.incoming_policy, IncomingCallPolicy::Replace);
        assert_eq!(config.hang_up_policy, HangUpPolicy::Optimistic);
        assert_eq!(config.incoming_queue_capacity, 4);
        assert_eq!(config.event_channel_capacity, 256);
    }
}
