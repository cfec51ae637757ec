//! # softphone-cli
//!
//! Terminal front end for [`softphone_core`]: a call panel that mirrors a
//! softphone window, an HTTP token source, configuration and logging setup,
//! and a scripted demo against the in-memory provider.

pub mod config;
pub mod demo;
pub mod logging;
pub mod presentation;
pub mod token;

pub use config::CliConfig;
pub use demo::{DemoReport, run_demo};
pub use presentation::{Affordances, CallPanel, ControlError, SharedPanel, VoiceControls};
pub use token::{HttpTokenSource, IssuedToken, TokenError, TokenSource};
