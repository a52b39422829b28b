//! Supervisor and controller for the `baresip` console SIP agent.
//!
//! Spawns the agent with a managed configuration directory, keeps it alive
//! (respawning on death), classifies its console output into structured
//! events, drives a call-lifecycle state machine, and exposes an imperative
//! command API plus overridable callbacks to the embedding application.

pub mod agent;
pub mod call;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod media;
pub mod profile;
pub mod supervisor;

pub use agent::{Agent, AgentBuilder, AgentHandle, CallEventHandler, DefaultHandler};
pub use call::{CallSession, CallStatus, Notification};
pub use config::{AccountConfig, Config};
pub use error::AgentError;
pub use event::{Classifier, Event};
