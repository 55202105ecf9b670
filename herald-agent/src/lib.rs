//! Per-agent outreach orchestration daemon.
//!
//! Composes the herald engines into the agent control loop: gate on
//! pacing, claim one contact, verify reachability, diff against delivered
//! history, send the remaining steps, persist the outcome, and schedule
//! the next iteration with a randomized human-like delay.

pub mod config;
pub mod control;
pub mod orchestrator;

pub use config::AgentConfig;
pub use control::{ControlCommand, ControlHandle};
pub use orchestrator::Orchestrator;
