//! Stateful engines for herald outreach agents.
//!
//! Each engine owns one correctness concern of the agent loop:
//!
//! - [`pacing`]: daily/hourly send caps, business-hour windows, and the
//!   suspicious-activity pause latch.
//! - [`delay`]: human-like delay sampling behind a pluggable trait.
//! - [`verify`]: the per-contact probe verification state machine.
//! - [`dedup`]: the duplicate-send guard that diffs channel history
//!   against the canonical message sequence.
//! - [`stuck`]: the repeated-claim circuit breaker.

pub mod dedup;
pub mod delay;
pub mod pacing;
pub mod stuck;
pub mod verify;

pub use dedup::{DuplicateGuard, SequenceStep};
pub use delay::{DelayConfig, DelaySampler, FixedDelaySampler, HumanDelaySampler};
pub use pacing::{GateDecision, GateReason, HourBand, PacingConfig, PacingEngine, PacingUpdate};
pub use stuck::StuckContactDetector;
pub use verify::{
    SessionPhase, VerificationSession, VerificationSessionManager, VerifyConfig, VerifyOutcome,
};
