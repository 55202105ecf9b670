//! Shared data layer for herald outreach agents.
//!
//! This crate provides the contact data model, the status lifecycle and
//! its transition rules, and the capability traits (`ContactStore`,
//! `Channel`, `Clock`) that the engines and the agent loop are written
//! against. It also ships the in-memory reference store and a scriptable
//! mock channel used by tests and the binary's dry-run mode.

pub mod channel;
pub mod clock;
pub mod error;
pub mod memory;
pub mod mock;
pub mod store;
pub mod transitions;
pub mod types;

pub use channel::Channel;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChannelError, StoreError};
pub use memory::MemoryStore;
pub use mock::MockChannel;
pub use store::ContactStore;
pub use types::{
    ChannelMessage, Contact, ContactPatch, ContactStatus, DeliveryStatus, MessageRef,
    StatusTransition,
};
