//! Contact store capability.
//!
//! The store is the only synchronization point between agents: `claim_next`
//! must be a single atomic conditional update so that under N concurrent
//! callers each contact is returned to exactly one caller.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{Contact, ContactPatch};

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Atomically claim the oldest pending, unassigned contact for
    /// `agent_id`, transitioning it to `claimed`.
    ///
    /// Returns `Ok(None)` when no contact is eligible (empty queue is not
    /// an error). A contact already `claimed` is never returned.
    async fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Contact>>;

    /// Apply a partial update to a contact. Status changes are validated
    /// against the lifecycle rules.
    async fn commit(&self, contact_id: &str, patch: ContactPatch) -> StoreResult<()>;

    /// Fetch a contact by id.
    async fn get(&self, contact_id: &str) -> StoreResult<Contact>;
}
