//! In-memory reference implementation of `ContactStore`.
//!
//! A single mutex-guarded section makes `claim_next` atomic: the find and
//! the status flip happen under one lock, so concurrent claimers can never
//! receive the same contact. Production deployments substitute a store
//! whose conditional-update primitive gives the same guarantee.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};
use crate::store::ContactStore;
use crate::transitions::validate_transition;
use crate::types::{Contact, ContactPatch, ContactStatus};

#[derive(Debug, Default)]
struct Inner {
    contacts: HashMap<String, Contact>,
    unavailable: bool,
}

/// Mutex-backed contact store, FIFO by creation time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

/// Minimal seed record for loading a contact pool from JSON.
#[derive(Debug, Deserialize)]
struct SeedContact {
    id: String,
    channel_address: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a contact, replacing any existing record with the same id.
    pub fn insert(&self, contact: Contact) {
        let mut inner = self.inner.lock().expect("contacts lock poisoned");
        inner.contacts.insert(contact.id.clone(), contact);
    }

    /// Load contacts from a JSON array of `{id, channel_address}` records.
    /// Returns the number of contacts inserted.
    pub fn seed_from_json(&self, json: &str) -> serde_json::Result<usize> {
        let seeds: Vec<SeedContact> = serde_json::from_str(json)?;
        let count = seeds.len();
        let mut inner = self.inner.lock().expect("contacts lock poisoned");
        for seed in seeds {
            let contact = match seed.created_at {
                Some(at) => Contact::new_at(seed.id, seed.channel_address, at),
                None => Contact::new(seed.id, seed.channel_address),
            };
            inner.contacts.insert(contact.id.clone(), contact);
        }
        Ok(count)
    }

    /// Simulate a store outage. While set, every operation returns
    /// `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut inner = self.inner.lock().expect("contacts lock poisoned");
        inner.unavailable = unavailable;
    }

    /// Counts by status: (pending, claimed, contacted, skipped).
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.lock().expect("contacts lock poisoned");
        let mut counts = (0, 0, 0, 0);
        for contact in inner.contacts.values() {
            match contact.status {
                ContactStatus::Pending => counts.0 += 1,
                ContactStatus::Claimed => counts.1 += 1,
                ContactStatus::Contacted => counts.2 += 1,
                ContactStatus::Skipped => counts.3 += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("contacts lock poisoned");
        inner.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn claim_next(&self, agent_id: &str) -> StoreResult<Option<Contact>> {
        let mut inner = self.inner.lock().expect("contacts lock poisoned");
        if inner.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        // Oldest-created first; ties broken by id for determinism.
        let next_id = inner
            .contacts
            .values()
            .filter(|c| c.status == ContactStatus::Pending && c.assigned_agent.is_none())
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|c| c.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };

        let contact = inner
            .contacts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if contact.assigned_agent.is_some() {
            // Cannot happen under the lock; loud failure per contract.
            return Err(StoreError::DuplicateClaim(id));
        }
        contact.status = ContactStatus::Claimed;
        contact.assigned_agent = Some(agent_id.to_string());
        contact.consecutive_claim_attempts += 1;
        Ok(Some(contact.clone()))
    }

    async fn commit(&self, contact_id: &str, patch: ContactPatch) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("contacts lock poisoned");
        if inner.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        let contact = inner
            .contacts
            .get_mut(contact_id)
            .ok_or_else(|| StoreError::NotFound(contact_id.to_string()))?;

        if let Some(to) = patch.status {
            if to == ContactStatus::Claimed && contact.status == ContactStatus::Claimed {
                return Err(StoreError::DuplicateClaim(contact_id.to_string()));
            }
            if to != contact.status {
                validate_transition(contact.status, to)?;
                contact.status = to;
            }
        }
        if let Some(assigned) = patch.assigned_agent {
            contact.assigned_agent = assigned;
        }
        if let Some(at) = patch.last_contact_at {
            contact.last_contact_at = Some(at);
        }
        contact.messages_sent += patch.messages_sent_add;
        if let Some(attempts) = patch.consecutive_claim_attempts {
            contact.consecutive_claim_attempts = attempts;
        }

        // The claim invariant: assigned_agent is non-null iff claimed.
        if contact.status != ContactStatus::Claimed {
            contact.assigned_agent = None;
        }
        Ok(())
    }

    async fn get(&self, contact_id: &str) -> StoreResult<Contact> {
        let inner = self.inner.lock().expect("contacts lock poisoned");
        if inner.unavailable {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        inner
            .contacts
            .get(contact_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(contact_id.to_string()))
    }
}
