//! Claim exclusivity under concurrent pollers.
//!
//! The atomic claim is the only cross-agent synchronization point, so this
//! is the property everything else rests on: under N concurrent claimers,
//! each contact is returned to exactly one caller.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use herald_data::{Contact, ContactPatch, ContactStatus, ContactStore, MemoryStore};

fn seeded_store(contacts: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let base = Utc::now();
    for i in 0..contacts {
        store.insert(Contact::new_at(
            format!("c-{i:03}"),
            format!("addr-{i:03}"),
            base + Duration::seconds(i as i64),
        ));
    }
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn each_contact_is_claimed_by_exactly_one_agent() {
    const CONTACTS: usize = 200;
    const AGENTS: usize = 8;

    let store = seeded_store(CONTACTS);

    let mut handles = Vec::new();
    for agent in 0..AGENTS {
        let store = Arc::clone(&store);
        let agent_id = format!("agent-{agent}");
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(contact) = store.claim_next(&agent_id).await.unwrap() {
                assert_eq!(contact.status, ContactStatus::Claimed);
                assert_eq!(contact.assigned_agent.as_deref(), Some(agent_id.as_str()));
                claimed.push(contact.id);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut all_claims: Vec<String> = Vec::new();
    for handle in handles {
        all_claims.extend(handle.await.unwrap());
    }

    // Every contact claimed, and none claimed twice.
    assert_eq!(all_claims.len(), CONTACTS);
    let unique: HashSet<&String> = all_claims.iter().collect();
    assert_eq!(unique.len(), CONTACTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contacts_resolved_by_one_agent_are_invisible_to_others() {
    let store = seeded_store(10);

    // Agent 1 claims and resolves half the pool.
    for _ in 0..5 {
        let contact = store.claim_next("agent-1").await.unwrap().unwrap();
        store
            .commit(
                &contact.id,
                ContactPatch::terminal(ContactStatus::Contacted, Utc::now()),
            )
            .await
            .unwrap();
    }

    // Agent 2 sees only the remaining pending contacts.
    let mut remaining = 0;
    while store.claim_next("agent-2").await.unwrap().is_some() {
        remaining += 1;
    }
    assert_eq!(remaining, 5);
}
