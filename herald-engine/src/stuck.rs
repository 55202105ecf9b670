//! Repeated-claim circuit breaker.
//!
//! Upstream collaborators can hand back an unresolvable contact forever;
//! this detector counts consecutive claims of the same contact by this
//! agent instance and trips once the limit is reached so the orchestrator
//! can force the contact terminal and move on.

use std::collections::HashMap;

use tracing::warn;

#[derive(Debug)]
pub struct StuckContactDetector {
    limit: u32,
    counts: HashMap<String, u32>,
}

impl Default for StuckContactDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

impl StuckContactDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counts: HashMap::new(),
        }
    }

    /// Record a claim of `contact_id`, returning the consecutive count.
    pub fn record_claim(&mut self, contact_id: &str) -> u32 {
        let count = self.counts.entry(contact_id.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.limit {
            warn!(
                contact_id = %contact_id,
                attempts = *count,
                "contact repeatedly claimed without progress"
            );
        }
        *count
    }

    pub fn is_stuck(&self, contact_id: &str) -> bool {
        self.counts
            .get(contact_id)
            .is_some_and(|count| *count >= self.limit)
    }

    /// Clear the counter on successful progress.
    pub fn clear(&mut self, contact_id: &str) {
        self.counts.remove(contact_id);
    }
}
