use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle status of a contact.
///
/// `Contacted` and `Skipped` are terminal; the orchestrator never reopens
/// them automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Claimed,
    Contacted,
    Skipped,
}

impl ContactStatus {
    /// Terminal states are never reopened automatically.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContactStatus::Contacted | ContactStatus::Skipped)
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactStatus::Pending => write!(f, "pending"),
            ContactStatus::Claimed => write!(f, "claimed"),
            ContactStatus::Contacted => write!(f, "contacted"),
            ContactStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ContactStatus::Pending),
            "claimed" => Ok(ContactStatus::Claimed),
            "contacted" => Ok(ContactStatus::Contacted),
            "skipped" => Ok(ContactStatus::Skipped),
            _ => Err(StoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// A target contact tracked through the outreach lifecycle.
///
/// Invariant: `assigned_agent` is `Some` if and only if `status` is
/// `Claimed`, and at most one agent holds the claim at any time. The
/// store's atomic claim is the only path that sets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,

    /// Address on the external channel (transport-opaque).
    pub channel_address: String,

    pub status: ContactStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_contact_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub messages_sent: u32,

    #[serde(default)]
    pub consecutive_claim_attempts: u32,
}

impl Contact {
    /// Create a fresh pending contact.
    pub fn new(id: impl Into<String>, channel_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_address: channel_address.into(),
            status: ContactStatus::Pending,
            assigned_agent: None,
            created_at: Utc::now(),
            last_contact_at: None,
            messages_sent: 0,
            consecutive_claim_attempts: 0,
        }
    }

    /// Same as `new` but with an explicit creation time (FIFO ordering in
    /// the store is by `created_at`).
    pub fn new_at(
        id: impl Into<String>,
        channel_address: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            created_at,
            ..Self::new(id, channel_address)
        }
    }
}

/// Partial update applied through `ContactStore::commit`.
///
/// Only the fields that are set are touched; `messages_sent_add` is an
/// increment, not an absolute value.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub status: Option<ContactStatus>,
    /// `Some(None)` clears the assignment, `Some(Some(id))` sets it.
    pub assigned_agent: Option<Option<String>>,
    pub last_contact_at: Option<DateTime<Utc>>,
    pub messages_sent_add: u32,
    pub consecutive_claim_attempts: Option<u32>,
}

impl ContactPatch {
    /// Patch that moves a contact to a terminal status and releases the
    /// claim.
    pub fn terminal(status: ContactStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            assigned_agent: Some(None),
            last_contact_at: Some(at),
            ..Self::default()
        }
    }

    /// Patch recording one delivered sequence step.
    pub fn message_sent(at: DateTime<Utc>) -> Self {
        Self {
            last_contact_at: Some(at),
            messages_sent_add: 1,
            ..Self::default()
        }
    }
}

/// Opaque reference to a message accepted by the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub String);

impl MessageRef {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MessageRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of a sent message as reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Delivery acknowledgment for verification purposes.
    pub fn is_acked(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Read)
    }
}

/// One message in a channel conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub message_ref: MessageRef,
    pub text: String,
    /// True for messages we sent, false for replies from the contact.
    pub outbound: bool,
    pub sent_at: DateTime<Utc>,
}

/// Status transition event emitted to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub contact_id: String,
    pub agent_id: String,
    pub from: ContactStatus,
    pub to: ContactStatus,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrips_through_display_and_fromstr() {
        for status in [
            ContactStatus::Pending,
            ContactStatus::Claimed,
            ContactStatus::Contacted,
            ContactStatus::Skipped,
        ] {
            let parsed = ContactStatus::from_str(&status.to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn status_fromstr_rejects_unknown_value() {
        assert!(ContactStatus::from_str("banned").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ContactStatus::Pending.is_terminal());
        assert!(!ContactStatus::Claimed.is_terminal());
        assert!(ContactStatus::Contacted.is_terminal());
        assert!(ContactStatus::Skipped.is_terminal());
    }

    #[test]
    fn new_contact_starts_pending_and_unassigned() {
        let contact = Contact::new("c-1", "addr-1");
        assert_eq!(contact.status, ContactStatus::Pending);
        assert!(contact.assigned_agent.is_none());
        assert_eq!(contact.messages_sent, 0);
        assert_eq!(contact.consecutive_claim_attempts, 0);
    }

    #[test]
    fn terminal_patch_clears_assignment() {
        let now = Utc::now();
        let patch = ContactPatch::terminal(ContactStatus::Contacted, now);
        assert_eq!(patch.status, Some(ContactStatus::Contacted));
        assert_eq!(patch.assigned_agent, Some(None));
        assert_eq!(patch.last_contact_at, Some(now));
    }

    #[test]
    fn delivery_ack_excludes_sent() {
        assert!(!DeliveryStatus::Sent.is_acked());
        assert!(DeliveryStatus::Delivered.is_acked());
        assert!(DeliveryStatus::Read.is_acked());
    }

    #[test]
    fn contact_serializes_with_snake_case_status() {
        let contact = Contact::new("c-1", "addr-1");
        let json = serde_json::to_string(&contact).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        // Unset options are omitted entirely.
        assert!(!json.contains("assigned_agent"));
    }
}
