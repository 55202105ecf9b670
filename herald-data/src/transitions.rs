use crate::error::{StoreError, StoreResult};
use crate::types::ContactStatus;

/// Validate a contact status transition is allowed.
///
/// `Claimed -> Pending` is the operator requeue path (releasing a claim
/// without an outcome); everything else follows the claim lifecycle.
pub fn validate_transition(from: ContactStatus, to: ContactStatus) -> StoreResult<()> {
    let valid = match from {
        ContactStatus::Pending => matches!(to, ContactStatus::Claimed | ContactStatus::Skipped),
        ContactStatus::Claimed => matches!(
            to,
            ContactStatus::Contacted | ContactStatus::Skipped | ContactStatus::Pending
        ),
        // Terminal states
        ContactStatus::Contacted => false,
        ContactStatus::Skipped => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Get valid transitions from a status.
pub fn valid_transitions(from: ContactStatus) -> Vec<ContactStatus> {
    match from {
        ContactStatus::Pending => vec![ContactStatus::Claimed, ContactStatus::Skipped],
        ContactStatus::Claimed => vec![
            ContactStatus::Contacted,
            ContactStatus::Skipped,
            ContactStatus::Pending,
        ],
        ContactStatus::Contacted => vec![],
        ContactStatus::Skipped => vec![],
    }
}
