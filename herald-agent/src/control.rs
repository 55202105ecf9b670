//! Control plane: inbound commands and outbound status events.
//!
//! Commands are applied at the next loop check (and before each outbound
//! send), never mid-message. Status transitions are emitted as they are
//! persisted so an external dashboard can mirror the store.

use tokio::sync::mpsc;

use herald_data::StatusTransition;
use herald_engine::PacingUpdate;

/// Commands accepted from the control plane.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Suppress the next send and idle the loop. In-flight sends finish.
    Pause,
    /// Clear both the loop pause and the pacing engine's suspicious latch.
    Resume,
    /// Apply new caps/windows at the next loop check.
    UpdatePacing(PacingUpdate),
}

/// Cloneable sender half handed to the operator surface.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl ControlHandle {
    pub fn pause(&self) {
        let _ = self.tx.send(ControlCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(ControlCommand::Resume);
    }

    pub fn update_pacing(&self, update: PacingUpdate) {
        let _ = self.tx.send(ControlCommand::UpdatePacing(update));
    }
}

/// Create the command channel for one agent loop.
pub fn control_channel() -> (ControlHandle, mpsc::UnboundedReceiver<ControlCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlHandle { tx }, rx)
}

/// Create the status-event channel for one agent loop.
pub fn event_channel() -> (
    mpsc::UnboundedSender<StatusTransition>,
    mpsc::UnboundedReceiver<StatusTransition>,
) {
    mpsc::unbounded_channel()
}
