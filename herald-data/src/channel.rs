//! Abstract outbound channel capability.
//!
//! The engines have no knowledge of the transport; everything observable
//! about the outside world goes through this trait. A sent message cannot
//! be unsent, which is why every caller treats `send_message` as
//! irreversible.

use async_trait::async_trait;

use crate::error::ChannelResult;
use crate::types::{ChannelMessage, DeliveryStatus, MessageRef};

#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a message to `address`. Returns a reference usable for
    /// delivery-status polling.
    async fn send_message(&self, address: &str, text: &str) -> ChannelResult<MessageRef>;

    /// Current delivery state of a previously sent message.
    async fn delivery_status(&self, message_ref: &MessageRef) -> ChannelResult<DeliveryStatus>;

    /// Most recent messages (both directions) exchanged with `address`,
    /// newest last.
    async fn recent_history(&self, address: &str, limit: usize)
        -> ChannelResult<Vec<ChannelMessage>>;

    /// Toggle the typing indicator shown to the contact.
    async fn set_typing(&self, address: &str, on: bool) -> ChannelResult<()>;
}
