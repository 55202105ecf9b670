//! Scriptable channel for tests and dry runs.
//!
//! `MockChannel` records every send into a per-address history and serves
//! delivery-status polls from a scripted queue (defaulting to `Delivered`
//! once the script is exhausted), so verification and dedup paths can be
//! exercised without a real transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::channel::Channel;
use crate::error::{ChannelError, ChannelResult};
use crate::types::{ChannelMessage, DeliveryStatus, MessageRef};

#[derive(Debug, Default)]
struct MockInner {
    histories: HashMap<String, Vec<ChannelMessage>>,
    known_refs: HashSet<String>,
    /// Responses for upcoming `delivery_status` calls, consumed in order.
    delivery_script: VecDeque<DeliveryStatus>,
    /// Number of upcoming sends that should fail.
    failing_sends: u32,
    /// Outcomes for upcoming `recent_history` calls; `true` fails the
    /// call. Exhausted script means success.
    history_script: VecDeque<bool>,
    sends: Vec<(String, String)>,
    typing_events: Vec<(String, bool)>,
}

#[derive(Debug, Default)]
pub struct MockChannel {
    inner: Mutex<MockInner>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing message into an address's history.
    pub fn push_history(&self, address: &str, text: &str, outbound: bool) {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        let message_ref = MessageRef::new();
        inner.known_refs.insert(message_ref.0.clone());
        inner
            .histories
            .entry(address.to_string())
            .or_default()
            .push(ChannelMessage {
                message_ref,
                text: text.to_string(),
                outbound,
                sent_at: Utc::now(),
            });
    }

    /// Queue delivery-status responses. Once exhausted, polls return
    /// `Delivered`.
    pub fn script_delivery(&self, statuses: impl IntoIterator<Item = DeliveryStatus>) {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.delivery_script.extend(statuses);
    }

    /// Make the next `n` sends fail with `ChannelError::SendFailed`.
    pub fn fail_next_sends(&self, n: u32) {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.failing_sends = n;
    }

    /// Script outcomes for upcoming `recent_history` calls, consumed in
    /// order; `true` entries fail with `ChannelError::Unavailable`. Once
    /// exhausted, calls succeed.
    pub fn script_history_failures(&self, outcomes: impl IntoIterator<Item = bool>) {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.history_script.extend(outcomes);
    }

    /// All successful sends, in order, as (address, text).
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.sends.clone()
    }

    /// Outbound texts recorded in an address's history.
    pub fn outbound_texts(&self, address: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("mock channel lock poisoned");
        inner
            .histories
            .get(address)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.outbound)
                    .map(|m| m.text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Typing-indicator toggles, in order, as (address, on).
    pub fn typing_events(&self) -> Vec<(String, bool)> {
        let inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.typing_events.clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn send_message(&self, address: &str, text: &str) -> ChannelResult<MessageRef> {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        if inner.failing_sends > 0 {
            inner.failing_sends -= 1;
            return Err(ChannelError::SendFailed(format!(
                "scripted send failure to {address}"
            )));
        }
        let message_ref = MessageRef::new();
        inner.known_refs.insert(message_ref.0.clone());
        inner.sends.push((address.to_string(), text.to_string()));
        inner
            .histories
            .entry(address.to_string())
            .or_default()
            .push(ChannelMessage {
                message_ref: message_ref.clone(),
                text: text.to_string(),
                outbound: true,
                sent_at: Utc::now(),
            });
        Ok(message_ref)
    }

    async fn delivery_status(&self, message_ref: &MessageRef) -> ChannelResult<DeliveryStatus> {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        if !inner.known_refs.contains(&message_ref.0) {
            return Err(ChannelError::UnknownMessageRef(message_ref.0.clone()));
        }
        Ok(inner
            .delivery_script
            .pop_front()
            .unwrap_or(DeliveryStatus::Delivered))
    }

    async fn recent_history(
        &self,
        address: &str,
        limit: usize,
    ) -> ChannelResult<Vec<ChannelMessage>> {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        if inner.history_script.pop_front() == Some(true) {
            return Err(ChannelError::Unavailable(format!(
                "scripted history failure for {address}"
            )));
        }
        let history = inner.histories.get(address).cloned().unwrap_or_default();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    async fn set_typing(&self, address: &str, on: bool) -> ChannelResult<()> {
        let mut inner = self.inner.lock().expect("mock channel lock poisoned");
        inner.typing_events.push((address.to_string(), on));
        Ok(())
    }
}
