//! Probe verification state machine.
//!
//! Before committing a full message sequence, the agent sends two cheap
//! probe messages and waits for delivery acknowledgments. A contact whose
//! probes are acked is reachable; anything else is terminal for the
//! contact. A pre-existing conversation short-circuits to
//! `AlreadyContacted` without sending anything, so dormant threads are
//! never reopened.
//!
//! All timeouts are wall-clock deadlines checked by the polling loop (via
//! the injected `Clock`), never forced cancellation, so cleanup always
//! runs deterministically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use herald_data::{Channel, ChannelError, Clock, MessageRef};

use crate::dedup::normalize;

/// Phase of a verification session. `ProbeSent` is never revisited once
/// left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    ProbeSent,
    Probe1Confirmed,
    Probe2Sent,
    Confirmed,
    Failed,
    TimedOut,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Confirmed | SessionPhase::Failed | SessionPhase::TimedOut
        )
    }
}

/// Final outcome of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Both probes acked; safe to continue with the sequence.
    Confirmed,
    /// A real conversation already exists; nothing was sent.
    AlreadyContacted,
    /// A probe exhausted its retry budget without an ack.
    Failed,
    /// The session deadline passed before a terminal phase.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct VerificationSession {
    pub contact_id: String,
    pub session_id: Uuid,
    pub channel_address: String,
    pub phase: SessionPhase,
    pub sent_message_refs: Vec<MessageRef>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// The two probe texts, sent in order.
    pub probe_texts: Vec<String>,
    /// Overall session deadline.
    pub session_deadline: Duration,
    /// First ack poll after this jittered wait, seconds.
    pub ack_poll_secs: (u64, u64),
    /// Single retry wait before declaring failure, seconds.
    pub ack_retry_secs: (u64, u64),
    /// Human-like wait between probe 1 and probe 2, seconds.
    pub inter_probe_secs: (u64, u64),
    /// History window for the pre-existing-conversation check.
    pub history_limit: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            probe_texts: vec!["Hey!".to_string(), "Is this still available?".to_string()],
            session_deadline: Duration::from_secs(300),
            ack_poll_secs: (3, 8),
            ack_retry_secs: (8, 15),
            inter_probe_secs: (15, 30),
            history_limit: 20,
        }
    }
}

enum AckResult {
    Acked,
    NoAck,
    DeadlineExceeded,
}

/// Drives verification sessions, one active session per channel address.
pub struct VerificationSessionManager {
    config: VerifyConfig,
    channel: Arc<dyn Channel>,
    clock: Arc<dyn Clock>,
    /// Normalized texts recognized as our own outreach (sequence variants),
    /// so a crashed run's history is not mistaken for a real conversation.
    own_texts: Vec<String>,
    /// Sessions interrupted by a channel error, resumable by address.
    active: HashMap<String, VerificationSession>,
    rng: StdRng,
}

impl VerificationSessionManager {
    pub fn new(
        config: VerifyConfig,
        channel: Arc<dyn Channel>,
        clock: Arc<dyn Clock>,
        own_texts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            config,
            channel,
            clock,
            own_texts: own_texts.into_iter().map(|t| normalize(&t)).collect(),
            active: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Run verification for a contact. Resumes an interrupted session for
    /// the same address instead of creating a duplicate; terminal sessions
    /// are destroyed, so the next call starts fresh.
    pub async fn probe(
        &mut self,
        contact_id: &str,
        address: &str,
    ) -> Result<VerifyOutcome, ChannelError> {
        let mut session = match self.active.remove(address) {
            Some(existing) if !existing.phase.is_terminal() => {
                debug!(
                    contact_id = %contact_id,
                    session_id = %existing.session_id,
                    phase = ?existing.phase,
                    "resuming interrupted verification session"
                );
                existing
            }
            _ => {
                let history = self
                    .channel
                    .recent_history(address, self.config.history_limit)
                    .await?;
                if history.iter().any(|m| self.is_foreign(&m.text, m.outbound)) {
                    info!(contact_id = %contact_id, "pre-existing conversation, skipping probes");
                    return Ok(VerifyOutcome::AlreadyContacted);
                }

                let started_at = self.clock.now();
                let deadline = started_at
                    + ChronoDuration::from_std(self.config.session_deadline)
                        .unwrap_or_else(|_| ChronoDuration::minutes(5));
                VerificationSession {
                    contact_id: contact_id.to_string(),
                    session_id: Uuid::new_v4(),
                    channel_address: address.to_string(),
                    phase: SessionPhase::ProbeSent,
                    sent_message_refs: Vec::new(),
                    started_at,
                    deadline,
                }
            }
        };

        match self.drive(&mut session).await {
            Ok(outcome) => {
                info!(
                    contact_id = %contact_id,
                    session_id = %session.session_id,
                    outcome = ?outcome,
                    "verification session finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                // Keep the session for resumption; the orchestrator decides
                // whether to retry this contact.
                warn!(
                    contact_id = %contact_id,
                    session_id = %session.session_id,
                    error = %e,
                    "verification interrupted by channel error"
                );
                self.active.insert(address.to_string(), session);
                Err(e)
            }
        }
    }

    /// Drop any cached session for an address (stuck-contact recovery).
    pub fn clear(&mut self, address: &str) {
        self.active.remove(address);
    }

    pub fn has_active_session(&self, address: &str) -> bool {
        self.active.contains_key(address)
    }

    /// A message is foreign if it came from the contact, or if it is an
    /// outbound text we do not recognize as our own probe or sequence step
    /// (i.e. a previous campaign's thread).
    fn is_foreign(&self, text: &str, outbound: bool) -> bool {
        if !outbound {
            return true;
        }
        let normalized = normalize(text);
        let is_probe = self
            .config
            .probe_texts
            .iter()
            .any(|p| normalize(p) == normalized);
        let is_own = self.own_texts.iter().any(|t| *t == normalized);
        !is_probe && !is_own
    }

    async fn drive(
        &mut self,
        session: &mut VerificationSession,
    ) -> Result<VerifyOutcome, ChannelError> {
        // Probe 1.
        if session.sent_message_refs.is_empty() {
            let message_ref = self
                .channel
                .send_message(&session.channel_address, &self.config.probe_texts[0])
                .await?;
            session.sent_message_refs.push(message_ref);
            session.phase = SessionPhase::ProbeSent;
        }

        if session.phase == SessionPhase::ProbeSent {
            let probe1 = session.sent_message_refs[0].clone();
            match self.await_ack(&probe1, session.deadline).await? {
                AckResult::Acked => session.phase = SessionPhase::Probe1Confirmed,
                AckResult::NoAck => {
                    session.phase = SessionPhase::Failed;
                    return Ok(VerifyOutcome::Failed);
                }
                AckResult::DeadlineExceeded => {
                    session.phase = SessionPhase::TimedOut;
                    return Ok(VerifyOutcome::TimedOut);
                }
            }
        }

        // Probe 2 after a human-like pause.
        if session.phase == SessionPhase::Probe1Confirmed {
            self.sleep_range(self.config.inter_probe_secs).await;
            if self.clock.now() >= session.deadline {
                session.phase = SessionPhase::TimedOut;
                return Ok(VerifyOutcome::TimedOut);
            }
            let message_ref = self
                .channel
                .send_message(&session.channel_address, &self.config.probe_texts[1])
                .await?;
            session.sent_message_refs.push(message_ref);
            session.phase = SessionPhase::Probe2Sent;
        }

        if session.phase == SessionPhase::Probe2Sent {
            let probe2 = session
                .sent_message_refs
                .last()
                .cloned()
                .unwrap_or_else(MessageRef::new);
            match self.await_ack(&probe2, session.deadline).await? {
                AckResult::Acked => {
                    session.phase = SessionPhase::Confirmed;
                    return Ok(VerifyOutcome::Confirmed);
                }
                AckResult::NoAck => {
                    session.phase = SessionPhase::Failed;
                    return Ok(VerifyOutcome::Failed);
                }
                AckResult::DeadlineExceeded => {
                    session.phase = SessionPhase::TimedOut;
                    return Ok(VerifyOutcome::TimedOut);
                }
            }
        }

        // A resumed session already in a terminal phase.
        Ok(match session.phase {
            SessionPhase::Confirmed => VerifyOutcome::Confirmed,
            SessionPhase::TimedOut => VerifyOutcome::TimedOut,
            _ => VerifyOutcome::Failed,
        })
    }

    /// Poll for a delivery ack: one jittered wait, then one retry with a
    /// longer wait. The session deadline is checked after each wait.
    async fn await_ack(
        &mut self,
        message_ref: &MessageRef,
        deadline: DateTime<Utc>,
    ) -> Result<AckResult, ChannelError> {
        self.sleep_range(self.config.ack_poll_secs).await;
        if self.clock.now() >= deadline {
            return Ok(AckResult::DeadlineExceeded);
        }
        if self.channel.delivery_status(message_ref).await?.is_acked() {
            return Ok(AckResult::Acked);
        }

        self.sleep_range(self.config.ack_retry_secs).await;
        if self.clock.now() >= deadline {
            return Ok(AckResult::DeadlineExceeded);
        }
        if self.channel.delivery_status(message_ref).await?.is_acked() {
            Ok(AckResult::Acked)
        } else {
            Ok(AckResult::NoAck)
        }
    }

    async fn sleep_range(&mut self, (min, max): (u64, u64)) {
        if max == 0 {
            return;
        }
        let secs = if min >= max {
            min
        } else {
            self.rng.gen_range(min..=max)
        };
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_data::{DeliveryStatus, ManualClock, MockChannel};

    fn instant_config() -> VerifyConfig {
        VerifyConfig {
            ack_poll_secs: (0, 0),
            ack_retry_secs: (0, 0),
            inter_probe_secs: (0, 0),
            ..VerifyConfig::default()
        }
    }

    fn manager(
        channel: Arc<MockChannel>,
        clock: Arc<ManualClock>,
        config: VerifyConfig,
    ) -> VerificationSessionManager {
        VerificationSessionManager::new(
            config,
            channel,
            clock,
            ["Step one text".to_string(), "Step two text".to_string()],
        )
    }

    #[tokio::test]
    async fn both_probes_acked_confirms_contact() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut mgr = manager(channel.clone(), clock, instant_config());

        // First poll for each probe is acked.
        channel.script_delivery([DeliveryStatus::Delivered, DeliveryStatus::Read]);

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Confirmed);
        assert_eq!(channel.sent_messages().len(), 2);
        assert!(!mgr.has_active_session("addr-1"));
    }

    #[tokio::test]
    async fn inbound_history_short_circuits_to_already_contacted() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        channel.push_history("addr-1", "hey, who is this?", false);
        let mut mgr = manager(channel.clone(), clock, instant_config());

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyContacted);
        assert!(channel.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_outbound_history_short_circuits() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        // A previous campaign's thread: outbound but not ours.
        channel.push_history("addr-1", "Hello from the spring promo!", true);
        let mut mgr = manager(channel.clone(), clock, instant_config());

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyContacted);
        assert!(channel.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn own_probe_and_step_history_does_not_short_circuit() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = instant_config();
        // Leftovers from a crashed run: a probe and a sequence step.
        channel.push_history("addr-1", &config.probe_texts[0], true);
        channel.push_history("addr-1", "Step one text", true);
        let mut mgr = manager(channel.clone(), clock, config);

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Confirmed);
        assert_eq!(channel.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn unacked_probe_fails_after_single_retry() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut mgr = manager(channel.clone(), clock, instant_config());

        // Probe 1: first poll and the retry both come back unacked.
        channel.script_delivery([DeliveryStatus::Sent, DeliveryStatus::Sent]);

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Failed);
        // Only probe 1 was sent.
        assert_eq!(channel.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn failed_session_is_destroyed_and_next_probe_starts_fresh() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut mgr = manager(channel.clone(), clock, instant_config());

        channel.script_delivery([DeliveryStatus::Sent, DeliveryStatus::Sent]);
        assert_eq!(
            mgr.probe("c-1", "addr-1").await.unwrap(),
            VerifyOutcome::Failed
        );
        assert!(!mgr.has_active_session("addr-1"));

        // Fresh session: probe 1 is sent again and this time acks.
        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Confirmed);
        assert_eq!(channel.sent_messages().len(), 3);
    }

    #[tokio::test]
    async fn deadline_expiry_times_out_the_session() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = VerifyConfig {
            session_deadline: Duration::ZERO,
            ..instant_config()
        };
        let mut mgr = manager(channel.clone(), clock, config);

        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::TimedOut);
        // Probe 1 went out before the deadline check caught it.
        assert_eq!(channel.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn clock_advance_past_deadline_times_out_resumed_session() {
        let channel = Arc::new(MockChannel::new());
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let mut mgr = manager(channel.clone(), clock.clone(), instant_config());

        // Probe 1's send fails, freezing the session with its deadline at
        // start + 5 minutes.
        channel.fail_next_sends(1);
        assert!(mgr.probe("c-1", "addr-1").await.is_err());
        assert!(mgr.has_active_session("addr-1"));

        // Resume after the deadline has passed: the first ack-poll check
        // trips and the session times out.
        clock.advance(ChronoDuration::minutes(6));
        channel.script_delivery([DeliveryStatus::Delivered]);
        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::TimedOut);
        assert!(!mgr.has_active_session("addr-1"));
    }

    #[tokio::test]
    async fn channel_error_keeps_session_for_resumption() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut mgr = manager(channel.clone(), clock, instant_config());

        channel.fail_next_sends(1);
        assert!(mgr.probe("c-1", "addr-1").await.is_err());
        assert!(mgr.has_active_session("addr-1"));

        // Resumption skips the history pre-check and retries probe 1.
        let outcome = mgr.probe("c-1", "addr-1").await.unwrap();
        assert_eq!(outcome, VerifyOutcome::Confirmed);
        assert!(!mgr.has_active_session("addr-1"));
    }

    #[tokio::test]
    async fn clear_drops_cached_session() {
        let channel = Arc::new(MockChannel::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut mgr = manager(channel.clone(), clock, instant_config());

        channel.fail_next_sends(1);
        let _ = mgr.probe("c-1", "addr-1").await;
        assert!(mgr.has_active_session("addr-1"));

        mgr.clear("addr-1");
        assert!(!mgr.has_active_session("addr-1"));
    }
}
