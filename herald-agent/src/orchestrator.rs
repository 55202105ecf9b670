//! The per-agent control loop.
//!
//! Each iteration: drain control commands, gate on pacing, claim one
//! contact, run the stuck-contact breaker, verify reachability, diff the
//! delivered history against the canonical sequence, send the remaining
//! steps, persist the outcome, and schedule the next iteration with a
//! randomized human-like delay.
//!
//! Suspension points are the explicit sleeps and ack polls only; the loop
//! itself is single-threaded and cooperative. The atomic claim on the
//! store is the sole cross-agent synchronization point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use herald_data::{
    Channel, Clock, Contact, ContactPatch, ContactStatus, ContactStore, StatusTransition,
    StoreError,
};
use herald_engine::{
    DelaySampler, DuplicateGuard, PacingEngine, SequenceStep, StuckContactDetector,
    VerificationSessionManager, VerifyOutcome,
};

use crate::config::AgentConfig;
use crate::control::ControlCommand;

/// How one claimed contact was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContactOutcome {
    /// Sequence fully delivered; take the full inter-contact wait.
    Completed,
    /// Terminal without a full send (failed, already contacted, stuck);
    /// only a short cool-off so failures do not throttle throughput.
    Terminal,
    /// Returned to the queue (transient channel trouble); cool off and
    /// let the stuck breaker count the retries.
    Requeued,
    /// A pause command landed mid-sequence; the contact was requeued and
    /// the loop idles without further waiting.
    Suppressed,
}

pub struct Orchestrator {
    agent_id: String,
    store: Arc<dyn ContactStore>,
    channel: Arc<dyn Channel>,
    clock: Arc<dyn Clock>,
    sampler: Arc<dyn DelaySampler>,
    pacing: PacingEngine,
    verifier: VerificationSessionManager,
    guard: DuplicateGuard,
    stuck: StuckContactDetector,
    sequence: Vec<SequenceStep>,
    history_limit: usize,
    idle_backoff: Duration,
    store_retry_backoff: Duration,
    inter_contact_min: Duration,
    inter_contact_max: Duration,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    events: mpsc::UnboundedSender<StatusTransition>,
    cancel: CancellationToken,
    paused: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn from_config(
        config: &AgentConfig,
        store: Arc<dyn ContactStore>,
        channel: Arc<dyn Channel>,
        clock: Arc<dyn Clock>,
        sampler: Arc<dyn DelaySampler>,
        commands: mpsc::UnboundedReceiver<ControlCommand>,
        events: mpsc::UnboundedSender<StatusTransition>,
        cancel: CancellationToken,
    ) -> Self {
        let own_texts = config
            .sequence
            .iter()
            .flat_map(|step| step.variants.iter().cloned());
        let verifier = VerificationSessionManager::new(
            config.verify.clone(),
            Arc::clone(&channel),
            Arc::clone(&clock),
            own_texts,
        );
        let pacing = PacingEngine::new(config.pacing.clone(), clock.now().date_naive());

        Self {
            agent_id: config.agent_id.clone(),
            store,
            channel,
            clock,
            sampler,
            pacing,
            verifier,
            guard: DuplicateGuard::new(config.similarity_threshold),
            stuck: StuckContactDetector::new(config.stuck_claim_limit),
            sequence: config.sequence.clone(),
            history_limit: config.history_limit,
            idle_backoff: config.idle_backoff,
            store_retry_backoff: config.store_retry_backoff,
            inter_contact_min: config.inter_contact_min,
            inter_contact_max: config.inter_contact_max,
            commands,
            events,
            cancel,
            paused: false,
        }
    }

    /// Run the agent loop until cancelled.
    pub async fn run(mut self) -> Result<()> {
        info!(agent_id = %self.agent_id, "agent loop starting");

        while !self.cancel.is_cancelled() {
            self.drain_commands();
            if self.paused {
                self.sleep_or_cancel(self.idle_backoff).await;
                continue;
            }

            let now = self.clock.now();
            let gate = self.pacing.gate(now);
            if !gate.allowed {
                let reason = gate
                    .reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let wait = gate.retry_after.unwrap_or(self.idle_backoff);
                debug!(reason = %reason, wait_secs = wait.as_secs(), "pacing gate closed");
                self.sleep_or_cancel(wait).await;
                continue;
            }

            let contact = match self.store.claim_next(&self.agent_id).await {
                Ok(Some(contact)) => contact,
                Ok(None) => {
                    debug!("no pending contacts");
                    self.sleep_or_cancel(self.idle_backoff).await;
                    continue;
                }
                Err(StoreError::Unavailable(msg)) => {
                    warn!(error = %msg, "store unavailable, retrying claim");
                    self.sleep_or_cancel(self.store_retry_backoff).await;
                    continue;
                }
                // DuplicateClaim (and other contract violations) must fail
                // loudly rather than be tolerated.
                Err(e) => return Err(e.into()),
            };

            info!(contact_id = %contact.id, "claimed contact");
            self.emit(&contact.id, ContactStatus::Pending, ContactStatus::Claimed);

            match self.process_contact(&contact).await? {
                ContactOutcome::Completed => {
                    self.stuck.clear(&contact.id);
                    let wait = self.inter_contact_wait();
                    debug!(wait_secs = wait.as_secs(), "inter-contact wait");
                    self.sleep_or_cancel(wait).await;
                }
                ContactOutcome::Terminal => {
                    self.stuck.clear(&contact.id);
                    self.sleep_or_cancel(self.sampler.cool_off()).await;
                }
                ContactOutcome::Requeued => {
                    // Keep the stuck counter; repeated requeues trip the
                    // breaker.
                    self.sleep_or_cancel(self.sampler.cool_off()).await;
                }
                ContactOutcome::Suppressed => {}
            }
        }

        info!(agent_id = %self.agent_id, "agent loop stopped");
        Ok(())
    }

    async fn process_contact(&mut self, contact: &Contact) -> Result<ContactOutcome> {
        // Circuit breaker first: a contact repeatedly handed back without
        // progress gets forced terminal.
        let attempts = self.stuck.record_claim(&contact.id);
        if self.stuck.is_stuck(&contact.id) {
            warn!(
                contact_id = %contact.id,
                attempts = attempts,
                "stuck contact, forcing terminal status"
            );
            self.verifier.clear(&contact.channel_address);
            self.commit_terminal(contact, ContactStatus::Contacted).await?;
            return Ok(ContactOutcome::Terminal);
        }

        let outcome = match self
            .verifier
            .probe(&contact.id, &contact.channel_address)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Transient channel trouble: requeue and count it as
                // suspicious so a pattern of failures pauses the agent.
                warn!(contact_id = %contact.id, error = %e, "verification channel error, requeueing");
                self.pacing
                    .report_suspicious("channel_error", &e.to_string(), self.clock.now());
                self.requeue(contact).await?;
                return Ok(ContactOutcome::Requeued);
            }
        };

        match outcome {
            VerifyOutcome::AlreadyContacted => {
                info!(contact_id = %contact.id, "already contacted, no messages sent");
                self.commit_terminal(contact, ContactStatus::Contacted).await?;
                Ok(ContactOutcome::Terminal)
            }
            VerifyOutcome::Failed | VerifyOutcome::TimedOut => {
                info!(contact_id = %contact.id, outcome = ?outcome, "verification failed, skipping");
                self.commit_terminal(contact, ContactStatus::Skipped).await?;
                Ok(ContactOutcome::Terminal)
            }
            VerifyOutcome::Confirmed => self.send_sequence(contact).await,
        }
    }

    /// Send every sequence step not already present in the channel
    /// history. Send failures skip to the next step; the contact is marked
    /// contacted regardless, since reprocessing risks duplicate sends.
    async fn send_sequence(&mut self, contact: &Contact) -> Result<ContactOutcome> {
        // A failed history fetch must not be treated as an empty history:
        // the diff would see nothing delivered and resend every step.
        // Requeue instead, like a verification channel error.
        let history = match self
            .channel
            .recent_history(&contact.channel_address, self.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(contact_id = %contact.id, error = %e, "history fetch failed, requeueing");
                self.pacing
                    .report_suspicious("channel_error", &e.to_string(), self.clock.now());
                self.requeue(contact).await?;
                return Ok(ContactOutcome::Requeued);
            }
        };
        let pending = self.guard.diff(&history, &self.sequence);

        if pending.is_empty() {
            info!(contact_id = %contact.id, "all steps already delivered");
            self.pacing
                .record_contact_processed(&contact.id, self.clock.now());
            self.commit_terminal(contact, ContactStatus::Contacted).await?;
            return Ok(ContactOutcome::Terminal);
        }

        let band = self.pacing.band_at(self.clock.now());
        let total = pending.len();
        let mut sent = 0u32;

        for (i, step_index) in pending.iter().enumerate() {
            // Pause lands between sends, never mid-message, and the hourly
            // budget is enforced per message so a sequence never pushes a
            // bucket past its band limit.
            loop {
                self.drain_commands();
                if self.paused || self.cancel.is_cancelled() {
                    info!(
                        contact_id = %contact.id,
                        sent = sent,
                        "pause requested, suppressing remaining sends"
                    );
                    self.requeue(contact).await?;
                    return Ok(ContactOutcome::Suppressed);
                }
                match self.pacing.hourly_wait(self.clock.now()) {
                    None => break,
                    Some(wait) => {
                        debug!(
                            contact_id = %contact.id,
                            wait_secs = wait.as_secs(),
                            "hourly budget exhausted mid-sequence"
                        );
                        self.sleep_or_cancel(wait).await;
                    }
                }
            }

            let step = &self.sequence[*step_index];
            let text = step.variants[0].clone();

            // Typing simulation around the send.
            let _ = self.channel.set_typing(&contact.channel_address, true).await;
            tokio::time::sleep(self.sampler.typing(text.len())).await;
            let _ = self
                .channel
                .set_typing(&contact.channel_address, false)
                .await;

            match self.channel.send_message(&contact.channel_address, &text).await {
                Ok(_) => {
                    sent += 1;
                    self.pacing.record_message(self.clock.now());
                    debug!(contact_id = %contact.id, step = step_index, "step sent");
                    self.try_commit(
                        &contact.id,
                        ContactPatch::message_sent(self.clock.now()),
                        "persist sent step",
                    )
                    .await?;
                }
                Err(e) => {
                    warn!(
                        contact_id = %contact.id,
                        step = step_index,
                        error = %e,
                        "step send failed, continuing with remaining steps"
                    );
                    self.pacing
                        .report_suspicious("send_failed", &e.to_string(), self.clock.now());
                }
            }

            if i + 1 < total {
                self.sleep_or_cancel(self.sampler.inter_message(band)).await;
            }
        }

        self.pacing
            .record_contact_processed(&contact.id, self.clock.now());
        self.commit_terminal(contact, ContactStatus::Contacted).await?;
        info!(contact_id = %contact.id, sent = sent, "sequence complete");
        Ok(ContactOutcome::Completed)
    }

    /// Randomized inter-contact wait: Gaussian base + jitter + occasional
    /// long pause, clamped to the configured band regardless of inputs.
    fn inter_contact_wait(&mut self) -> Duration {
        let band = self.pacing.band_at(self.clock.now());
        let base = self.sampler.inter_contact(band);
        let jitter = self.sampler.jitter();
        let pause = self.sampler.long_pause().unwrap_or(Duration::ZERO);
        clamp_wait(
            base + jitter + pause,
            self.inter_contact_min,
            self.inter_contact_max,
        )
    }

    async fn commit_terminal(&mut self, contact: &Contact, status: ContactStatus) -> Result<()> {
        let mut patch = ContactPatch::terminal(status, self.clock.now());
        patch.consecutive_claim_attempts = Some(0);
        self.try_commit(&contact.id, patch, "persist terminal status")
            .await?;
        self.verifier.clear(&contact.channel_address);
        self.emit(&contact.id, ContactStatus::Claimed, status);
        Ok(())
    }

    async fn requeue(&mut self, contact: &Contact) -> Result<()> {
        let patch = ContactPatch {
            status: Some(ContactStatus::Pending),
            assigned_agent: Some(None),
            ..ContactPatch::default()
        };
        self.try_commit(&contact.id, patch, "requeue contact").await?;
        self.emit(&contact.id, ContactStatus::Claimed, ContactStatus::Pending);
        Ok(())
    }

    /// Commit with the conservative error policy: transient failures are
    /// logged and tolerated (channel history is the dedup backstop);
    /// contract violations abort the agent.
    async fn try_commit(
        &self,
        contact_id: &str,
        patch: ContactPatch,
        context: &str,
    ) -> Result<()> {
        match self.store.commit(contact_id, patch).await {
            Ok(()) => Ok(()),
            Err(e @ (StoreError::Unavailable(_) | StoreError::NotFound(_))) => {
                warn!(contact_id = %contact_id, error = %e, "{} failed", context);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ControlCommand::Pause => {
                    info!(agent_id = %self.agent_id, "pause command received");
                    self.paused = true;
                }
                ControlCommand::Resume => {
                    info!(agent_id = %self.agent_id, "resume command received");
                    self.paused = false;
                    self.pacing.resume();
                }
                ControlCommand::UpdatePacing(update) => {
                    info!(agent_id = %self.agent_id, ?update, "pacing config updated");
                    self.pacing.update(update);
                }
            }
        }
    }

    fn emit(&self, contact_id: &str, from: ContactStatus, to: ContactStatus) {
        let _ = self.events.send(StatusTransition {
            contact_id: contact_id.to_string(),
            agent_id: self.agent_id.clone(),
            from,
            to,
            at: self.clock.now(),
        });
    }

    async fn sleep_or_cancel(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Clamp the combined inter-contact wait to the configured band.
pub fn clamp_wait(total: Duration, min: Duration, max: Duration) -> Duration {
    total.clamp(min, max)
}
