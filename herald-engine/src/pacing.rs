//! Adaptive pacing engine.
//!
//! Single mutation entry point for all throughput state: daily/hourly send
//! counters, the business-hours window, the escalating daily cap, and the
//! suspicious-activity pause latch. The gate check order is fixed and the
//! first failing check short-circuits.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Three-tier hour classification driving hourly limits and delay means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HourBand {
    Peak,
    Normal,
    Low,
}

/// Per-band hourly message limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyLimits {
    pub peak: u32,
    pub normal: u32,
    pub low: u32,
}

impl HourlyLimits {
    pub fn for_band(self, band: HourBand) -> u32 {
        match band {
            HourBand::Peak => self.peak,
            HourBand::Normal => self.normal,
            HourBand::Low => self.low,
        }
    }
}

/// Default band layout: quiet nights, normal working hours, evening peak.
pub fn default_bands() -> [HourBand; 24] {
    let mut bands = [HourBand::Low; 24];
    for hour in 9..18 {
        bands[hour] = HourBand::Normal;
    }
    for hour in 18..21 {
        bands[hour] = HourBand::Peak;
    }
    bands
}

#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Daily contact cap on day one; escalates toward `daily_cap_target`.
    pub daily_cap_start: u32,
    pub daily_cap_increment: u32,
    pub daily_cap_target: u32,
    /// Business hours as `[start, end)`, separate weekday/weekend profiles.
    pub weekday_window: (u32, u32),
    pub weekend_window: (u32, u32),
    pub band_by_hour: [HourBand; 24],
    pub hourly_limits: HourlyLimits,
    /// Suspicious events in the trailing hour that close the gate.
    pub suspicious_gate_threshold: usize,
    /// Suspicious events in the trailing hour that latch the pause flag.
    pub suspicious_pause_threshold: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            daily_cap_start: 20,
            daily_cap_increment: 10,
            daily_cap_target: 50,
            weekday_window: (9, 21),
            weekend_window: (10, 20),
            band_by_hour: default_bands(),
            hourly_limits: HourlyLimits {
                peak: 12,
                normal: 8,
                low: 4,
            },
            suspicious_gate_threshold: 3,
            suspicious_pause_threshold: 5,
        }
    }
}

/// Config fields the control plane may change at runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacingUpdate {
    pub daily_cap: Option<u32>,
    pub daily_cap_target: Option<u32>,
    pub weekday_window: Option<(u32, u32)>,
    pub weekend_window: Option<(u32, u32)>,
}

/// Why the gate refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    OutsideHours,
    DailyCap,
    HourlyCap,
    Paused,
    Suspicious,
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateReason::OutsideHours => write!(f, "outside_hours"),
            GateReason::DailyCap => write!(f, "daily_cap"),
            GateReason::HourlyCap => write!(f, "hourly_cap"),
            GateReason::Paused => write!(f, "paused"),
            GateReason::Suspicious => write!(f, "suspicious"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<GateReason>,
    pub retry_after: Option<Duration>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
        }
    }

    fn block(reason: GateReason, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuspiciousEvent {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub detail: String,
}

/// One archived day of pacing counters, written at rollover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDay {
    pub date: NaiveDate,
    pub contacts_processed: u32,
    pub messages_sent: u32,
    pub daily_cap: u32,
}

/// Mutable pacing counters for the current calendar day.
#[derive(Debug, Clone)]
pub struct PacingState {
    pub date: NaiveDate,
    pub contacts_processed_today: u32,
    pub messages_sent_today: u32,
    pub messages_per_hour: [u32; 24],
    pub daily_cap: u32,
    pub paused: bool,
    processed_contacts: HashSet<String>,
    suspicious_events: Vec<SuspiciousEvent>,
}

impl PacingState {
    fn new(date: NaiveDate, daily_cap: u32) -> Self {
        Self {
            date,
            contacts_processed_today: 0,
            messages_sent_today: 0,
            messages_per_hour: [0; 24],
            daily_cap,
            paused: false,
            processed_contacts: HashSet::new(),
            suspicious_events: Vec::new(),
        }
    }
}

pub struct PacingEngine {
    config: PacingConfig,
    state: PacingState,
    archive: Vec<ArchivedDay>,
}

impl PacingEngine {
    pub fn new(config: PacingConfig, today: NaiveDate) -> Self {
        let cap = config.daily_cap_start;
        Self {
            config,
            state: PacingState::new(today, cap),
            archive: Vec::new(),
        }
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    pub fn archive(&self) -> &[ArchivedDay] {
        &self.archive
    }

    /// Band classification for an instant, used by the delay sampler.
    pub fn band_at(&self, now: DateTime<Utc>) -> HourBand {
        self.config.band_by_hour[now.hour() as usize % 24]
    }

    /// May the agent act at `now`? First failing check short-circuits.
    pub fn gate(&mut self, now: DateTime<Utc>) -> GateDecision {
        self.rollover(now);

        // 1. Business-hours window.
        let (start, end) = self.window_for(now.weekday());
        let hour = now.hour();
        if hour < start || hour >= end {
            let retry = self.next_window_open(now).map(|open| {
                (open - now).to_std().unwrap_or_default()
            });
            return GateDecision::block(GateReason::OutsideHours, retry);
        }

        // 2. Daily cap.
        if self.state.contacts_processed_today >= self.state.daily_cap {
            return GateDecision::block(GateReason::DailyCap, None);
        }

        // 3. Hourly cap for the current band.
        let band = self.band_at(now);
        let limit = self.config.hourly_limits.for_band(band);
        if self.state.messages_per_hour[hour as usize] >= limit {
            return GateDecision::block(GateReason::HourlyCap, Some(until_next_hour(now)));
        }

        // 4. Pause latch.
        if self.state.paused {
            return GateDecision::block(GateReason::Paused, None);
        }

        // 5. Suspicious-activity window.
        if self.trailing_suspicious(now) >= self.config.suspicious_gate_threshold {
            return GateDecision::block(GateReason::Suspicious, None);
        }

        GateDecision::allow()
    }

    /// Record a completed contact: `contacts_processed_today` increments
    /// once per distinct contact, message counters per message.
    pub fn record_send(&mut self, contact_id: &str, message_count: u32, now: DateTime<Utc>) {
        self.record_contact_processed(contact_id, now);
        for _ in 0..message_count {
            self.record_message(now);
        }
    }

    /// Count a contact toward the daily cap, once per distinct contact.
    pub fn record_contact_processed(&mut self, contact_id: &str, now: DateTime<Utc>) {
        self.rollover(now);
        if self.state.processed_contacts.insert(contact_id.to_string()) {
            self.state.contacts_processed_today += 1;
        }
    }

    /// Count one outbound message against the daily and hourly buckets.
    /// Callers sending multi-step sequences record each message as it goes
    /// out so the hourly bound holds mid-sequence.
    pub fn record_message(&mut self, now: DateTime<Utc>) {
        self.rollover(now);
        self.state.messages_sent_today += 1;
        self.state.messages_per_hour[now.hour() as usize] += 1;
    }

    /// Wait needed before the current hour's band has headroom for one
    /// more message; `None` means a message may be sent now. Checked
    /// before every send, not just per contact, so a sequence never pushes
    /// a bucket past its band limit.
    pub fn hourly_wait(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        self.rollover(now);
        let limit = self.config.hourly_limits.for_band(self.band_at(now));
        if self.state.messages_per_hour[now.hour() as usize] < limit {
            None
        } else {
            Some(until_next_hour(now))
        }
    }

    /// Record a suspicious event (delivery anomalies, send failures). Once
    /// the trailing hour reaches the pause threshold the engine latches
    /// `paused`; only a manual `resume` clears it.
    pub fn report_suspicious(&mut self, kind: &str, detail: &str, now: DateTime<Utc>) {
        self.state.suspicious_events.push(SuspiciousEvent {
            at: now,
            kind: kind.to_string(),
            detail: detail.to_string(),
        });
        let trailing = self.trailing_suspicious(now);
        if trailing >= self.config.suspicious_pause_threshold && !self.state.paused {
            warn!(
                trailing_events = trailing,
                "suspicious-activity threshold reached, pausing agent"
            );
            self.state.paused = true;
        }
    }

    /// Operator pause.
    pub fn pause(&mut self) {
        self.state.paused = true;
    }

    /// Operator resume: the single manual clear point for the pause latch
    /// and the suspicious-event window.
    pub fn resume(&mut self) {
        self.state.paused = false;
        self.state.suspicious_events.clear();
    }

    /// Apply a control-plane config update at the next loop check.
    pub fn update(&mut self, update: PacingUpdate) {
        if let Some(cap) = update.daily_cap {
            self.state.daily_cap = cap;
        }
        if let Some(target) = update.daily_cap_target {
            self.config.daily_cap_target = target;
        }
        if let Some(window) = update.weekday_window {
            self.config.weekday_window = window;
        }
        if let Some(window) = update.weekend_window {
            self.config.weekend_window = window;
        }
    }

    /// Daily rollover: archive yesterday and escalate the cap only if
    /// yesterday reached >= 90% of its cap. A second call on the same date
    /// is a no-op.
    fn rollover(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today == self.state.date {
            return;
        }

        self.archive.push(ArchivedDay {
            date: self.state.date,
            contacts_processed: self.state.contacts_processed_today,
            messages_sent: self.state.messages_sent_today,
            daily_cap: self.state.daily_cap,
        });

        let processed = self.state.contacts_processed_today as f64;
        let cap = self.state.daily_cap;
        let next_cap = if processed >= 0.9 * cap as f64 {
            (cap + self.config.daily_cap_increment).min(self.config.daily_cap_target)
        } else {
            cap
        };
        if next_cap != cap {
            info!(from = cap, to = next_cap, "daily cap escalated");
        }

        // The pause latch survives rollover: it clears manually, not at
        // midnight.
        let paused = self.state.paused;
        let events = std::mem::take(&mut self.state.suspicious_events);
        self.state = PacingState::new(today, next_cap);
        self.state.paused = paused;
        self.state.suspicious_events = events;
    }

    fn window_for(&self, weekday: Weekday) -> (u32, u32) {
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            self.config.weekend_window
        } else {
            self.config.weekday_window
        }
    }

    /// The next instant the business-hours window opens after `now`.
    fn next_window_open(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        for day_offset in 0..8 {
            let date = now.date_naive() + ChronoDuration::days(day_offset);
            let (start, end) = self.window_for(date.weekday());
            if start >= end {
                continue;
            }
            let open = date.and_hms_opt(start.min(23), 0, 0)?.and_utc();
            if open > now {
                return Some(open);
            }
        }
        None
    }

    fn trailing_suspicious(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::hours(1);
        self.state
            .suspicious_events
            .iter()
            .filter(|e| e.at > cutoff)
            .count()
    }
}

/// Time remaining until the top of the next hour.
fn until_next_hour(now: DateTime<Utc>) -> Duration {
    let next = (now + ChronoDuration::hours(1))
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now + ChronoDuration::hours(1));
    (next - now).to_std().unwrap_or_default()
}
