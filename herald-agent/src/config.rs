use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use herald_engine::delay::DelayConfig;
use herald_engine::pacing::{default_bands, HourBand, HourlyLimits, PacingConfig};
use herald_engine::{SequenceStep, VerifyConfig};

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// Sleep when the queue is empty or the gate gives no retry hint.
    pub idle_backoff: Duration,
    /// Fixed backoff after a transient store failure.
    pub store_retry_backoff: Duration,
    /// History window fetched for the duplicate guard.
    pub history_limit: usize,
    /// Consecutive claims of one contact before the circuit breaker trips.
    pub stuck_claim_limit: u32,
    /// Clamp band for the randomized inter-contact wait.
    pub inter_contact_min: Duration,
    pub inter_contact_max: Duration,
    pub pacing: PacingConfig,
    pub verify: VerifyConfig,
    pub delay: DelayConfig,
    pub similarity_threshold: f64,
    pub sequence: Vec<SequenceStep>,
}

/// Raw TOML file structure for `~/.config/herald/config.toml`.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    agent: Option<AgentSection>,
    pacing: Option<PacingSection>,
    verify: Option<VerifySection>,
    dedup: Option<DedupSection>,
    #[serde(default, rename = "step")]
    steps: Vec<StepSection>,
}

#[derive(Debug, Deserialize, Default)]
struct AgentSection {
    id: Option<String>,
    idle_backoff_secs: Option<u64>,
    store_retry_secs: Option<u64>,
    history_limit: Option<usize>,
    stuck_claim_limit: Option<u32>,
    inter_contact_min_secs: Option<u64>,
    inter_contact_max_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PacingSection {
    daily_cap_start: Option<u32>,
    daily_cap_increment: Option<u32>,
    daily_cap_target: Option<u32>,
    weekday_window: Option<[u32; 2]>,
    weekend_window: Option<[u32; 2]>,
    peak_hours: Option<Vec<u32>>,
    low_hours: Option<Vec<u32>>,
    hourly_limit_peak: Option<u32>,
    hourly_limit_normal: Option<u32>,
    hourly_limit_low: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct VerifySection {
    probe_texts: Option<Vec<String>>,
    deadline_secs: Option<u64>,
    ack_poll_secs: Option<[u64; 2]>,
    ack_retry_secs: Option<[u64; 2]>,
    inter_probe_secs: Option<[u64; 2]>,
    history_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupSection {
    similarity_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StepSection {
    variants: Vec<String>,
    #[serde(default)]
    fingerprints: Vec<String>,
    #[serde(default)]
    price_bearing: bool,
}

/// Values read from `HERALD_*` environment variables, captured once so
/// the merge logic stays testable without process-global env mutation.
/// Unparseable values are ignored, like the file-less defaults.
#[derive(Debug, Default)]
struct EnvOverrides {
    agent_id: Option<String>,
    idle_backoff_secs: Option<u64>,
    store_retry_secs: Option<u64>,
    daily_cap_start: Option<u32>,
    daily_cap_increment: Option<u32>,
    daily_cap_target: Option<u32>,
    weekday_window: Option<[u32; 2]>,
    weekend_window: Option<[u32; 2]>,
    similarity_threshold: Option<f64>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            agent_id: env_var("HERALD_AGENT_ID"),
            idle_backoff_secs: env_parse("HERALD_IDLE_BACKOFF_SECS"),
            store_retry_secs: env_parse("HERALD_STORE_RETRY_SECS"),
            daily_cap_start: env_parse("HERALD_DAILY_CAP_START"),
            daily_cap_increment: env_parse("HERALD_DAILY_CAP_INCREMENT"),
            daily_cap_target: env_parse("HERALD_DAILY_CAP_TARGET"),
            weekday_window: env_window("HERALD_WEEKDAY_WINDOW"),
            weekend_window: env_window("HERALD_WEEKEND_WINDOW"),
            similarity_threshold: env_parse("HERALD_SIMILARITY_THRESHOLD"),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

/// Windows are given as "start,end", e.g. `HERALD_WEEKDAY_WINDOW=8,22`.
fn env_window(name: &str) -> Option<[u32; 2]> {
    let raw = env_var(name)?;
    let (start, end) = raw.split_once(',')?;
    Some([start.trim().parse().ok()?, end.trim().parse().ok()?])
}

/// Default config file location.
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .expect("could not determine config directory")
        .join("herald")
        .join("config.toml")
}

impl AgentConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Priority: `HERALD_*` env vars override file values (agent id,
    /// backoffs, daily caps, windows, similarity threshold); a missing
    /// agent id falls back to a generated one.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let path = config_path.cloned().unwrap_or_else(default_config_path);

        let file_config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<ConfigFile>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        } else {
            ConfigFile::default()
        };

        Self::from_file_and_env(file_config, EnvOverrides::from_env())
    }

    /// Build config from parsed file values merged with env overrides
    /// (env wins; validation runs on the merged result).
    fn from_file_and_env(file: ConfigFile, env: EnvOverrides) -> Result<Self> {
        let mut agent = file.agent.unwrap_or_default();
        agent.idle_backoff_secs = env.idle_backoff_secs.or(agent.idle_backoff_secs);
        agent.store_retry_secs = env.store_retry_secs.or(agent.store_retry_secs);
        let agent_id = env
            .agent_id
            .or(agent.id.take())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generated_agent_id);

        let mut pacing_section = file.pacing.unwrap_or_default();
        pacing_section.daily_cap_start = env.daily_cap_start.or(pacing_section.daily_cap_start);
        pacing_section.daily_cap_increment = env
            .daily_cap_increment
            .or(pacing_section.daily_cap_increment);
        pacing_section.daily_cap_target = env.daily_cap_target.or(pacing_section.daily_cap_target);
        pacing_section.weekday_window = env.weekday_window.or(pacing_section.weekday_window);
        pacing_section.weekend_window = env.weekend_window.or(pacing_section.weekend_window);

        let pacing = resolve_pacing(pacing_section)?;
        let verify = resolve_verify(file.verify.unwrap_or_default())?;
        let similarity_threshold = env
            .similarity_threshold
            .or(file.dedup.unwrap_or_default().similarity_threshold)
            .unwrap_or(0.85);
        if !(0.0..=1.0).contains(&similarity_threshold) || similarity_threshold == 0.0 {
            bail!(
                "dedup.similarity_threshold must be in (0, 1], got {}",
                similarity_threshold
            );
        }

        let sequence = resolve_sequence(file.steps)?;

        let inter_contact_min = Duration::from_secs(agent.inter_contact_min_secs.unwrap_or(120));
        let inter_contact_max = Duration::from_secs(agent.inter_contact_max_secs.unwrap_or(900));
        if inter_contact_min > inter_contact_max {
            bail!("agent.inter_contact_min_secs exceeds inter_contact_max_secs");
        }

        Ok(Self {
            agent_id,
            idle_backoff: Duration::from_secs(agent.idle_backoff_secs.unwrap_or(30)),
            store_retry_backoff: Duration::from_secs(agent.store_retry_secs.unwrap_or(60)),
            history_limit: agent.history_limit.unwrap_or(30),
            stuck_claim_limit: agent.stuck_claim_limit.unwrap_or(3),
            inter_contact_min,
            inter_contact_max,
            pacing,
            verify,
            delay: DelayConfig::default(),
            similarity_threshold,
            sequence,
        })
    }
}

fn generated_agent_id() -> String {
    format!("agent-{}", &uuid::Uuid::new_v4().to_string()[..8])
}

fn resolve_pacing(section: PacingSection) -> Result<PacingConfig> {
    let defaults = PacingConfig::default();
    let weekday_window = window(section.weekday_window, defaults.weekday_window, "weekday")?;
    let weekend_window = window(section.weekend_window, defaults.weekend_window, "weekend")?;

    let daily_cap_start = section.daily_cap_start.unwrap_or(defaults.daily_cap_start);
    let daily_cap_target = section
        .daily_cap_target
        .unwrap_or(defaults.daily_cap_target);
    if daily_cap_start == 0 {
        bail!("pacing.daily_cap_start must be at least 1");
    }
    if daily_cap_target < daily_cap_start {
        bail!(
            "pacing.daily_cap_target ({}) is below daily_cap_start ({})",
            daily_cap_target,
            daily_cap_start
        );
    }

    let band_by_hour = match (&section.peak_hours, &section.low_hours) {
        (None, None) => default_bands(),
        (peak, low) => {
            let mut bands = [HourBand::Normal; 24];
            for &hour in low.iter().flatten() {
                if hour >= 24 {
                    bail!("pacing.low_hours contains invalid hour {}", hour);
                }
                bands[hour as usize] = HourBand::Low;
            }
            for &hour in peak.iter().flatten() {
                if hour >= 24 {
                    bail!("pacing.peak_hours contains invalid hour {}", hour);
                }
                bands[hour as usize] = HourBand::Peak;
            }
            bands
        }
    };

    Ok(PacingConfig {
        daily_cap_start,
        daily_cap_increment: section
            .daily_cap_increment
            .unwrap_or(defaults.daily_cap_increment),
        daily_cap_target,
        weekday_window,
        weekend_window,
        band_by_hour,
        hourly_limits: HourlyLimits {
            peak: section
                .hourly_limit_peak
                .unwrap_or(defaults.hourly_limits.peak),
            normal: section
                .hourly_limit_normal
                .unwrap_or(defaults.hourly_limits.normal),
            low: section
                .hourly_limit_low
                .unwrap_or(defaults.hourly_limits.low),
        },
        suspicious_gate_threshold: defaults.suspicious_gate_threshold,
        suspicious_pause_threshold: defaults.suspicious_pause_threshold,
    })
}

fn window(value: Option<[u32; 2]>, default: (u32, u32), which: &str) -> Result<(u32, u32)> {
    let (start, end) = value.map(|[s, e]| (s, e)).unwrap_or(default);
    if start >= end || end > 24 {
        bail!(
            "pacing.{}_window must satisfy start < end <= 24, got [{}, {})",
            which,
            start,
            end
        );
    }
    Ok((start, end))
}

fn resolve_verify(section: VerifySection) -> Result<VerifyConfig> {
    let defaults = VerifyConfig::default();
    let probe_texts = section.probe_texts.unwrap_or(defaults.probe_texts);
    if probe_texts.len() < 2 || probe_texts.iter().any(|t| t.trim().is_empty()) {
        bail!("verify.probe_texts requires two non-empty probe messages");
    }

    let pair = |value: Option<[u64; 2]>, default: (u64, u64), name: &str| -> Result<(u64, u64)> {
        let (min, max) = value.map(|[a, b]| (a, b)).unwrap_or(default);
        if min > max {
            bail!("verify.{} range is inverted: [{}, {}]", name, min, max);
        }
        Ok((min, max))
    };

    Ok(VerifyConfig {
        probe_texts,
        session_deadline: Duration::from_secs(section.deadline_secs.unwrap_or(300)),
        ack_poll_secs: pair(section.ack_poll_secs, defaults.ack_poll_secs, "ack_poll_secs")?,
        ack_retry_secs: pair(
            section.ack_retry_secs,
            defaults.ack_retry_secs,
            "ack_retry_secs",
        )?,
        inter_probe_secs: pair(
            section.inter_probe_secs,
            defaults.inter_probe_secs,
            "inter_probe_secs",
        )?,
        history_limit: section.history_limit.unwrap_or(defaults.history_limit),
    })
}

fn resolve_sequence(steps: Vec<StepSection>) -> Result<Vec<SequenceStep>> {
    if steps.is_empty() {
        bail!("at least one [[step]] is required in the config");
    }
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            if step.variants.is_empty() || step.variants.iter().any(|v| v.trim().is_empty()) {
                bail!("step {} requires at least one non-empty variant", i);
            }
            if step.price_bearing && step.fingerprints.is_empty() {
                bail!(
                    "step {} is price_bearing and needs a fingerprint (e.g. the price token)",
                    i
                );
            }
            Ok(SequenceStep {
                variants: step.variants,
                fingerprints: step.fingerprints,
                price_bearing: step.price_bearing,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[step]]
variants = ["Hi! I came across your listing."]

[[step]]
variants = ["We offer onboarding for $499."]
fingerprints = ["$499"]
price_bearing = true
"#;

    fn parse(toml_str: &str) -> ConfigFile {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = AgentConfig::from_file_and_env(parse(MINIMAL), EnvOverrides::default()).unwrap();
        assert!(config.agent_id.starts_with("agent-"));
        assert_eq!(config.store_retry_backoff, Duration::from_secs(60));
        assert_eq!(config.pacing.daily_cap_start, 20);
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.sequence.len(), 2);
        assert!(config.sequence[1].price_bearing);
    }

    #[test]
    fn override_beats_file_agent_id() {
        let toml_str = format!("[agent]\nid = \"file-agent\"\n{MINIMAL}");
        let config = AgentConfig::from_file_and_env(
            parse(&toml_str),
            EnvOverrides {
                agent_id: Some("env-agent".to_string()),
                ..EnvOverrides::default()
            },
        ).unwrap();
        assert_eq!(config.agent_id, "env-agent");

        let config = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap();
        assert_eq!(config.agent_id, "file-agent");
    }

    #[test]
    fn env_caps_and_backoffs_beat_file_values() {
        let toml_str = format!(
            "[agent]\nstore_retry_secs = 15\n\
             [pacing]\ndaily_cap_start = 10\ndaily_cap_increment = 2\ndaily_cap_target = 50\n\
             {MINIMAL}"
        );
        let config = AgentConfig::from_file_and_env(
            parse(&toml_str),
            EnvOverrides {
                store_retry_secs: Some(5),
                daily_cap_start: Some(25),
                daily_cap_target: Some(200),
                ..EnvOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.store_retry_backoff, Duration::from_secs(5));
        assert_eq!(config.pacing.daily_cap_start, 25);
        assert_eq!(config.pacing.daily_cap_target, 200);
        // Fields without an override keep the file value.
        assert_eq!(config.pacing.daily_cap_increment, 2);
    }

    #[test]
    fn env_windows_beat_file_windows() {
        let toml_str = format!(
            "[pacing]\nweekday_window = [9, 21]\nweekend_window = [10, 18]\n{MINIMAL}"
        );
        let config = AgentConfig::from_file_and_env(
            parse(&toml_str),
            EnvOverrides {
                weekday_window: Some([8, 22]),
                ..EnvOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.pacing.weekday_window, (8, 22));
        assert_eq!(config.pacing.weekend_window, (10, 18));
    }

    #[test]
    fn inverted_env_window_still_errors() {
        let toml_str = format!("[pacing]\nweekday_window = [9, 21]\n{MINIMAL}");
        let err = AgentConfig::from_file_and_env(
            parse(&toml_str),
            EnvOverrides {
                weekday_window: Some([22, 8]),
                ..EnvOverrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("weekday_window"));
    }

    #[test]
    fn env_similarity_threshold_beats_file() {
        let toml_str = format!("[dedup]\nsimilarity_threshold = 0.9\n{MINIMAL}");
        let config = AgentConfig::from_file_and_env(
            parse(&toml_str),
            EnvOverrides {
                similarity_threshold: Some(0.7),
                ..EnvOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.similarity_threshold, 0.7);
    }

    #[test]
    fn empty_sequence_errors() {
        let err = AgentConfig::from_file_and_env(ConfigFile::default(), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("[[step]]"));
    }

    #[test]
    fn price_step_without_fingerprint_errors() {
        let toml_str = r#"
[[step]]
variants = ["Pricing starts at $99."]
price_bearing = true
"#;
        let err = AgentConfig::from_file_and_env(parse(toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("fingerprint"));
    }

    #[test]
    fn inverted_window_errors() {
        let toml_str = format!("[pacing]\nweekday_window = [21, 9]\n{MINIMAL}");
        let err = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("weekday_window"));
    }

    #[test]
    fn target_below_start_errors() {
        let toml_str = format!(
            "[pacing]\ndaily_cap_start = 50\ndaily_cap_target = 20\n{MINIMAL}"
        );
        let err = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("daily_cap_target"));
    }

    #[test]
    fn band_hours_are_applied() {
        let toml_str = format!(
            "[pacing]\npeak_hours = [19, 20]\nlow_hours = [6, 7]\n{MINIMAL}"
        );
        let config = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap();
        assert_eq!(config.pacing.band_by_hour[19], HourBand::Peak);
        assert_eq!(config.pacing.band_by_hour[6], HourBand::Low);
        assert_eq!(config.pacing.band_by_hour[12], HourBand::Normal);
    }

    #[test]
    fn invalid_band_hour_errors() {
        let toml_str = format!("[pacing]\npeak_hours = [25]\n{MINIMAL}");
        let err = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("invalid hour"));
    }

    #[test]
    fn single_probe_text_errors() {
        let toml_str = format!("[verify]\nprobe_texts = [\"hey\"]\n{MINIMAL}");
        let err = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("probe_texts"));
    }

    #[test]
    fn threshold_out_of_range_errors() {
        let toml_str = format!("[dedup]\nsimilarity_threshold = 1.5\n{MINIMAL}");
        let err = AgentConfig::from_file_and_env(parse(&toml_str), EnvOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn load_reads_a_config_file() {
        use std::fs;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            format!("[agent]\nid = \"agent-7\"\nstore_retry_secs = 15\n{MINIMAL}"),
        )
        .unwrap();

        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.agent_id, "agent-7");
        assert_eq!(config.store_retry_backoff, Duration::from_secs(15));
    }

    #[test]
    fn load_with_missing_file_errors_on_empty_sequence() {
        let path = PathBuf::from("/nonexistent/herald-config.toml");
        assert!(AgentConfig::load(Some(&path)).is_err());
    }
}
