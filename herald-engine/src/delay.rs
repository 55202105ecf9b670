//! Human-like delay sampling.
//!
//! Randomized delays are a policy knob, not a correctness requirement, so
//! they live behind the `DelaySampler` trait and tests substitute a fixed
//! sampler. The production sampler draws from a clipped Gaussian whose
//! mean depends on the current hour band, with a hard floor so no delay
//! ever collapses to zero.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pacing::HourBand;

/// Seconds by hour band.
#[derive(Debug, Clone, Copy)]
pub struct BandSeconds {
    pub peak: u64,
    pub normal: u64,
    pub low: u64,
}

impl BandSeconds {
    fn for_band(self, band: HourBand) -> u64 {
        match band {
            HourBand::Peak => self.peak,
            HourBand::Normal => self.normal,
            HourBand::Low => self.low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DelayConfig {
    /// Mean delay between sequence steps to the same contact.
    pub inter_message_mean: BandSeconds,
    /// Mean delay between contacts.
    pub inter_contact_mean: BandSeconds,
    /// Stddev as a fraction of the mean.
    pub stddev_ratio: f64,
    /// No sampled delay goes below this.
    pub floor: Duration,
    /// Cool-off after a failed or terminal contact, uniform seconds.
    pub cool_off_secs: (u64, u64),
    /// Probability of an occasional long break between contacts.
    pub long_pause_probability: f64,
    /// Long break length, uniform seconds.
    pub long_pause_secs: (u64, u64),
    /// Additive jitter cap for the inter-contact wait, seconds.
    pub jitter_max_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            inter_message_mean: BandSeconds {
                peak: 25,
                normal: 35,
                low: 50,
            },
            inter_contact_mean: BandSeconds {
                peak: 240,
                normal: 300,
                low: 420,
            },
            stddev_ratio: 0.2,
            floor: Duration::from_secs(5),
            cool_off_secs: (10, 15),
            long_pause_probability: 0.05,
            long_pause_secs: (180, 480),
            jitter_max_secs: 20,
        }
    }
}

pub trait DelaySampler: Send + Sync {
    /// Delay between sequence steps to the same contact.
    fn inter_message(&self, band: HourBand) -> Duration;
    /// Base delay between contacts.
    fn inter_contact(&self, band: HourBand) -> Duration;
    /// Typing-simulation delay for a message of `text_len` characters.
    fn typing(&self, text_len: usize) -> Duration;
    /// Cool-off after a failed or terminal contact.
    fn cool_off(&self) -> Duration;
    /// Occasional long break; `None` most of the time.
    fn long_pause(&self) -> Option<Duration>;
    /// Additive jitter for the inter-contact wait.
    fn jitter(&self) -> Duration;
}

/// Production sampler: clipped Gaussian over the band mean.
pub struct HumanDelaySampler {
    config: DelayConfig,
    rng: Mutex<StdRng>,
}

impl HumanDelaySampler {
    pub fn new(config: DelayConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sampler for tests.
    pub fn with_seed(config: DelayConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// One Gaussian draw via Box-Muller, clipped at the configured floor.
    fn gaussian(&self, mean_secs: u64) -> Duration {
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        let mean = mean_secs as f64;
        let sampled = mean + z * mean * self.config.stddev_ratio;
        let floored = sampled.max(self.config.floor.as_secs_f64());
        Duration::from_secs_f64(floored)
    }

    fn uniform_secs(&self, (min, max): (u64, u64)) -> Duration {
        if max <= min {
            return Duration::from_secs(min);
        }
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        Duration::from_secs(rng.gen_range(min..=max))
    }
}

impl DelaySampler for HumanDelaySampler {
    fn inter_message(&self, band: HourBand) -> Duration {
        self.gaussian(self.config.inter_message_mean.for_band(band))
    }

    fn inter_contact(&self, band: HourBand) -> Duration {
        self.gaussian(self.config.inter_contact_mean.for_band(band))
    }

    fn typing(&self, text_len: usize) -> Duration {
        // Roughly 18 chars/second of "typing", capped so long steps do not
        // stall the loop.
        let base = (text_len as f64 / 18.0).clamp(1.2, 9.0);
        let jitter = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            rng.gen_range(0.0..0.8)
        };
        Duration::from_secs_f64(base + jitter)
    }

    fn cool_off(&self) -> Duration {
        self.uniform_secs(self.config.cool_off_secs)
    }

    fn long_pause(&self) -> Option<Duration> {
        let hit = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            rng.gen::<f64>() < self.config.long_pause_probability
        };
        hit.then(|| self.uniform_secs(self.config.long_pause_secs))
    }

    fn jitter(&self) -> Duration {
        self.uniform_secs((0, self.config.jitter_max_secs))
    }
}

/// Deterministic sampler for tests: every delay is `value`, never a long
/// pause.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelaySampler {
    pub value: Duration,
}

impl FixedDelaySampler {
    pub fn zero() -> Self {
        Self {
            value: Duration::ZERO,
        }
    }
}

impl DelaySampler for FixedDelaySampler {
    fn inter_message(&self, _band: HourBand) -> Duration {
        self.value
    }

    fn inter_contact(&self, _band: HourBand) -> Duration {
        self.value
    }

    fn typing(&self, _text_len: usize) -> Duration {
        self.value
    }

    fn cool_off(&self) -> Duration {
        self.value
    }

    fn long_pause(&self) -> Option<Duration> {
        None
    }

    fn jitter(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler() -> HumanDelaySampler {
        HumanDelaySampler::with_seed(DelayConfig::default(), 42)
    }

    #[test]
    fn gaussian_delays_never_go_below_floor() {
        let sampler = sampler();
        for _ in 0..2000 {
            assert!(sampler.inter_message(HourBand::Peak) >= Duration::from_secs(5));
            assert!(sampler.inter_contact(HourBand::Low) >= Duration::from_secs(5));
        }
    }

    #[test]
    fn gaussian_delays_cluster_around_band_mean() {
        let sampler = sampler();
        let n = 2000;
        let total: f64 = (0..n)
            .map(|_| sampler.inter_message(HourBand::Normal).as_secs_f64())
            .sum();
        let mean = total / n as f64;
        // Config mean is 35s with 20% stddev; the sample mean stays close.
        assert!((mean - 35.0).abs() < 3.0, "sample mean {mean}");
    }

    #[test]
    fn long_pause_rate_is_roughly_five_percent() {
        let sampler = sampler();
        let hits = (0..2000).filter(|_| sampler.long_pause().is_some()).count();
        assert!((40..=200).contains(&hits), "long pauses: {hits}");
    }

    #[test]
    fn long_pause_length_is_within_configured_band() {
        let sampler = sampler();
        for _ in 0..2000 {
            if let Some(pause) = sampler.long_pause() {
                assert!(pause >= Duration::from_secs(180));
                assert!(pause <= Duration::from_secs(480));
            }
        }
    }

    #[test]
    fn cool_off_is_within_configured_band() {
        let sampler = sampler();
        for _ in 0..100 {
            let d = sampler.cool_off();
            assert!(d >= Duration::from_secs(10));
            assert!(d <= Duration::from_secs(15));
        }
    }

    #[test]
    fn typing_grows_with_text_length() {
        let sampler = sampler();
        let short = sampler.typing(5);
        let long = sampler.typing(500);
        assert!(long > short);
        // Cap keeps very long steps bounded.
        assert!(long <= Duration::from_secs_f64(9.8));
    }

    #[test]
    fn fixed_sampler_is_deterministic() {
        let sampler = FixedDelaySampler::zero();
        assert_eq!(sampler.inter_message(HourBand::Peak), Duration::ZERO);
        assert_eq!(sampler.cool_off(), Duration::ZERO);
        assert!(sampler.long_pause().is_none());
    }
}
