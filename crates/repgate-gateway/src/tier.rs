//! Subscription tiers and their admission budgets

use repgate_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Subscription tier of a caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Professional,
    Enterprise,
    Unlimited,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Free,
        Tier::Basic,
        Tier::Professional,
        Tier::Enterprise,
        Tier::Unlimited,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
            Self::Unlimited => "unlimited",
        }
    }

    /// Unlimited tiers bypass admission control
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier name that matches no [`Tier`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "professional" => Ok(Self::Professional),
            "enterprise" => Ok(Self::Enterprise),
            "unlimited" => Ok(Self::Unlimited),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Admission algorithm used for a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStrategy {
    /// Hour-aligned counter that resets at each window boundary
    FixedWindow,
    /// Rolling minute and hour windows over request timestamps
    SlidingWindow,
    /// Continuously refilled bucket with a burst cap
    TokenBucket,
}

impl AdmissionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::SlidingWindow => "sliding_window",
            Self::TokenBucket => "token_bucket",
        }
    }
}

/// Budget of a single tier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub requests_per_hour: u32,
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    pub strategy: AdmissionStrategy,
}

impl TierConfig {
    pub const fn new(
        requests_per_hour: u32,
        requests_per_minute: u32,
        burst_capacity: u32,
        strategy: AdmissionStrategy,
    ) -> Self {
        Self {
            requests_per_hour,
            requests_per_minute,
            burst_capacity,
            strategy,
        }
    }

    /// Token-bucket refill rate in tokens per second
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_hour) / 3600.0
    }

    /// Check the limits are usable for the configured strategy
    pub fn validate(&self, tier: Tier) -> ConfigResult<()> {
        let invalid = |reason: &str| ConfigError::InvalidTier {
            tier: tier.to_string(),
            reason: reason.to_string(),
        };

        if self.requests_per_hour == 0 {
            return Err(invalid("requests_per_hour must be positive"));
        }

        match self.strategy {
            AdmissionStrategy::SlidingWindow => {
                if self.requests_per_minute == 0 {
                    return Err(invalid("requests_per_minute must be positive"));
                }
                if self.requests_per_minute > self.requests_per_hour {
                    tracing::warn!(
                        tier = %tier,
                        per_minute = self.requests_per_minute,
                        per_hour = self.requests_per_hour,
                        "per-minute limit can never be reached before the hourly one"
                    );
                }
            }
            AdmissionStrategy::TokenBucket => {
                if self.burst_capacity == 0 {
                    return Err(invalid("burst_capacity must be positive"));
                }
                if self.burst_capacity < self.requests_per_minute {
                    return Err(invalid(&format!(
                        "burst_capacity {} is below requests_per_minute {}",
                        self.burst_capacity, self.requests_per_minute
                    )));
                }
            }
            AdmissionStrategy::FixedWindow => {}
        }

        Ok(())
    }
}

/// Budget per tier; `unlimited` never has an entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable {
    tiers: HashMap<Tier, TierConfig>,
}

impl TierTable {
    pub fn new(tiers: HashMap<Tier, TierConfig>) -> Self {
        Self { tiers }
    }

    pub fn get(&self, tier: Tier) -> Option<&TierConfig> {
        self.tiers.get(&tier)
    }

    /// Replace one tier's budget
    pub fn with(mut self, tier: Tier, config: TierConfig) -> Self {
        self.tiers.insert(tier, config);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tier, &TierConfig)> {
        self.tiers.iter()
    }

    /// Every limited tier needs a valid budget
    pub fn validate(&self) -> ConfigResult<()> {
        for tier in Tier::ALL {
            if tier.is_unlimited() {
                if self.tiers.contains_key(&tier) {
                    tracing::warn!("ignoring budget configured for the unlimited tier");
                }
                continue;
            }
            match self.tiers.get(&tier) {
                Some(config) => config.validate(tier)?,
                None => {
                    return Err(ConfigError::InvalidTier {
                        tier: tier.to_string(),
                        reason: "no budget configured".into(),
                    })
                }
            }
        }
        Ok(())
    }
}

impl Default for TierTable {
    fn default() -> Self {
        use AdmissionStrategy::*;
        let tiers = HashMap::from([
            (Tier::Free, TierConfig::new(100, 10, 20, SlidingWindow)),
            (Tier::Basic, TierConfig::new(1_000, 100, 200, SlidingWindow)),
            (Tier::Professional, TierConfig::new(10_000, 500, 1_000, TokenBucket)),
            (Tier::Enterprise, TierConfig::new(100_000, 5_000, 10_000, TokenBucket)),
        ]);
        Self { tiers }
    }
}
