//! Admission control
//!
//! Fixed window, sliding window and token bucket, chosen per tier. State is
//! kept per caller in a [`DashMap`]; a check mutates its caller's entry while
//! holding the shard lock, so concurrent checks for one caller are serialized
//! and different callers proceed in parallel.
//!
//! A caller's state is shared by every tier it is checked under. Every
//! admitted request lands in one history and draws from one bucket, so
//! switching between keys of different tiers never opens a fresh budget.

use crate::tier::{AdmissionStrategy, Tier, TierConfig, TierTable};
use dashmap::DashMap;
use repgate_common::{AtomicCounter, SharedClock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 3600.0;

/// Why a request was not admitted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MinuteLimit,
    HourLimit,
    BucketEmpty,
    WindowExhausted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MinuteLimit => "Per-minute limit exceeded",
            Self::HourLimit => "Per-hour limit exceeded",
            Self::BucketEmpty => "Token bucket empty",
            Self::WindowExhausted => "Fixed window limit exceeded",
        })
    }
}

/// Outcome of an admission check
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub tier: Tier,
    /// `None` for the unlimited tier
    pub strategy: Option<AdmissionStrategy>,
    /// Limit the remaining count refers to
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Sliding window only
    pub remaining_minute: Option<u32>,
    /// Sliding window only
    pub remaining_hour: Option<u32>,
    /// Seconds until the budget is restored
    pub reset_after_secs: Option<u64>,
    /// Seconds to wait before retrying; set on rejection
    pub retry_after_secs: Option<u64>,
    pub reason: Option<RejectReason>,
}

impl AdmissionDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            tier: Tier::Unlimited,
            strategy: None,
            limit: None,
            remaining: None,
            remaining_minute: None,
            remaining_hour: None,
            reset_after_secs: None,
            retry_after_secs: None,
            reason: None,
        }
    }

    fn allow(tier: Tier, strategy: AdmissionStrategy, limit: u32, remaining: u32, reset_after: u64) -> Self {
        Self {
            allowed: true,
            tier,
            strategy: Some(strategy),
            limit: Some(limit),
            remaining: Some(remaining),
            remaining_minute: None,
            remaining_hour: None,
            reset_after_secs: Some(reset_after),
            retry_after_secs: None,
            reason: None,
        }
    }

    fn reject(tier: Tier, strategy: AdmissionStrategy, limit: u32, retry_after: u64, reason: RejectReason) -> Self {
        Self {
            allowed: false,
            tier,
            strategy: Some(strategy),
            limit: Some(limit),
            remaining: Some(0),
            remaining_minute: None,
            remaining_hour: None,
            reset_after_secs: Some(retry_after),
            retry_after_secs: Some(retry_after),
            reason: Some(reason),
        }
    }

    /// Rate limit headers for the response
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(4);

        if let Some(limit) = self.limit {
            headers.push(("X-RateLimit-Limit".to_string(), limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push(("X-RateLimit-Remaining".to_string(), remaining.to_string()));
        }
        if let Some(reset) = self.reset_after_secs {
            headers.push(("X-RateLimit-Reset".to_string(), reset.to_string()));
        }
        if let Some(retry) = self.retry_after_secs {
            headers.push(("Retry-After".to_string(), retry.to_string()));
        }

        headers
    }
}

/// Token bucket of a caller, refilled at the rate of the tier that last used it
#[derive(Debug)]
struct Bucket {
    tier: Tier,
    tokens: f64,
    last_refill: f64,
}

impl Bucket {
    fn refill(&mut self, config: &TierConfig, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        self.tokens = (self.tokens + elapsed * config.refill_rate()).min(f64::from(config.burst_capacity));
        self.last_refill = self.last_refill.max(now);
    }
}

/// Per-caller mutable state
#[derive(Debug, Default)]
struct CallerState {
    last_seen: f64,
    /// Admitted request timestamps within the last hour, oldest first
    history: VecDeque<f64>,
    bucket: Option<Bucket>,
}

impl CallerState {
    fn prune(&mut self, now: f64) {
        let hour_ago = now - HOUR;
        while self.history.front().is_some_and(|&ts| ts <= hour_ago) {
            self.history.pop_front();
        }
    }

    fn record(&mut self, now: f64) {
        // keep the deque ordered even if the clock steps back
        let ts = self.history.back().map_or(now, |&last| now.max(last));
        self.history.push_back(ts);
    }

    /// True when dropping the state would not change any future decision
    fn is_reclaimable(&self, tiers: &TierTable, now: f64) -> bool {
        let history_expired = self.history.back().map_or(true, |&last| last <= now - HOUR);
        let bucket_full = match &self.bucket {
            None => true,
            Some(bucket) => tiers.get(bucket.tier).map_or(true, |config| {
                bucket.tokens + (now - bucket.last_refill) * config.refill_rate()
                    >= f64::from(config.burst_capacity)
            }),
        };
        history_expired && bucket_full
    }
}

#[inline]
fn window_id(now: f64) -> i64 {
    (now / HOUR).floor() as i64
}

/// Whole seconds until `secs` has elapsed, at least one
#[inline]
fn ceil_secs(secs: f64) -> u64 {
    secs.ceil().max(1.0) as u64
}

#[derive(Debug, Default)]
struct TierCounters {
    allowed: AtomicCounter,
    rejected: AtomicCounter,
}

/// Admission counters per tier
#[derive(Debug, Default)]
pub struct AdmissionStats {
    tiers: [TierCounters; 5],
}

impl AdmissionStats {
    fn record(&self, tier: Tier, allowed: bool) {
        let counters = &self.tiers[tier.index()];
        if allowed {
            counters.allowed.inc();
        } else {
            counters.rejected.inc();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TierCountersSnapshot {
    pub allowed: u64,
    pub rejected: u64,
}

/// Point-in-time view of [`AdmissionStats`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdmissionStatsSnapshot {
    pub tiers: BTreeMap<Tier, TierCountersSnapshot>,
    pub total_allowed: u64,
    pub total_rejected: u64,
    pub tracked_callers: usize,
}

/// Tiered rate limiter
pub struct AdmissionController {
    tiers: TierTable,
    states: DashMap<String, CallerState>,
    clock: SharedClock,
    stats: AdmissionStats,
}

impl AdmissionController {
    pub fn new(tiers: TierTable, clock: SharedClock) -> Self {
        if let Err(e) = tiers.validate() {
            tracing::warn!(error = %e, "admission running with an unvalidated tier table");
        }
        Self {
            tiers,
            states: DashMap::new(),
            clock,
            stats: AdmissionStats::default(),
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Decide whether `caller_id` may send one more request now.
    ///
    /// Never fails: a rejection is a decision with `allowed == false` and a
    /// retry hint.
    pub fn check(&self, caller_id: &str, tier: Tier) -> AdmissionDecision {
        if tier.is_unlimited() {
            self.stats.record(tier, true);
            return AdmissionDecision::unlimited();
        }

        let Some(config) = self.tiers.get(tier) else {
            // validated tables always cover limited tiers
            tracing::error!(tier = %tier, "no budget for tier, rejecting");
            self.stats.record(tier, false);
            return AdmissionDecision::reject(tier, AdmissionStrategy::FixedWindow, 0, 60, RejectReason::WindowExhausted);
        };

        let now = self.clock.now();
        let decision = match self.states.get_mut(caller_id) {
            Some(mut state) => self.apply(&mut state, tier, config, now),
            None => {
                let mut state = self
                    .states
                    .entry(caller_id.to_string())
                    .or_insert_with(CallerState::default);
                self.apply(&mut state, tier, config, now)
            }
        };

        self.stats.record(tier, decision.allowed);
        if decision.allowed {
            tracing::trace!(caller = %caller_id, tier = %tier, remaining = ?decision.remaining, "admitted");
        } else {
            tracing::debug!(
                caller = %caller_id,
                tier = %tier,
                reason = ?decision.reason,
                retry_after = ?decision.retry_after_secs,
                "rate limited"
            );
        }
        decision
    }

    fn apply(&self, state: &mut CallerState, tier: Tier, config: &TierConfig, now: f64) -> AdmissionDecision {
        state.last_seen = state.last_seen.max(now);
        state.prune(now);

        let decision = match config.strategy {
            AdmissionStrategy::SlidingWindow => Self::check_sliding_window(&state.history, tier, config, now),
            AdmissionStrategy::FixedWindow => Self::check_fixed_window(&state.history, tier, config, now),
            AdmissionStrategy::TokenBucket => self.check_token_bucket(state, tier, config, now),
        };

        if decision.allowed {
            if config.strategy != AdmissionStrategy::TokenBucket {
                self.debit_bucket(state, now);
            }
            state.record(now);
        }
        decision
    }

    fn check_sliding_window(
        stamps: &VecDeque<f64>,
        tier: Tier,
        config: &TierConfig,
        now: f64,
    ) -> AdmissionDecision {
        let minute_ago = now - MINUTE;
        let last_hour = stamps.len();
        let last_minute = stamps.iter().rev().take_while(|&&ts| ts > minute_ago).count();
        let per_minute = config.requests_per_minute as usize;
        let per_hour = config.requests_per_hour as usize;

        if last_minute >= per_minute {
            // oldest request still inside the minute; none when the cap is zero
            let oldest = stamps.get(last_hour - last_minute).copied().unwrap_or(now);
            return AdmissionDecision::reject(
                tier,
                AdmissionStrategy::SlidingWindow,
                config.requests_per_minute,
                ceil_secs(oldest + MINUTE - now),
                RejectReason::MinuteLimit,
            );
        }

        if last_hour >= per_hour {
            let oldest = stamps.front().copied().unwrap_or(now);
            return AdmissionDecision::reject(
                tier,
                AdmissionStrategy::SlidingWindow,
                config.requests_per_hour,
                ceil_secs(oldest + HOUR - now),
                RejectReason::HourLimit,
            );
        }

        let remaining_hour = (per_hour - last_hour - 1) as u32;
        let remaining_minute = (per_minute - last_minute - 1) as u32;
        let oldest = stamps.front().copied().unwrap_or(now);

        let mut decision = AdmissionDecision::allow(
            tier,
            AdmissionStrategy::SlidingWindow,
            config.requests_per_hour,
            remaining_hour,
            ceil_secs(oldest + HOUR - now),
        );
        decision.remaining_minute = Some(remaining_minute);
        decision.remaining_hour = Some(remaining_hour);
        decision
    }

    fn check_token_bucket(
        &self,
        state: &mut CallerState,
        tier: Tier,
        config: &TierConfig,
        now: f64,
    ) -> AdmissionDecision {
        let rate = config.refill_rate();
        let burst = f64::from(config.burst_capacity);

        let bucket = state.bucket.get_or_insert_with(|| Bucket {
            tier,
            tokens: burst,
            last_refill: now,
        });
        if bucket.tier != tier {
            // carry the balance over, capped at the new burst
            let previous = self.tiers.get(bucket.tier).unwrap_or(config);
            bucket.refill(previous, now);
            bucket.tier = tier;
            bucket.tokens = bucket.tokens.min(burst);
        }
        bucket.refill(config, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            AdmissionDecision::allow(
                tier,
                AdmissionStrategy::TokenBucket,
                config.burst_capacity,
                bucket.tokens.floor() as u32,
                ((burst - bucket.tokens) / rate).ceil() as u64,
            )
        } else {
            AdmissionDecision::reject(
                tier,
                AdmissionStrategy::TokenBucket,
                config.burst_capacity,
                ceil_secs((1.0 - bucket.tokens) / rate),
                RejectReason::BucketEmpty,
            )
        }
    }

    /// Charge a request admitted by a window strategy to the caller's bucket
    fn debit_bucket(&self, state: &mut CallerState, now: f64) {
        if let Some(bucket) = state.bucket.as_mut() {
            if let Some(config) = self.tiers.get(bucket.tier) {
                bucket.refill(config, now);
            }
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
        }
    }

    fn check_fixed_window(
        stamps: &VecDeque<f64>,
        tier: Tier,
        config: &TierConfig,
        now: f64,
    ) -> AdmissionDecision {
        let id = window_id(now);
        let window_start = id as f64 * HOUR;
        let count = stamps.iter().rev().take_while(|&&ts| ts >= window_start).count();

        let next_window = (id + 1) as f64 * HOUR;
        let reset_after = ceil_secs(next_window - now);
        let per_hour = config.requests_per_hour as usize;

        if count >= per_hour {
            return AdmissionDecision::reject(
                tier,
                AdmissionStrategy::FixedWindow,
                config.requests_per_hour,
                reset_after,
                RejectReason::WindowExhausted,
            );
        }

        AdmissionDecision::allow(
            tier,
            AdmissionStrategy::FixedWindow,
            config.requests_per_hour,
            (per_hour - count - 1) as u32,
            reset_after,
        )
    }

    /// Forget a caller's state
    pub fn reset(&self, caller_id: &str) -> bool {
        self.states.remove(caller_id).is_some()
    }

    /// Drop callers idle for at least `max_idle` whose state no longer
    /// affects any decision; returns how many were dropped
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let horizon = now - max_idle.as_secs_f64();
        let before = self.states.len();
        self.states.retain(|_, state| {
            state.last_seen > horizon || !state.is_reclaimable(&self.tiers, now)
        });
        before.saturating_sub(self.states.len())
    }

    /// Periodically purge idle callers on the tokio runtime
    pub fn spawn_reaper(self: Arc<Self>, every: Duration, max_idle: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let purged = self.purge_idle(max_idle);
                if purged > 0 {
                    tracing::debug!(purged, tracked = self.states.len(), "purged idle admission state");
                }
            }
        })
    }

    pub fn tracked_callers(&self) -> usize {
        self.states.len()
    }

    pub fn stats(&self) -> AdmissionStatsSnapshot {
        let mut tiers = BTreeMap::new();
        let mut total_allowed = 0;
        let mut total_rejected = 0;

        for tier in Tier::ALL {
            let counters = &self.stats.tiers[tier.index()];
            let snapshot = TierCountersSnapshot {
                allowed: counters.allowed.get(),
                rejected: counters.rejected.get(),
            };
            total_allowed += snapshot.allowed;
            total_rejected += snapshot.rejected;
            tiers.insert(tier, snapshot);
        }

        AdmissionStatsSnapshot {
            tiers,
            total_allowed,
            total_rejected,
            tracked_callers: self.states.len(),
        }
    }
}
