//! Rate limits, the effective-rate resolver and the per-queue rate budget.
//!
//! A queue may carry several limits (e.g. `5/second` and `100/minute`). Only
//! the most restrictive one governs dispatch: the limit with the lowest
//! throughput density `frequency / period_ms`.

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Period a rate limit frequency is counted over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
    Day,
}

impl RatePeriod {
    pub const ALL: [RatePeriod; 4] = [
        RatePeriod::Second,
        RatePeriod::Minute,
        RatePeriod::Hour,
        RatePeriod::Day,
    ];

    /// Length of the period in milliseconds
    pub const fn as_millis(self) -> u64 {
        match self {
            RatePeriod::Second => 1_000,
            RatePeriod::Minute => 60_000,
            RatePeriod::Hour => 3_600_000,
            RatePeriod::Day => 86_400_000,
        }
    }

    /// Lowercase wire name (`second`, `minute`, `hour`, `day`)
    pub const fn as_str(self) -> &'static str {
        match self {
            RatePeriod::Second => "second",
            RatePeriod::Minute => "minute",
            RatePeriod::Hour => "hour",
            RatePeriod::Day => "day",
        }
    }
}

impl fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatePeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "second" => Ok(RatePeriod::Second),
            "minute" => Ok(RatePeriod::Minute),
            "hour" => Ok(RatePeriod::Hour),
            "day" => Ok(RatePeriod::Day),
            other => Err(DomainError::UnknownPeriod(other.to_string())),
        }
    }
}

impl TryFrom<String> for RatePeriod {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RatePeriod> for String {
    fn from(period: RatePeriod) -> Self {
        period.as_str().to_string()
    }
}

/// Serialized form exchanged at the API boundary: `{"frequency": 5, "rate": "second"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWire {
    pub frequency: u32,
    pub rate: String,
}

/// A single configured throughput constraint: at most `frequency` per `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RateLimitWire", into = "RateLimitWire")]
pub struct RateLimit {
    pub frequency: u32,
    pub period: RatePeriod,
}

impl RateLimit {
    pub fn new(frequency: u32, period: RatePeriod) -> Self {
        Self { frequency, period }
    }

    pub fn per_second(frequency: u32) -> Self {
        Self::new(frequency, RatePeriod::Second)
    }

    pub fn per_minute(frequency: u32) -> Self {
        Self::new(frequency, RatePeriod::Minute)
    }

    pub fn to_wire(&self) -> RateLimitWire {
        RateLimitWire {
            frequency: self.frequency,
            rate: self.period.as_str().to_string(),
        }
    }

    /// Fails with `UnknownPeriod` instead of falling back to a default period
    pub fn from_wire(wire: &RateLimitWire) -> Result<Self> {
        Ok(Self {
            frequency: wire.frequency,
            period: wire.rate.parse()?,
        })
    }

    /// True when `self` allows strictly fewer dispatches per millisecond than `other`.
    ///
    /// Compares `f1/p1 < f2/p2` as `f1*p2 < f2*p1` so no precision is lost.
    fn is_stricter_than(&self, other: &RateLimit) -> bool {
        let lhs = self.frequency as u128 * other.period.as_millis() as u128;
        let rhs = other.frequency as u128 * self.period.as_millis() as u128;
        lhs < rhs
    }
}

impl TryFrom<RateLimitWire> for RateLimit {
    type Error = DomainError;

    fn try_from(wire: RateLimitWire) -> Result<Self> {
        RateLimit::from_wire(&wire)
    }
}

impl From<RateLimit> for RateLimitWire {
    fn from(limit: RateLimit) -> Self {
        limit.to_wire()
    }
}

/// The single governing ceiling: at most `frequency` dispatches per `period_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveRate {
    pub frequency: u32,
    pub period_ms: u64,
}

/// Resolve the most restrictive limit.
///
/// Ties on density keep the first-listed limit. The result carries the
/// winning limit's own `frequency` and period, not its density.
pub fn resolve(limits: &[RateLimit]) -> Result<EffectiveRate> {
    let mut iter = limits.iter();
    let mut governing = iter.next().ok_or_else(|| {
        DomainError::InvalidConfig("at least one rate limit is required".to_string())
    })?;

    for limit in iter {
        if limit.is_stricter_than(governing) {
            governing = limit;
        }
    }

    Ok(EffectiveRate {
        frequency: governing.frequency,
        period_ms: governing.period.as_millis(),
    })
}

/// Token bucket holding at most `frequency` tokens.
///
/// Every spent token comes back exactly `period_ms` after it was spent, so any
/// window of `period_ms` contains at most `frequency` dispatches and idle time
/// never builds up a burst larger than `frequency`.
#[derive(Debug, Clone)]
pub struct RateBudget {
    rate: EffectiveRate,
    // (spent_at epoch ms, tokens spent at that instant), oldest first
    spent: VecDeque<(i64, u32)>,
    spent_total: u64,
}

impl RateBudget {
    pub fn new(rate: EffectiveRate) -> Self {
        Self {
            rate,
            spent: VecDeque::new(),
            spent_total: 0,
        }
    }

    pub fn rate(&self) -> EffectiveRate {
        self.rate
    }

    /// Swap the governing rate. Tokens already spent stay spent until their
    /// own refill time, so tightening a limit takes effect immediately.
    pub fn set_rate(&mut self, rate: EffectiveRate) {
        self.rate = rate;
    }

    /// Tokens that may be spent at `now`
    pub fn available(&mut self, now: i64) -> u32 {
        self.replenish(now);
        (self.rate.frequency as u64).saturating_sub(self.spent_total) as u32
    }

    /// Spend `tokens` at `now`. Callers must not exceed `available(now)`.
    pub fn consume(&mut self, now: i64, tokens: u32) {
        if tokens == 0 {
            return;
        }
        match self.spent.back_mut() {
            Some((at, count)) if *at == now => *count += tokens,
            _ => self.spent.push_back((now, tokens)),
        }
        self.spent_total += tokens as u64;
    }

    /// Instant at which the oldest spent token comes back, if any are out
    pub fn next_refill_at(&self) -> Option<i64> {
        self.spent
            .front()
            .map(|(at, _)| at + self.rate.period_ms as i64)
    }

    fn replenish(&mut self, now: i64) {
        let period = self.rate.period_ms as i64;
        while let Some(&(at, count)) = self.spent.front() {
            if at + period > now {
                break;
            }
            self.spent.pop_front();
            self.spent_total -= count as u64;
        }
    }
}
