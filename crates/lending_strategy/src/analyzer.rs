//! Rolling market-condition analysis.
//!
//! The rate history is the only state the engine keeps between cycles. It
//! lives in a [`MarketAnalyzer`] that the caller constructs once and shares
//! (via `Arc`) with every engine invocation; a mutex serializes the
//! once-per-cycle append and read.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::FundingBookEntry;
use serde::Serialize;

/// Samples kept: 12 hours at one sample per 15-minute cycle.
pub const HISTORY_CAPACITY: usize = 48;

const MIN_SAMPLES_FOR_ANALYSIS: usize = 3;
const TREND_WINDOW: usize = 6;
const TREND_DELTA_THRESHOLD: f64 = 0.0001;
const TREND_MIN_MOVES: usize = 4;

const COMPETITION_LEVELS: usize = 10;
const COMPETITION_SPREAD_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateSnapshot {
    pub daily_rate: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Market state derived from the rate history, recomputed every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketCondition {
    pub trend: Trend,
    /// Population standard deviation of the recorded rates.
    pub volatility: f64,
    /// Book levels seen this cycle.
    pub liquidity_depth: usize,
    pub avg_rate: f64,
    /// Latest rate over the average (1.0 when the average is zero).
    pub rate_ratio: f64,
}

impl MarketCondition {
    /// Condition reported while the history is too short to analyze.
    pub fn neutral(liquidity_depth: usize) -> Self {
        Self {
            trend: Trend::Stable,
            volatility: 0.0,
            liquidity_depth,
            avg_rate: 0.0,
            rate_ratio: 1.0,
        }
    }
}

/// Bounded FIFO of rate samples.
#[derive(Debug, Clone)]
pub struct RateHistory {
    samples: VecDeque<RateSnapshot>,
    capacity: usize,
}

impl RateHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, snapshot: RateSnapshot) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateSnapshot> {
        self.samples.iter()
    }

    pub fn analyze(&self, book_len: usize) -> MarketCondition {
        if self.samples.len() < MIN_SAMPLES_FOR_ANALYSIS {
            return MarketCondition::neutral(book_len);
        }

        let n = self.samples.len() as f64;
        let avg_rate = self.samples.iter().map(|s| s.daily_rate).sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|s| (s.daily_rate - avg_rate).powi(2))
            .sum::<f64>()
            / n;

        let latest = self.samples.back().map(|s| s.daily_rate).unwrap_or(0.0);
        let rate_ratio = if avg_rate > 0.0 { latest / avg_rate } else { 1.0 };

        MarketCondition {
            trend: self.trend(),
            volatility: variance.sqrt(),
            liquidity_depth: book_len,
            avg_rate,
            rate_ratio,
        }
    }

    fn trend(&self) -> Trend {
        if self.samples.len() < TREND_WINDOW {
            return Trend::Stable;
        }

        let recent: Vec<f64> = self
            .samples
            .iter()
            .skip(self.samples.len() - TREND_WINDOW)
            .map(|s| s.daily_rate)
            .collect();

        let (mut up, mut down) = (0, 0);
        for pair in recent.windows(2) {
            let delta = pair[1] - pair[0];
            if delta > TREND_DELTA_THRESHOLD {
                up += 1;
            } else if delta < -TREND_DELTA_THRESHOLD {
                down += 1;
            }
        }

        if up >= TREND_MIN_MOVES {
            Trend::Rising
        } else if down >= TREND_MIN_MOVES {
            Trend::Falling
        } else {
            Trend::Stable
        }
    }
}

impl Default for RateHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

/// Owner of the process-wide rate history.
#[derive(Debug, Default)]
pub struct MarketAnalyzer {
    history: Mutex<RateHistory>,
}

impl MarketAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Mutex::new(RateHistory::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateHistory> {
        // A panic mid-push cannot leave the deque inconsistent.
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_sample(&self, daily_rate: f64, volume: f64) {
        self.lock().push(RateSnapshot {
            daily_rate,
            volume,
            timestamp: Utc::now(),
        });
    }

    pub fn analyze(&self, book_len: usize) -> MarketCondition {
        self.lock().analyze(book_len)
    }

    /// Append and analyze under one lock acquisition.
    pub fn record_and_analyze(&self, sample: Option<(f64, f64)>, book_len: usize) -> MarketCondition {
        let mut history = self.lock();
        if let Some((daily_rate, volume)) = sample {
            history.push(RateSnapshot {
                daily_rate,
                volume,
                timestamp: Utc::now(),
            });
        }
        history.analyze(book_len)
    }

    pub fn sample_count(&self) -> usize {
        self.lock().len()
    }

    /// Copy of the recorded samples, oldest first.
    pub fn samples(&self) -> Vec<RateSnapshot> {
        self.lock().iter().copied().collect()
    }
}

/// Suggested competitive rate from the first ten book levels.
///
/// Returns 0 when the book is shallower than ten levels or no level steps
/// up from the previous one.
pub fn competition_spread(book: &[FundingBookEntry]) -> f64 {
    if book.len() < COMPETITION_LEVELS {
        return 0.0;
    }

    let positive: Vec<f64> = book[..COMPETITION_LEVELS]
        .windows(2)
        .map(|pair| pair[1].daily_rate - pair[0].daily_rate)
        .filter(|delta| *delta > 0.0)
        .collect();

    if positive.is_empty() {
        return 0.0;
    }

    let avg_spread = positive.iter().sum::<f64>() / positive.len() as f64;
    book[0].daily_rate + avg_spread * COMPETITION_SPREAD_WEIGHT
}

/// Book depth range `(bottom, top)` to sample for a given fund size.
pub fn optimal_depth_range(
    funds_available: f64,
    condition: &MarketCondition,
    volatility_threshold: f64,
) -> (f64, f64) {
    let (mut bottom, mut top) = if funds_available > 1000.0 {
        (5.0, 3000.0)
    } else if funds_available > 500.0 {
        (8.0, 2000.0)
    } else {
        (10.0, 1000.0)
    };

    match condition.trend {
        Trend::Rising => {
            bottom *= 1.2;
            top *= 0.8;
        }
        Trend::Falling => {
            bottom *= 0.8;
            top *= 1.2;
        }
        Trend::Stable => {}
    }

    if condition.volatility > volatility_threshold {
        top *= 1.3;
    }

    (bottom, top)
}

/// Sum of |amount| over the first ten book levels.
pub fn book_volume(book: &[FundingBookEntry]) -> f64 {
    book.iter()
        .take(COMPETITION_LEVELS)
        .map(|e| e.amount.abs())
        .sum()
}
