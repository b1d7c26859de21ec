//! Adaptive (smart) allocation.
//!
//! Uses the rolling market condition to decide how much of the pool goes to
//! the high-hold reservation, what rate that reservation asks for, and how
//! the spread ladder is priced across the observed book range.

use std::sync::Arc;

use common::config::{SmartConfig, StrategyConfig};
use common::{FundingBookEntry, LoanOfferDraft};
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::{
    book_volume, competition_spread, optimal_depth_range, MarketAnalyzer, MarketCondition, Trend,
};
use crate::high_hold;
use crate::ladder::{cap_amount, split_funds, PeriodTier, PeriodTiers};

const BASE_HIGH_HOLD_RATIO: f64 = 0.5;
const RISING_HIGH_HOLD_RATIO: f64 = 0.3;
const FALLING_HIGH_HOLD_RATIO: f64 = 0.7;
const RATIO_STEP: f64 = 0.1;
const MIN_HIGH_HOLD_RATIO: f64 = 0.2;
const MAX_HIGH_HOLD_RATIO: f64 = 0.8;

const VOLATILE_SPLIT_FACTOR: f64 = 0.7;
const SYNTHETIC_STEP: f64 = 0.05;
const NARROW_RANGE: f64 = 0.01;
const WIDENED_RANGE: f64 = 1.05;
const FALLING_PREMIUM: f64 = 1.1;

/// Output of one smart cycle, with the diagnostics that drove it.
#[derive(Debug, Clone, Serialize)]
pub struct SmartAllocation {
    pub offers: Vec<LoanOfferDraft>,
    pub condition: MarketCondition,
    pub high_hold_ratio: f64,
    /// Suggested competitive rate from the top of the book (0 if unknown).
    pub competition_rate: f64,
    /// Book depth range suited to the spread leg's funds.
    pub depth_range: (f64, f64),
}

impl SmartAllocation {
    fn empty(condition: MarketCondition) -> Self {
        Self {
            offers: Vec::new(),
            condition,
            high_hold_ratio: BASE_HIGH_HOLD_RATIO,
            competition_rate: 0.0,
            depth_range: (0.0, 0.0),
        }
    }
}

pub struct SmartStrategy {
    analyzer: Arc<MarketAnalyzer>,
}

impl SmartStrategy {
    pub fn new(analyzer: Arc<MarketAnalyzer>) -> Self {
        Self { analyzer }
    }

    pub fn allocate(
        &self,
        pool: f64,
        book: &[FundingBookEntry],
        cfg: &StrategyConfig,
        tiers: &PeriodTiers,
    ) -> SmartAllocation {
        if pool < cfg.min_loan {
            return SmartAllocation::empty(MarketCondition::neutral(book.len()));
        }

        let sample = book.first().map(|best| (best.daily_rate, book_volume(book)));
        let condition = self.analyzer.record_and_analyze(sample, book.len());
        let smart = &cfg.smart;

        let high_hold_ratio = allocation_ratio(&condition, smart);
        info!(
            "Smart: trend={} volatility={:.6} rate_ratio={:.2} high_hold_ratio={:.0}%",
            condition.trend,
            condition.volatility,
            condition.rate_ratio,
            high_hold_ratio * 100.0
        );

        let mut remaining = pool;
        let mut offers = Vec::new();

        if high_hold::is_enabled(cfg) && pool * high_hold_ratio >= cfg.high_hold_amount {
            let rate = dynamic_high_hold_rate(
                cfg.high_hold_rate_decimal(),
                book.first().map(|e| e.daily_rate),
                &condition,
                smart,
            );
            let period = smart_period(rate, &condition, tiers, smart.volatility_threshold);
            let reserved = high_hold::allocate(&mut remaining, cfg, rate, period);
            debug!(
                "Smart high-hold: {} offer(s) at {:.6} for {}d",
                reserved.len(),
                rate,
                period
            );
            offers.extend(reserved);
        }

        let depth_range = optimal_depth_range(remaining, &condition, smart.volatility_threshold);
        let competition_rate = competition_spread(book);
        debug!(
            "Smart spread: depth range {:.0}-{:.0}, competitive rate {:.6}",
            depth_range.0, depth_range.1, competition_rate
        );

        if remaining >= cfg.min_loan {
            offers.extend(spread_offers(remaining, book, &condition, cfg, tiers));
        }

        SmartAllocation {
            offers,
            condition,
            high_hold_ratio,
            competition_rate,
            depth_range,
        }
    }
}

/// Share of the pool the high-hold leg may claim, in `[0.2, 0.8]`.
pub fn allocation_ratio(condition: &MarketCondition, smart: &SmartConfig) -> f64 {
    let mut ratio = match condition.trend {
        Trend::Rising => RISING_HIGH_HOLD_RATIO,
        Trend::Falling => FALLING_HIGH_HOLD_RATIO,
        Trend::Stable => BASE_HIGH_HOLD_RATIO,
    };

    if condition.volatility > smart.volatility_threshold {
        ratio += RATIO_STEP;
    }
    if condition.rate_ratio > 1.2 {
        ratio += RATIO_STEP;
    } else if condition.rate_ratio < 0.8 {
        ratio -= RATIO_STEP;
    }

    ratio.clamp(MIN_HIGH_HOLD_RATIO, MAX_HIGH_HOLD_RATIO)
}

/// High-hold rate adjusted to the market around the configured base.
///
/// `best_rate` is the top of the book; without one the base rate is used
/// unchanged.
pub fn dynamic_high_hold_rate(
    base: f64,
    best_rate: Option<f64>,
    condition: &MarketCondition,
    smart: &SmartConfig,
) -> f64 {
    let Some(best) = best_rate else {
        return base;
    };
    let floor = base * smart.min_rate_multiplier;
    let ceiling = base * smart.max_rate_multiplier;

    match condition.trend {
        Trend::Rising => (best * 0.85).min(ceiling).max(floor),
        Trend::Falling => floor.max(base),
        Trend::Stable if best > base * 1.5 => (best * 0.8).min(ceiling).max(floor),
        Trend::Stable => floor.max(base),
    }
}

/// Rate of offer `index` out of `total` on a ladder spanning the book rates
/// at or above `min_rate`.
pub fn progressive_rate(
    book: &[FundingBookEntry],
    min_rate: f64,
    index: usize,
    total: usize,
) -> f64 {
    let qualifying = book
        .iter()
        .map(|e| e.daily_rate)
        .filter(|rate| *rate >= min_rate);

    let bounds = qualifying.fold(None, |acc: Option<(f64, f64)>, rate| match acc {
        None => Some((rate, rate)),
        Some((lo, hi)) => Some((lo.min(rate), hi.max(rate))),
    });

    let Some((lo, mut hi)) = bounds else {
        return min_rate + SYNTHETIC_STEP * min_rate * index as f64;
    };

    if total <= 1 {
        return lo;
    }
    if hi - lo < lo * NARROW_RANGE {
        hi = lo * WIDENED_RANGE;
    }

    let step = (hi - lo) / (total - 1) as f64;
    lo + step * index as f64
}

/// Base tiering, shortened when rates are climbing or volatile. On a falling
/// market a rate well above the recent average locks in the mid period.
pub fn smart_period(
    daily_rate: f64,
    condition: &MarketCondition,
    tiers: &PeriodTiers,
    volatility_threshold: f64,
) -> u32 {
    let mut tier = tiers.tier_for(daily_rate);

    match condition.trend {
        Trend::Rising => tier = tier.demote(),
        Trend::Falling
            if tier == PeriodTier::Short && daily_rate > condition.avg_rate * FALLING_PREMIUM =>
        {
            tier = PeriodTier::Mid
        }
        _ => {}
    }
    if condition.volatility > volatility_threshold * 1.5 && tier > PeriodTier::Mid {
        tier = PeriodTier::Mid;
    }

    tiers.days(tier)
}

fn spread_offers(
    pool: f64,
    book: &[FundingBookEntry],
    condition: &MarketCondition,
    cfg: &StrategyConfig,
    tiers: &PeriodTiers,
) -> Vec<LoanOfferDraft> {
    let threshold = cfg.smart.volatility_threshold;
    let mut requested = cfg.spread_lend;
    if condition.volatility > threshold {
        requested = (requested as f64 * VOLATILE_SPLIT_FACTOR).floor() as i64;
    }

    let Some(plan) = split_funds(pool, requested, cfg.min_loan) else {
        return Vec::new();
    };

    let min_rate = cfg.min_daily_rate();
    let mut offers = Vec::with_capacity(plan.count);
    for index in 0..plan.count {
        let amount = cap_amount(plan.amount_each, cfg.max_loan);
        if amount < cfg.min_loan {
            break;
        }

        let rate = progressive_rate(book, min_rate, index, plan.count);
        let period = smart_period(rate, condition, tiers, threshold);
        offers.push(LoanOfferDraft::new(amount, rate, period));
    }
    offers
}
