//! Candle-smoothed allocation.
//!
//! One target rate comes from the smoothed candle series; the spread ladder
//! then steps up from it by a configured fraction per offer.

use common::config::StrategyConfig;
use common::{Candle, LoanOfferDraft};
use tracing::info;

use crate::ladder::{cap_amount, split_funds, PeriodTiers};
use crate::rates::percentage_to_decimal;
use crate::smoothing::smooth;

/// `max(min_rate, smoothed * (1 + spread_percent / 100))`
pub fn target_rate(smoothed: f64, spread_percent: f64, min_rate: f64) -> f64 {
    let target = smoothed * (1.0 + percentage_to_decimal(spread_percent));
    target.max(min_rate)
}

/// Smoothed rate of `candles`, or the minimum daily rate when none arrived.
pub fn smoothed_rate(candles: &[Candle], cfg: &StrategyConfig) -> f64 {
    smooth(candles, cfg.kline.smooth_method, cfg.min_daily_rate())
}

/// Spread ladder around `target`.
pub fn allocate(
    pool: f64,
    target: f64,
    cfg: &StrategyConfig,
    tiers: &PeriodTiers,
) -> Vec<LoanOfferDraft> {
    let Some(plan) = split_funds(pool, cfg.spread_lend, cfg.min_loan) else {
        return Vec::new();
    };

    let min_rate = cfg.min_daily_rate();
    let step = cfg.smart.rate_range_increase_percent;
    let mut offers = Vec::with_capacity(plan.count);

    for i in 0..plan.count {
        let amount = cap_amount(plan.amount_each, cfg.max_loan);
        if amount < cfg.min_loan {
            break;
        }

        let rate = (target * (1.0 + i as f64 * step)).max(min_rate);
        offers.push(LoanOfferDraft::new(amount, rate, tiers.period_for(rate)));
    }

    info!(
        "Kline ladder: {} offer(s) from target {:.6} (+{:.0}% per step)",
        offers.len(),
        target,
        step * 100.0
    );
    offers
}
