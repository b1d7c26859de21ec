//! Traditional spread ladder.
//!
//! Splits the pool into equal offers and walks deeper into the book as the
//! ladder climbs from `gap_bottom` towards `gap_top`. A deeper index is only
//! a proxy for a higher rate; the book is not sorted.

use common::config::StrategyConfig;
use common::{FundingBookEntry, LoanOfferDraft};
use tracing::debug;

use crate::ladder::{cap_amount, split_funds, PeriodTiers};

pub fn allocate(
    pool: f64,
    book: &[FundingBookEntry],
    cfg: &StrategyConfig,
    tiers: &PeriodTiers,
) -> Vec<LoanOfferDraft> {
    let Some(plan) = split_funds(pool, cfg.spread_lend, cfg.min_loan) else {
        return Vec::new();
    };

    let min_rate = cfg.min_daily_rate();
    let gap_climb = (cfg.gap_top - cfg.gap_bottom) / plan.count as f64;
    let mut next_lend = cfg.gap_bottom;
    let mut depth = 0usize;
    let mut offers = Vec::with_capacity(plan.count);

    for _ in 0..plan.count {
        if !book.is_empty() {
            while (depth as f64) < next_lend && depth + 1 < book.len() {
                depth += 1;
            }
        }

        let amount = cap_amount(plan.amount_each, cfg.max_loan);
        if amount < cfg.min_loan {
            break;
        }

        let rate = book
            .get(depth)
            .map(|level| level.daily_rate.max(min_rate))
            .unwrap_or(min_rate);
        let period = tiers.period_for(rate);
        debug!(
            "spread offer #{}: depth={} rate={:.6} amount={:.2} period={}d",
            offers.len() + 1,
            depth,
            rate,
            amount,
            period
        );

        offers.push(LoanOfferDraft::new(amount, rate, period));
        next_lend += gap_climb;
    }

    offers
}
