//! Fixed-size reservation carved out of the pool before spreading.

use common::config::StrategyConfig;
use common::LoanOfferDraft;

use crate::ladder::cap_amount;

/// High-hold runs only when its amount is strictly above `min_loan`.
pub fn is_enabled(cfg: &StrategyConfig) -> bool {
    cfg.high_hold_amount > cfg.min_loan
}

/// Offer size after `max_loan` is applied.
pub fn effective_amount(cfg: &StrategyConfig) -> f64 {
    cap_amount(cfg.high_hold_amount, cfg.max_loan)
}

/// Emit up to `high_hold_orders` offers of the effective amount at
/// `daily_rate`, decrementing `pool` for each one.
pub fn allocate(
    pool: &mut f64,
    cfg: &StrategyConfig,
    daily_rate: f64,
    period_days: u32,
) -> Vec<LoanOfferDraft> {
    if !is_enabled(cfg) {
        return Vec::new();
    }

    let amount = effective_amount(cfg);
    let wanted = cfg.high_hold_orders.max(1) as usize;
    let possible = (*pool / amount).floor() as usize;
    let orders = wanted.min(possible);

    let mut offers = Vec::with_capacity(orders);
    for _ in 0..orders {
        if *pool < amount {
            break;
        }
        offers.push(LoanOfferDraft::new(amount, daily_rate, period_days));
        *pool -= amount;
    }
    offers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(amount: f64, orders: i64, max_loan: f64) -> StrategyConfig {
        StrategyConfig {
            min_loan: 150.0,
            max_loan,
            high_hold_amount: amount,
            high_hold_orders: orders,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_disabled_when_not_above_min_loan() {
        let mut pool = 5000.0;
        assert!(allocate(&mut pool, &cfg(150.0, 1, 0.0), 0.001, 120).is_empty());
        assert_eq!(pool, 5000.0);
    }

    #[test]
    fn test_single_offer_decrements_pool() {
        let mut pool = 2000.0;
        let offers = allocate(&mut pool, &cfg(500.0, 1, 1000.0), 0.001, 120);
        assert_eq!(offers, vec![LoanOfferDraft::new(500.0, 0.001, 120)]);
        assert_eq!(pool, 1500.0);
    }

    #[test]
    fn test_orders_limited_by_pool() {
        let mut pool = 1300.0;
        let offers = allocate(&mut pool, &cfg(500.0, 5, 0.0), 0.001, 120);
        assert_eq!(offers.len(), 2);
        assert_eq!(pool, 300.0);
    }

    #[test]
    fn test_amount_capped_by_max_loan() {
        let mut pool = 3000.0;
        let offers = allocate(&mut pool, &cfg(2500.0, 2, 1000.0), 0.001, 120);
        assert_eq!(offers.len(), 2);
        assert!(offers.iter().all(|o| o.amount == 1000.0));
        assert_eq!(pool, 1000.0);
    }

    #[test]
    fn test_non_positive_order_count_means_one() {
        let mut pool = 3000.0;
        let offers = allocate(&mut pool, &cfg(500.0, 0, 0.0), 0.001, 120);
        assert_eq!(offers.len(), 1);
    }
}
