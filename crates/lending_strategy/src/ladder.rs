//! Shared building blocks for the allocators: cent rounding, fund splitting,
//! amount capping and period tiering.

use common::config::StrategyConfig;
use serde::Serialize;

/// Round a non-negative amount down to two decimal places.
pub fn round_down_cents(amount: f64) -> f64 {
    (amount * 100.0).floor() / 100.0
}

/// Apply `max_loan` when it is set (> 0).
pub fn cap_amount(amount: f64, max_loan: f64) -> f64 {
    if max_loan > 0.0 {
        amount.min(max_loan)
    } else {
        amount
    }
}

/// How a pool is cut into equal offers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPlan {
    pub count: usize,
    pub amount_each: f64,
}

/// Split `pool` into `requested` equal offers, rounded down to cents.
///
/// While each slice is at or below `min_loan` and more than one slice
/// remains, the count drops by one. Returns `None` when nothing can be
/// split: a non-positive count or a pool below `min_loan`.
pub fn split_funds(pool: f64, requested: i64, min_loan: f64) -> Option<SplitPlan> {
    if requested <= 0 || pool < min_loan {
        return None;
    }

    let mut count = requested as usize;
    let mut amount_each = round_down_cents(pool / count as f64);
    while amount_each <= min_loan && count > 1 {
        count -= 1;
        amount_each = round_down_cents(pool / count as f64);
    }

    Some(SplitPlan { count, amount_each })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodTier {
    Short,
    Mid,
    Long,
}

impl PeriodTier {
    /// One tier shorter; `Short` stays `Short`.
    pub fn demote(self) -> Self {
        match self {
            PeriodTier::Long => PeriodTier::Mid,
            PeriodTier::Mid | PeriodTier::Short => PeriodTier::Short,
        }
    }
}

/// Rate-driven period selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodTiers {
    pub short_days: u32,
    pub mid_days: u32,
    pub long_days: u32,
    /// Decimal daily rate at which offers go to the mid period (0 disables).
    pub mid_threshold: f64,
    /// Decimal daily rate at which offers go to the long period (0 disables).
    pub long_threshold: f64,
}

impl PeriodTiers {
    pub fn from_config(cfg: &StrategyConfig) -> Self {
        Self {
            short_days: cfg.periods.short_days,
            mid_days: cfg.periods.mid_days,
            long_days: cfg.periods.long_days,
            mid_threshold: cfg.thirty_day_threshold(),
            long_threshold: cfg.one_twenty_day_threshold(),
        }
    }

    /// Reaching a threshold exactly counts as meeting it.
    pub fn tier_for(&self, daily_rate: f64) -> PeriodTier {
        if self.long_threshold > 0.0 && daily_rate >= self.long_threshold {
            PeriodTier::Long
        } else if self.mid_threshold > 0.0 && daily_rate >= self.mid_threshold {
            PeriodTier::Mid
        } else {
            PeriodTier::Short
        }
    }

    pub fn days(&self, tier: PeriodTier) -> u32 {
        match tier {
            PeriodTier::Short => self.short_days,
            PeriodTier::Mid => self.mid_days,
            PeriodTier::Long => self.long_days,
        }
    }

    pub fn period_for(&self, daily_rate: f64) -> u32 {
        self.days(self.tier_for(daily_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers(mid: f64, long: f64) -> PeriodTiers {
        PeriodTiers {
            short_days: 2,
            mid_days: 30,
            long_days: 120,
            mid_threshold: mid,
            long_threshold: long,
        }
    }

    #[test]
    fn test_round_down_cents() {
        assert_eq!(round_down_cents(133.3333), 133.33);
        assert_eq!(round_down_cents(99.999), 99.99);
        assert_eq!(round_down_cents(200.0), 200.0);
        assert_eq!(round_down_cents(0.0), 0.0);
    }

    #[test]
    fn test_cap_amount() {
        assert_eq!(cap_amount(1500.0, 1000.0), 1000.0);
        assert_eq!(cap_amount(1500.0, 0.0), 1500.0);
        assert_eq!(cap_amount(500.0, 1000.0), 500.0);
    }

    #[test]
    fn test_split_reduces_count_until_above_min() {
        // 400 / 3 = 133.33 <= 150, so two offers of 200.
        let plan = split_funds(400.0, 3, 150.0).unwrap();
        assert_eq!(plan, SplitPlan { count: 2, amount_each: 200.0 });
    }

    #[test]
    fn test_split_single_slice_kept_even_at_min() {
        let plan = split_funds(150.0, 4, 150.0).unwrap();
        assert_eq!(plan.count, 1);
        assert_eq!(plan.amount_each, 150.0);
    }

    #[test]
    fn test_split_degenerate_inputs() {
        assert!(split_funds(1000.0, 0, 150.0).is_none());
        assert!(split_funds(1000.0, -2, 150.0).is_none());
        assert!(split_funds(100.0, 3, 150.0).is_none());
    }

    #[test]
    fn test_tier_threshold_is_inclusive() {
        let t = tiers(0.0005, 0.001);
        assert_eq!(t.period_for(0.001), 120);
        assert_eq!(t.period_for(0.0005), 30);
        assert_eq!(t.period_for(0.00049), 2);
    }

    #[test]
    fn test_zero_threshold_disables_tier() {
        let t = tiers(0.0, 0.001);
        assert_eq!(t.tier_for(0.0009), PeriodTier::Short);
        assert_eq!(t.tier_for(0.002), PeriodTier::Long);

        let none = tiers(0.0, 0.0);
        assert_eq!(none.tier_for(0.07), PeriodTier::Short);
    }

    #[test]
    fn test_demote() {
        assert_eq!(PeriodTier::Long.demote(), PeriodTier::Mid);
        assert_eq!(PeriodTier::Mid.demote(), PeriodTier::Short);
        assert_eq!(PeriodTier::Short.demote(), PeriodTier::Short);
    }

    #[test]
    fn test_from_config_converts_percent_thresholds() {
        let cfg = StrategyConfig {
            thirty_day_lend_rate_threshold: 0.05,
            one_twenty_day_lend_rate_threshold: 0.1,
            ..StrategyConfig::default()
        };
        let t = PeriodTiers::from_config(&cfg);
        assert!((t.mid_threshold - 0.0005).abs() < 1e-12);
        assert!((t.long_threshold - 0.001).abs() < 1e-12);
        assert_eq!(t.days(PeriodTier::Long), 120);
    }
}
