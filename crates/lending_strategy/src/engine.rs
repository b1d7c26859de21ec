//! Allocation engine.
//!
//! Turns one funding snapshot into an ordered list of offer drafts under the
//! configured strategy, then applies the per-cycle post-processing (rate
//! bonus, rate and amount validation). Placement and the order-limit gate
//! live with the caller, which owns the exchange client.

use std::fmt;
use std::sync::Arc;

use common::config::{StrategyConfig, StrategyMode};
use common::{FundingSnapshot, LoanOfferDraft};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::{MarketAnalyzer, MarketCondition};
use crate::high_hold;
use crate::kline;
use crate::ladder::PeriodTiers;
use crate::rates::{decimal_to_percentage, validate_daily_rate};
use crate::smart::SmartStrategy;
use crate::tiered;

/// Result of one allocation pass.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub mode: StrategyMode,
    pub offers: Vec<LoanOfferDraft>,
    /// Market condition (smart mode only).
    pub condition: Option<MarketCondition>,
    /// Smoothed candle rate (kline mode only).
    pub smoothed_rate: Option<f64>,
    /// Kline target rate after mark-up (kline mode only).
    pub target_rate: Option<f64>,
}

impl Allocation {
    fn empty(mode: StrategyMode) -> Self {
        Self {
            mode,
            offers: Vec::new(),
            condition: None,
            smoothed_rate: None,
            target_rate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", content = "value", rename_all = "snake_case")]
pub enum RejectReason {
    InvalidRate(f64),
    AmountOutOfBounds(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidRate(rate) => {
                write!(f, "daily rate {:.6}% outside (0, 7]%", decimal_to_percentage(*rate))
            }
            RejectReason::AmountOutOfBounds(amount) => {
                write!(f, "amount {amount:.2} outside loan bounds")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedOffer {
    pub draft: LoanOfferDraft,
    pub reason: RejectReason,
}

/// Offers ready for placement plus those dropped by validation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreparedOffers {
    pub accepted: Vec<LoanOfferDraft>,
    pub rejected: Vec<RejectedOffer>,
    /// Bonus added to every rate this cycle (decimal).
    pub bonus_applied: f64,
}

/// The engine holds the shared rate history; everything else comes in
/// with each call.
pub struct AllocationEngine {
    analyzer: Arc<MarketAnalyzer>,
    smart: SmartStrategy,
}

impl AllocationEngine {
    pub fn new(analyzer: Arc<MarketAnalyzer>) -> Self {
        Self {
            smart: SmartStrategy::new(Arc::clone(&analyzer)),
            analyzer,
        }
    }

    pub fn analyzer(&self) -> &Arc<MarketAnalyzer> {
        &self.analyzer
    }

    /// Compute offer drafts for the snapshot: high-hold first, then the
    /// spread ladder of the active strategy.
    pub fn compute_offers(&self, snapshot: &FundingSnapshot, cfg: &StrategyConfig) -> Allocation {
        let mode = cfg.mode;
        let pool = snapshot.available_balance;
        if pool < cfg.min_loan {
            debug!(
                "Pool {:.2} below min loan {:.2}; nothing to allocate",
                pool, cfg.min_loan
            );
            return Allocation::empty(mode);
        }

        let tiers = PeriodTiers::from_config(cfg);
        let allocation = match mode {
            StrategyMode::Traditional => {
                let mut remaining = pool;
                let mut offers = high_hold::allocate(
                    &mut remaining,
                    cfg,
                    cfg.high_hold_rate_decimal(),
                    tiers.long_days,
                );
                if remaining >= cfg.min_loan {
                    offers.extend(tiered::allocate(remaining, &snapshot.book, cfg, &tiers));
                }
                Allocation {
                    offers,
                    ..Allocation::empty(mode)
                }
            }
            StrategyMode::Kline => {
                let smoothed = kline::smoothed_rate(&snapshot.candles, cfg);
                let target =
                    kline::target_rate(smoothed, cfg.kline.spread_percent, cfg.min_daily_rate());
                info!(
                    "Kline: {} smoothing over {} candles -> {:.6}%, target {:.6}%",
                    cfg.kline.smooth_method,
                    snapshot.candles.len(),
                    decimal_to_percentage(smoothed),
                    decimal_to_percentage(target)
                );

                let mut remaining = pool;
                let mut offers = high_hold::allocate(
                    &mut remaining,
                    cfg,
                    cfg.high_hold_rate_decimal(),
                    tiers.long_days,
                );
                if remaining >= cfg.min_loan {
                    offers.extend(kline::allocate(remaining, target, cfg, &tiers));
                }
                Allocation {
                    offers,
                    smoothed_rate: Some(smoothed),
                    target_rate: Some(target),
                    ..Allocation::empty(mode)
                }
            }
            StrategyMode::Smart => {
                let result = self.smart.allocate(pool, &snapshot.book, cfg, &tiers);
                Allocation {
                    offers: result.offers,
                    condition: Some(result.condition),
                    ..Allocation::empty(mode)
                }
            }
        };

        info!(
            "{} strategy produced {} offer draft(s) from pool {:.2}",
            mode,
            allocation.offers.len(),
            pool
        );
        allocation
    }

    /// Apply the rate bonus (only when no offers were pending at cycle
    /// start) and drop drafts that fail rate or amount validation.
    pub fn prepare_offers(
        &self,
        drafts: &[LoanOfferDraft],
        cfg: &StrategyConfig,
        had_pending_offers: bool,
    ) -> PreparedOffers {
        prepare_offers(drafts, cfg, had_pending_offers)
    }
}

pub fn prepare_offers(
    drafts: &[LoanOfferDraft],
    cfg: &StrategyConfig,
    had_pending_offers: bool,
) -> PreparedOffers {
    let bonus = if had_pending_offers {
        0.0
    } else {
        cfg.rate_bonus_decimal()
    };

    let mut prepared = PreparedOffers {
        bonus_applied: bonus,
        ..PreparedOffers::default()
    };

    for draft in drafts {
        let adjusted = LoanOfferDraft {
            daily_rate: draft.daily_rate + bonus,
            ..*draft
        };

        let reason = if !validate_daily_rate(adjusted.daily_rate) {
            Some(RejectReason::InvalidRate(adjusted.daily_rate))
        } else if !amount_in_bounds(adjusted.amount, cfg) {
            Some(RejectReason::AmountOutOfBounds(adjusted.amount))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!("Dropping offer {:?}: {}", adjusted, reason);
                prepared.rejected.push(RejectedOffer {
                    draft: adjusted,
                    reason,
                });
            }
            None => prepared.accepted.push(adjusted),
        }
    }

    prepared
}

fn amount_in_bounds(amount: f64, cfg: &StrategyConfig) -> bool {
    amount >= cfg.min_loan && (cfg.max_loan <= 0.0 || amount <= cfg.max_loan)
}

/// Counts placed offers against `order_limit` (0 = unlimited).
#[derive(Debug, Clone, Copy)]
pub struct OrderGate {
    limit: usize,
    placed: usize,
}

impl OrderGate {
    pub fn new(limit: usize) -> Self {
        Self { limit, placed: 0 }
    }

    pub fn is_open(&self) -> bool {
        self.limit == 0 || self.placed < self.limit
    }

    /// Count a successful (or simulated) placement.
    pub fn record_placed(&mut self) {
        self.placed += 1;
    }

    pub fn placed(&self) -> usize {
        self.placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Trend;
    use crate::rates::MAX_DAILY_RATE;
    use common::config::SmoothMethod;
    use common::{Candle, FundingBookEntry};

    fn engine() -> AllocationEngine {
        AllocationEngine::new(Arc::new(MarketAnalyzer::new()))
    }

    fn book(rates: &[f64]) -> Vec<FundingBookEntry> {
        rates
            .iter()
            .map(|r| FundingBookEntry {
                daily_rate: *r,
                amount: 1000.0,
                period: 2,
                count: 1,
            })
            .collect()
    }

    fn candle(high: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open: high,
            close: high,
            high,
            low: high / 2.0,
            volume: 1.0,
        }
    }

    fn scenario_cfg(mode: StrategyMode) -> StrategyConfig {
        StrategyConfig {
            mode,
            min_loan: 150.0,
            max_loan: 1000.0,
            high_hold_amount: 500.0,
            high_hold_orders: 1,
            high_hold_rate: 0.1,
            spread_lend: 3,
            min_daily_lend_rate: 0.01,
            ..StrategyConfig::default()
        }
    }

    #[test]
    fn test_scenario_high_hold_plus_three_spread() {
        let cfg = scenario_cfg(StrategyMode::Traditional);
        let snapshot = FundingSnapshot::new(2000.0, book(&[0.0003, 0.0004, 0.0005]), vec![]);
        let allocation = engine().compute_offers(&snapshot, &cfg);

        assert_eq!(allocation.offers.len(), 4);
        let hold = allocation.offers[0];
        assert_eq!(hold.amount, 500.0);
        assert!((hold.daily_rate - 0.001).abs() < 1e-12);
        assert_eq!(hold.period_days, 120);

        let spread_total: f64 = allocation.offers[1..].iter().map(|o| o.amount).sum();
        assert!((spread_total - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_funds_below_min_loan_every_strategy() {
        for mode in [StrategyMode::Traditional, StrategyMode::Smart, StrategyMode::Kline] {
            let cfg = scenario_cfg(mode);
            let snapshot =
                FundingSnapshot::new(100.0, book(&[0.0003, 0.0004]), vec![candle(0.0005)]);
            let allocation = engine().compute_offers(&snapshot, &cfg);
            assert!(allocation.offers.is_empty(), "{mode} produced offers");
        }
    }

    #[test]
    fn test_scenario_split_reduced_to_two() {
        let cfg = StrategyConfig {
            high_hold_amount: 0.0,
            max_loan: 0.0,
            ..scenario_cfg(StrategyMode::Traditional)
        };
        let snapshot = FundingSnapshot::new(400.0, vec![], vec![]);
        let allocation = engine().compute_offers(&snapshot, &cfg);
        let amounts: Vec<f64> = allocation.offers.iter().map(|o| o.amount).collect();
        assert_eq!(amounts, vec![200.0, 200.0]);
    }

    #[test]
    fn test_scenario_kline_max_smoothing() {
        let mut cfg = StrategyConfig {
            high_hold_amount: 0.0,
            ..scenario_cfg(StrategyMode::Kline)
        };
        cfg.kline.smooth_method = SmoothMethod::Max;
        let candles = vec![candle(0.0003), candle(0.0006), candle(0.0002)];
        let snapshot = FundingSnapshot::new(1500.0, vec![], candles);

        let allocation = engine().compute_offers(&snapshot, &cfg);
        assert_eq!(allocation.smoothed_rate, Some(0.0006));
        assert_eq!(allocation.offers.len(), 3);
        assert!((allocation.offers[0].daily_rate - 0.0006).abs() < 1e-12);
    }

    #[test]
    fn test_kline_without_candles_uses_min_rate() {
        let cfg = StrategyConfig {
            high_hold_amount: 0.0,
            ..scenario_cfg(StrategyMode::Kline)
        };
        let allocation = engine().compute_offers(&FundingSnapshot::new(1500.0, vec![], vec![]), &cfg);
        assert!((allocation.offers[0].daily_rate - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn test_smart_reports_condition() {
        let cfg = scenario_cfg(StrategyMode::Smart);
        let snapshot = FundingSnapshot::new(2000.0, book(&[0.0003, 0.0004, 0.0005]), vec![]);
        let allocation = engine().compute_offers(&snapshot, &cfg);
        let condition = allocation.condition.expect("smart mode reports a condition");
        assert_eq!(condition.trend, Trend::Stable);
        assert_eq!(allocation.offers.len(), 4);
    }

    #[test]
    fn test_emitted_offers_respect_bounds() {
        let books = [
            vec![],
            book(&[0.0002]),
            book(&[0.0003, 0.0001, 0.0009, 0.0004, 0.0002]),
            book(&[0.05, 0.08, 0.09]),
        ];
        let pools = [149.99, 150.0, 401.0, 2000.0, 12_345.67];
        let engine = engine();

        for mode in [StrategyMode::Traditional, StrategyMode::Smart, StrategyMode::Kline] {
            let cfg = scenario_cfg(mode);
            for b in &books {
                for pool in pools {
                    let candles: Vec<Candle> = b.iter().map(|e| candle(e.daily_rate)).collect();
                    let snapshot = FundingSnapshot::new(pool, b.clone(), candles);
                    let allocation = engine.compute_offers(&snapshot, &cfg);
                    let prepared = engine.prepare_offers(&allocation.offers, &cfg, false);

                    for offer in &prepared.accepted {
                        assert!(offer.amount >= cfg.min_loan, "{mode}: {offer:?}");
                        assert!(offer.amount <= cfg.max_loan, "{mode}: {offer:?}");
                        assert!(offer.daily_rate > 0.0, "{mode}: {offer:?}");
                        assert!(offer.daily_rate <= MAX_DAILY_RATE, "{mode}: {offer:?}");
                    }
                    let total: f64 = prepared.accepted.iter().map(|o| o.amount).sum();
                    assert!(total <= pool + 1e-9, "{mode}: placed {total} from {pool}");
                }
            }
        }
    }

    #[test]
    fn test_bonus_only_without_pending_offers() {
        let cfg = StrategyConfig {
            rate_bonus: 0.01,
            ..scenario_cfg(StrategyMode::Traditional)
        };
        let drafts = vec![LoanOfferDraft::new(500.0, 0.0003, 2)];

        let fresh = prepare_offers(&drafts, &cfg, false);
        assert!((fresh.accepted[0].daily_rate - 0.0004).abs() < 1e-12);
        assert!((fresh.bonus_applied - 0.0001).abs() < 1e-12);

        let pending = prepare_offers(&drafts, &cfg, true);
        assert_eq!(pending.accepted[0].daily_rate, 0.0003);
        assert_eq!(pending.bonus_applied, 0.0);
    }

    #[test]
    fn test_invalid_offers_dropped_individually() {
        let cfg = scenario_cfg(StrategyMode::Traditional);
        let drafts = vec![
            LoanOfferDraft::new(500.0, 0.0003, 2),
            LoanOfferDraft::new(500.0, 0.0, 2),
            LoanOfferDraft::new(500.0, 0.08, 2),
            LoanOfferDraft::new(100.0, 0.0003, 2),
            LoanOfferDraft::new(1500.0, 0.0003, 2),
            LoanOfferDraft::new(300.0, 0.0004, 30),
        ];
        let prepared = prepare_offers(&drafts, &cfg, true);

        assert_eq!(prepared.accepted.len(), 2);
        assert_eq!(prepared.rejected.len(), 4);
        assert!(matches!(prepared.rejected[0].reason, RejectReason::InvalidRate(_)));
        assert!(matches!(prepared.rejected[2].reason, RejectReason::AmountOutOfBounds(_)));
        assert_eq!(prepared.accepted[1].period_days, 30);
    }

    #[test]
    fn test_order_gate() {
        let mut gate = OrderGate::new(2);
        assert!(gate.is_open());
        gate.record_placed();
        assert!(gate.is_open());
        gate.record_placed();
        assert!(!gate.is_open());
        assert_eq!(gate.placed(), 2);

        let mut unlimited = OrderGate::new(0);
        for _ in 0..100 {
            unlimited.record_placed();
        }
        assert!(unlimited.is_open());
    }
}
