//! The lending cycle and the periodic checks, shared by the scheduler,
//! the dry run and the Telegram commands.

use std::sync::Arc;
use std::time::Duration;

use bitfinex_client::rest::MAX_BOOK_LEVELS;
use bitfinex_client::BitfinexRestClient;
use chrono::{DateTime, Timelike, Utc};
use common::config::{BotConfig, StrategyMode};
use common::{Error, FundingSnapshot};
use lending_strategy::alerts::{
    check_rate_threshold, format_active_credits, format_credit_notification, format_rate_alert,
    RATE_CHECK_CANDLES, RATE_CHECK_TIME_FRAME,
};
use lending_strategy::{AllocationEngine, CreditWatcher, MarketAnalyzer, OrderGate, RateCheck};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::journal::{JournalEvent, OfferFields, TradeJournal};
use crate::telegram::TelegramBot;

/// What started a lending cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Schedule,
    Manual,
    DryRun,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Schedule => "schedule",
            Trigger::Manual => "manual",
            Trigger::DryRun => "dry_run",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cancelled: usize,
    pub available: f64,
    pub lendable: f64,
    pub accepted: usize,
    pub rejected: usize,
    pub placed: usize,
    pub failed: usize,
    pub simulated: bool,
    pub skipped: Option<String>,
}

impl CycleReport {
    pub fn describe(&self) -> String {
        if let Some(reason) = &self.skipped {
            return format!("cancelled {} offer(s), skipped: {reason}", self.cancelled);
        }
        format!(
            "cancelled {} offer(s), {} {} offer(s), {} failed, {} rejected",
            self.cancelled,
            if self.simulated { "simulated" } else { "placed" },
            self.placed,
            self.failed,
            self.rejected
        )
    }
}

/// Collaborators of one bot instance. Lending cycles are serialized by
/// `cycle_lock`, whoever triggers them.
pub struct LendingService {
    client: BitfinexRestClient,
    config: Arc<RwLock<BotConfig>>,
    engine: AllocationEngine,
    journal: Arc<TradeJournal>,
    notifier: Option<Arc<TelegramBot>>,
    cycle_lock: Mutex<()>,
    credit_watcher: Mutex<CreditWatcher>,
    force_simulate: bool,
}

impl LendingService {
    pub fn new(
        client: BitfinexRestClient,
        config: Arc<RwLock<BotConfig>>,
        journal: Arc<TradeJournal>,
        notifier: Option<Arc<TelegramBot>>,
        force_simulate: bool,
    ) -> Self {
        Self {
            client,
            config,
            engine: AllocationEngine::new(Arc::new(MarketAnalyzer::new())),
            journal,
            notifier,
            cycle_lock: Mutex::new(()),
            credit_watcher: Mutex::new(CreditWatcher::new()),
            force_simulate,
        }
    }

    pub fn config(&self) -> &Arc<RwLock<BotConfig>> {
        &self.config
    }

    pub async fn notify(&self, text: &str) {
        if let Some(bot) = &self.notifier {
            bot.notify(text).await;
        }
    }

    /// Cancel pending offers, size the pool, run the engine and place the
    /// result through the order gate.
    pub async fn run_lending_cycle(&self, trigger: Trigger) -> Result<CycleReport, Error> {
        let _guard = self.cycle_lock.lock().await;
        let cfg = self.config.read().await.clone();
        let symbol = cfg.funding_symbol();
        let simulate = self.force_simulate || cfg.test_mode || trigger == Trigger::DryRun;
        info!(
            "Lending cycle ({}) for {} with {} strategy{}",
            trigger.as_str(),
            symbol,
            cfg.strategy.mode,
            if simulate { " [simulated]" } else { "" }
        );

        let mut report = CycleReport {
            simulated: simulate,
            ..CycleReport::default()
        };

        let pending = self.client.get_funding_offers(&symbol).await?;
        let had_pending = !pending.is_empty();
        for offer in &pending {
            if simulate {
                info!("[simulated] would cancel offer {}", offer.id);
                report.cancelled += 1;
                continue;
            }
            match self.client.cancel_funding_offer(offer.id).await {
                Ok(()) => report.cancelled += 1,
                Err(e) => warn!("Failed to cancel offer {}: {}", offer.id, e),
            }
        }
        if report.cancelled > 0 && !simulate {
            sleep(Duration::from_secs(cfg.timing.cancel_settle_secs)).await;
        }

        report.available = self.client.get_funding_balance(&cfg.currency).await?;
        report.lendable = (report.available - cfg.strategy.reserve_amount).max(0.0);
        info!(
            "Funding balance {:.2} {}, lendable {:.2} after reserve {:.2}",
            report.available, cfg.currency, report.lendable, cfg.strategy.reserve_amount
        );

        if report.lendable < cfg.strategy.min_loan {
            let reason = format!(
                "lendable {:.2} below min loan {:.2}",
                report.lendable, cfg.strategy.min_loan
            );
            info!("Skipping allocation: {}", reason);
            report.skipped = Some(reason);
            self.record_summary(&cfg, trigger, &report, 0.0);
            return Ok(report);
        }

        let book = match self
            .client
            .get_funding_book(&symbol, MAX_BOOK_LEVELS as i64)
            .await
        {
            Ok(book) => book,
            Err(e) => {
                warn!("Funding book unavailable, continuing with an empty book: {}", e);
                Vec::new()
            }
        };

        let candles = if cfg.strategy.mode == StrategyMode::Kline {
            let kline = &cfg.strategy.kline;
            match self
                .client
                .get_funding_candles(&symbol, &kline.time_frame, kline.period)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("Candles unavailable, continuing without them: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let snapshot = FundingSnapshot::new(report.lendable, book, candles);
        let allocation = self.engine.compute_offers(&snapshot, &cfg.strategy);
        if let Some(condition) = &allocation.condition {
            debug!("Market condition: {:?}", condition);
        }
        let prepared = self
            .engine
            .prepare_offers(&allocation.offers, &cfg.strategy, had_pending);
        report.accepted = prepared.accepted.len();
        report.rejected = prepared.rejected.len();

        for rejected in &prepared.rejected {
            self.journal.record(JournalEvent::OfferRejected {
                offer: OfferFields::from(&rejected.draft),
                reason: rejected.reason.to_string(),
            });
        }

        let mut gate = OrderGate::new(cfg.strategy.order_limit);
        for draft in &prepared.accepted {
            if !gate.is_open() {
                info!(
                    "Order limit {} reached, {} offer(s) left unplaced",
                    cfg.strategy.order_limit,
                    prepared.accepted.len().saturating_sub(gate.placed() + report.failed)
                );
                break;
            }

            if simulate {
                info!(
                    "[simulated] offer {:.2} {} at {:.6}% for {}d",
                    draft.amount,
                    cfg.currency,
                    draft.daily_rate * 100.0,
                    draft.period_days
                );
                self.journal.record(JournalEvent::OfferSimulated {
                    offer: OfferFields::from(draft),
                });
                gate.record_placed();
                continue;
            }

            match self
                .client
                .submit_funding_offer(&symbol, draft.amount, draft.daily_rate, draft.period_days)
                .await
            {
                Ok(offer_id) => {
                    info!(
                        "Placed offer {:?}: {:.2} {} at {:.6}% for {}d",
                        offer_id,
                        draft.amount,
                        cfg.currency,
                        draft.daily_rate * 100.0,
                        draft.period_days
                    );
                    self.journal.record(JournalEvent::OfferPlaced {
                        offer_id,
                        offer: OfferFields::from(draft),
                    });
                    gate.record_placed();
                }
                Err(e) => {
                    error!("Offer submission failed: {}", e);
                    self.journal.record(JournalEvent::OfferFailed {
                        offer: OfferFields::from(draft),
                        error: e.to_string(),
                    });
                    report.failed += 1;
                }
            }
        }
        report.placed = gate.placed();

        self.record_summary(&cfg, trigger, &report, prepared.bonus_applied);
        info!("Lending cycle done: {}", report.describe());
        Ok(report)
    }

    fn record_summary(&self, cfg: &BotConfig, trigger: Trigger, report: &CycleReport, bonus: f64) {
        self.journal.record(JournalEvent::CycleSummary {
            strategy: cfg.strategy.mode,
            trigger: trigger.as_str(),
            cancelled_offers: report.cancelled,
            available: report.available,
            lendable: report.lendable,
            accepted: report.accepted,
            rejected: report.rejected,
            placed: report.placed,
            failed: report.failed,
            bonus_applied: bonus,
            skipped: report.skipped.clone(),
        });
    }

    pub async fn current_rate(&self) -> Result<f64, Error> {
        let symbol = self.config.read().await.funding_symbol();
        self.client.get_current_funding_rate(&symbol).await
    }

    /// Peak of the last hour of 5-minute candles against the alert
    /// threshold. With `alert`, an exceeded threshold is notified and journaled.
    pub async fn check_rate(&self, alert: bool) -> Result<RateCheck, Error> {
        let (symbol, currency, threshold) = {
            let cfg = self.config.read().await;
            (
                cfg.funding_symbol(),
                cfg.currency.clone(),
                cfg.notify.rate_threshold,
            )
        };
        let candles = self
            .client
            .get_funding_candles(&symbol, RATE_CHECK_TIME_FRAME, RATE_CHECK_CANDLES)
            .await?;
        let check = check_rate_threshold(&candles, threshold);

        if alert && check.exceeded {
            info!(
                "Rate {:.4}% above threshold {:.4}%",
                check.peak_percent, check.threshold_percent
            );
            self.notify(&format_rate_alert(&check, &currency)).await;
            self.journal.record(JournalEvent::RateAlert {
                peak_percent: check.peak_percent,
                threshold_percent: check.threshold_percent,
            });
        }
        Ok(check)
    }

    /// Report credits opened since the previous check. Returns how many were new.
    pub async fn check_new_credits(&self) -> Result<usize, Error> {
        let (symbol, currency) = {
            let cfg = self.config.read().await;
            (cfg.funding_symbol(), cfg.currency.clone())
        };
        let credits = self.client.get_funding_credits(&symbol).await?;
        let fresh = self
            .credit_watcher
            .lock()
            .await
            .check(&credits, Utc::now().timestamp_millis());
        if fresh.is_empty() {
            return Ok(0);
        }

        info!("{} new funding credit(s)", fresh.len());
        self.notify(&format_credit_notification(&fresh, &currency))
            .await;
        self.journal.record(JournalEvent::CreditAlert {
            count: fresh.len(),
            total_amount: fresh.iter().map(|c| c.amount).sum(),
        });
        Ok(fresh.len())
    }

    pub async fn active_credits_summary(&self) -> Result<String, Error> {
        let (symbol, currency) = {
            let cfg = self.config.read().await;
            (cfg.funding_symbol(), cfg.currency.clone())
        };
        let credits = self.client.get_funding_credits(&symbol).await?;
        Ok(format_active_credits(&credits, &currency))
    }
}

/// Time from `now` until the next `minute` past the hour (`minute` in 0..60).
pub fn until_minute_mark(now: DateTime<Utc>, minute: u32) -> Duration {
    let minute = minute.min(59);
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    let mark = u64::from(minute) * 60;
    let secs = if mark > into_hour {
        mark - into_hour
    } else {
        3600 - into_hour + mark
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, second).unwrap()
    }

    #[test]
    fn test_until_minute_mark_later_this_hour() {
        assert_eq!(until_minute_mark(at(0, 0), 6), Duration::from_secs(360));
        assert_eq!(until_minute_mark(at(5, 30), 6), Duration::from_secs(30));
    }

    #[test]
    fn test_until_minute_mark_wraps_to_next_hour() {
        assert_eq!(until_minute_mark(at(6, 0), 6), Duration::from_secs(3600));
        assert_eq!(until_minute_mark(at(59, 0), 6), Duration::from_secs(420));
    }

    #[test]
    fn test_report_description() {
        let report = CycleReport {
            cancelled: 2,
            placed: 3,
            failed: 1,
            ..CycleReport::default()
        };
        assert_eq!(
            report.describe(),
            "cancelled 2 offer(s), placed 3 offer(s), 1 failed, 0 rejected"
        );

        let skipped = CycleReport {
            skipped: Some("lendable 10.00 below min loan 150.00".into()),
            ..CycleReport::default()
        };
        assert!(skipped.describe().ends_with("below min loan 150.00"));
    }

    #[test]
    fn test_trigger_labels() {
        assert_eq!(Trigger::Manual.as_str(), "manual");
        assert_eq!(Trigger::DryRun.as_str(), "dry_run");
    }
}
