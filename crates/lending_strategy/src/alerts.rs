//! Notification triggers: rate-threshold alerts and new-credit detection.
//!
//! Both produce plain-text messages; delivery belongs to the caller.

use std::fmt::Write as _;

use chrono::DateTime;
use common::{Candle, FundingCredit};
use serde::Serialize;
use tracing::{debug, info};

use crate::rates::{daily_to_annual, decimal_to_percentage};
use crate::smoothing::max_high;

/// Candles inspected by the hourly check: twelve 5-minute bars.
pub const RATE_CHECK_TIME_FRAME: &str = "5m";
pub const RATE_CHECK_CANDLES: u32 = 12;

/// Credits listed in full in one notification.
pub const MAX_DISPLAY_CREDITS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateCheck {
    /// Highest recent rate, percent per day.
    pub peak_percent: f64,
    pub threshold_percent: f64,
    pub exceeded: bool,
}

/// Compare the highest candle high against a percent threshold.
///
/// Alerts whenever the peak is strictly above the threshold, so a 0%
/// threshold alerts on any positive rate. An empty series never alerts.
pub fn check_rate_threshold(candles: &[Candle], threshold_percent: f64) -> RateCheck {
    let peak_percent = if candles.is_empty() {
        0.0
    } else {
        decimal_to_percentage(max_high(candles))
    };
    let exceeded = peak_percent > threshold_percent;

    debug!(
        "Rate check: peak {:.4}% vs threshold {:.4}% over {} candles (exceeded={})",
        peak_percent,
        threshold_percent,
        candles.len(),
        exceeded
    );

    RateCheck {
        peak_percent,
        threshold_percent,
        exceeded,
    }
}

pub fn format_rate_alert(check: &RateCheck, currency: &str) -> String {
    format!(
        "Rate alert for {currency}\n\
         Highest rate in the last hour: {:.4}% per day ({:.2}% annualized)\n\
         Threshold: {:.4}%",
        check.peak_percent,
        daily_to_annual(check.peak_percent),
        check.threshold_percent
    )
}

/// Detects credits opened since the previous check.
///
/// The first check only sets the cursor. Every later check reports credits
/// with `opened_at > cursor` and moves the cursor to the check time.
#[derive(Debug, Clone, Default)]
pub struct CreditWatcher {
    cursor_ms: Option<i64>,
}

impl CreditWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor_ms(&self) -> Option<i64> {
        self.cursor_ms
    }

    pub fn check(&mut self, credits: &[FundingCredit], now_ms: i64) -> Vec<FundingCredit> {
        let Some(cursor) = self.cursor_ms.replace(now_ms) else {
            info!(
                "First credit check: {} active credit(s), cursor initialized",
                credits.len()
            );
            return Vec::new();
        };

        let fresh: Vec<FundingCredit> = credits
            .iter()
            .filter(|c| c.opened_at_ms > cursor)
            .cloned()
            .collect();
        debug!("{} new credit(s) since {}", fresh.len(), cursor);
        fresh
    }
}

/// Human-readable summary of newly matched credits.
pub fn format_credit_notification(credits: &[FundingCredit], currency: &str) -> String {
    let mut msg = String::from("New funding credits\n\n");

    for (i, credit) in credits.iter().take(MAX_DISPLAY_CREDITS).enumerate() {
        let daily_pct = decimal_to_percentage(credit.daily_rate);
        let _ = writeln!(msg, "Credit #{}", i + 1);
        let _ = writeln!(msg, "Amount: {:.2} {currency}", credit.amount);
        let _ = writeln!(msg, "Daily rate: {daily_pct:.4}%");
        let _ = writeln!(msg, "Annual rate: {:.4}%", daily_to_annual(daily_pct));
        let _ = writeln!(msg, "Period: {} days", credit.period);
        let _ = writeln!(
            msg,
            "Expected earnings: {:.4} {currency}",
            credit.expected_earnings()
        );
        let _ = writeln!(msg, "Opened: {}\n", format_ms(credit.opened_at_ms));
    }
    if credits.len() > MAX_DISPLAY_CREDITS {
        let _ = writeln!(msg, "... and {} more\n", credits.len() - MAX_DISPLAY_CREDITS);
    }

    let total_amount: f64 = credits.iter().map(|c| c.amount).sum();
    let total_earnings: f64 = credits.iter().map(FundingCredit::expected_earnings).sum();
    let _ = writeln!(msg, "Total credits: {}", credits.len());
    let _ = writeln!(msg, "Total amount: {total_amount:.2} {currency}");
    let _ = write!(msg, "Total expected earnings: {total_earnings:.4} {currency}");
    msg
}

/// Credits listed in the active-credits overview.
pub const MAX_OVERVIEW_CREDITS: usize = 10;

/// Overview of every active credit with daily and per-period earnings.
pub fn format_active_credits(credits: &[FundingCredit], currency: &str) -> String {
    if credits.is_empty() {
        return "No active lending credits".to_string();
    }

    let mut msg = String::from("Active lending credits\n\n");
    for (i, credit) in credits.iter().take(MAX_OVERVIEW_CREDITS).enumerate() {
        let daily_earnings = credit.amount * credit.daily_rate;
        let _ = writeln!(msg, "#{} (id {})", i + 1, credit.id);
        let _ = writeln!(msg, "Amount: {:.2} {currency}", credit.amount);
        let _ = writeln!(
            msg,
            "Daily rate: {:.4}%",
            decimal_to_percentage(credit.daily_rate)
        );
        let _ = writeln!(msg, "Daily earnings: {daily_earnings:.4} {currency}");
        let _ = writeln!(msg, "Period: {} days", credit.period);
        let _ = writeln!(
            msg,
            "Period earnings: {:.4} {currency}",
            credit.expected_earnings()
        );
        let _ = writeln!(msg, "Opened: {}", format_ms(credit.opened_at_ms));
        let _ = writeln!(msg, "Status: {}\n", credit.status);
    }
    if credits.len() > MAX_OVERVIEW_CREDITS {
        let _ = writeln!(msg, "... and {} more\n", credits.len() - MAX_OVERVIEW_CREDITS);
    }

    let total_amount: f64 = credits.iter().map(|c| c.amount).sum();
    let total_daily: f64 = credits.iter().map(|c| c.amount * c.daily_rate).sum();
    let total_period: f64 = credits.iter().map(FundingCredit::expected_earnings).sum();
    let _ = writeln!(msg, "Total credits: {}", credits.len());
    let _ = writeln!(msg, "Total amount: {total_amount:.2} {currency}");
    let _ = writeln!(msg, "Total daily earnings: {total_daily:.4} {currency}");
    let _ = writeln!(msg, "Total period earnings: {total_period:.4} {currency}");
    if total_amount > 0.0 {
        let annual = daily_to_annual(decimal_to_percentage(total_daily / total_amount));
        let _ = write!(msg, "Blended annual rate: {annual:.2}%");
    }
    msg.trim_end().to_string()
}

fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open: high,
            close: high,
            high,
            low: high,
            volume: 0.0,
        }
    }

    fn credit(id: i64, opened_at_ms: i64) -> FundingCredit {
        FundingCredit {
            id,
            symbol: "fUSD".into(),
            amount: 1000.0,
            daily_rate: 0.0005,
            period: 30,
            created_at_ms: opened_at_ms,
            opened_at_ms,
            status: "ACTIVE".into(),
        }
    }

    #[test]
    fn test_rate_threshold_exceeded() {
        let candles = vec![candle(0.0002), candle(0.0011), candle(0.0004)];
        let check = check_rate_threshold(&candles, 0.1);
        assert!((check.peak_percent - 0.11).abs() < 1e-9);
        assert!(check.exceeded);

        let check = check_rate_threshold(&candles, 0.2);
        assert!(!check.exceeded);
    }

    #[test]
    fn test_zero_threshold_alerts_on_any_positive_rate() {
        let check = check_rate_threshold(&[candle(0.0005)], 0.0);
        assert!((check.peak_percent - 0.05).abs() < 1e-9);
        assert!(check.exceeded, "0% threshold should alert on a positive peak");
    }

    #[test]
    fn test_empty_series_never_alerts() {
        assert!(!check_rate_threshold(&[], 0.05).exceeded);
        assert!(!check_rate_threshold(&[], 0.0).exceeded);
    }

    #[test]
    fn test_rate_alert_message() {
        let check = RateCheck {
            peak_percent: 0.1,
            threshold_percent: 0.05,
            exceeded: true,
        };
        let msg = format_rate_alert(&check, "USD");
        assert!(msg.contains("0.1000%"));
        assert!(msg.contains("36.50%"));
    }

    #[test]
    fn test_first_check_only_initializes_cursor() {
        let mut watcher = CreditWatcher::new();
        let fresh = watcher.check(&[credit(1, 5_000)], 10_000);
        assert!(fresh.is_empty());
        assert_eq!(watcher.cursor_ms(), Some(10_000));
    }

    #[test]
    fn test_reports_credits_opened_after_cursor() {
        let mut watcher = CreditWatcher::new();
        watcher.check(&[], 10_000);

        let credits = vec![credit(1, 9_000), credit(2, 10_000), credit(3, 12_000)];
        let fresh = watcher.check(&credits, 20_000);
        assert_eq!(fresh.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(watcher.cursor_ms(), Some(20_000));

        // Already reported credits are not repeated.
        assert!(watcher.check(&credits, 30_000).is_empty());
    }

    #[test]
    fn test_cursor_advances_on_empty_check() {
        let mut watcher = CreditWatcher::new();
        watcher.check(&[], 10_000);
        watcher.check(&[], 20_000);
        assert_eq!(watcher.cursor_ms(), Some(20_000));
        assert!(watcher.check(&[credit(1, 15_000)], 30_000).is_empty());
    }

    #[test]
    fn test_credit_notification_truncates_and_totals() {
        let credits: Vec<_> = (0..7).map(|i| credit(i, 1_700_000_000_000)).collect();
        let msg = format_credit_notification(&credits, "USD");

        assert!(msg.contains("Credit #5"));
        assert!(!msg.contains("Credit #6"));
        assert!(msg.contains("... and 2 more"));
        assert!(msg.contains("Total credits: 7"));
        assert!(msg.contains("Total amount: 7000.00 USD"));
        // 1000 * 0.0005 * 30 = 15 per credit
        assert!(msg.contains("Expected earnings: 15.0000 USD"));
        assert!(msg.contains("Total expected earnings: 105.0000 USD"));
        assert!(msg.contains("2023-11-14 22:13:20 UTC"));
    }

    #[test]
    fn test_active_credits_overview() {
        assert_eq!(format_active_credits(&[], "USD"), "No active lending credits");

        let credits: Vec<_> = (0..12).map(|i| credit(i, 1_700_000_000_000)).collect();
        let msg = format_active_credits(&credits, "USD");
        assert!(msg.contains("#10 (id 9)"));
        assert!(!msg.contains("#11"));
        assert!(msg.contains("... and 2 more"));
        assert!(msg.contains("Daily earnings: 0.5000 USD"));
        assert!(msg.contains("Total daily earnings: 6.0000 USD"));
        // 0.05% per day blended
        assert!(msg.contains("Blended annual rate: 18.25%"));
    }
}
