//! Domain types shared across the bot.

use serde::{Deserialize, Serialize};

// ── Market data ───────────────────────────────────────────────────────

/// One level of the funding order book.
///
/// Book levels arrive in depth order; a deeper index is not guaranteed to
/// carry a higher rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingBookEntry {
    /// Daily rate as a decimal fraction (0.0003 = 0.03%/day).
    pub daily_rate: f64,
    /// Signed amount as reported by the exchange.
    pub amount: f64,
    /// Period in days.
    pub period: u32,
    /// Number of offers aggregated at this level.
    pub count: u32,
}

/// One OHLCV bar of the funding rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

/// Everything the allocation engine needs for one cycle.
///
/// Built fresh by the caller every cycle and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FundingSnapshot {
    pub available_balance: f64,
    pub book: Vec<FundingBookEntry>,
    pub candles: Vec<Candle>,
}

impl FundingSnapshot {
    pub fn new(available_balance: f64, book: Vec<FundingBookEntry>, candles: Vec<Candle>) -> Self {
        Self {
            available_balance,
            book,
            candles,
        }
    }

    /// Best (first) book rate, if the book is non-empty.
    pub fn best_rate(&self) -> Option<f64> {
        self.book.first().map(|e| e.daily_rate)
    }
}

// ── Account state ─────────────────────────────────────────────────────

/// A wallet row from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_type: String,
    pub currency: String,
    pub balance: f64,
    pub available: f64,
}

/// A pending (unmatched) funding offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingOffer {
    pub id: i64,
    pub symbol: String,
    pub amount: f64,
    pub daily_rate: f64,
    pub period: u32,
}

/// An active, already-matched loan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingCredit {
    pub id: i64,
    pub symbol: String,
    pub amount: f64,
    pub daily_rate: f64,
    pub period: u32,
    pub created_at_ms: i64,
    pub opened_at_ms: i64,
    pub status: String,
}

impl FundingCredit {
    /// Interest earned over the full period: `amount * rate * period`.
    pub fn expected_earnings(&self) -> f64 {
        self.amount * self.daily_rate * self.period as f64
    }
}

// ── Engine output ─────────────────────────────────────────────────────

/// An offer the engine wants placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanOfferDraft {
    pub amount: f64,
    /// Daily rate as a decimal fraction.
    pub daily_rate: f64,
    pub period_days: u32,
}

impl LoanOfferDraft {
    pub fn new(amount: f64, daily_rate: f64, period_days: u32) -> Self {
        Self {
            amount,
            daily_rate,
            period_days,
        }
    }
}
