//! Append-only JSONL journal of lending events, rotated daily.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use common::config::StrategyMode;
use common::LoanOfferDraft;
use serde::Serialize;
use tracing::warn;

pub const BOT_TRADE_DIR: &str = "lending-bot";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn resolve_repo_root() -> Option<PathBuf> {
    let mut cursor = std::env::current_dir().ok()?;
    loop {
        if cursor.join(".git").is_dir() {
            return Some(cursor);
        }
        if !cursor.pop() {
            return None;
        }
    }
}

/// `$TRADES_DIR/lending-bot`, else `<repo root>/TRADES/lending-bot`, else a relative path.
pub fn resolve_trades_dir() -> PathBuf {
    if let Ok(raw) = std::env::var("TRADES_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join(BOT_TRADE_DIR);
        }
    }
    if let Some(root) = resolve_repo_root() {
        return root.join("TRADES").join(BOT_TRADE_DIR);
    }
    PathBuf::from("TRADES").join(BOT_TRADE_DIR)
}

/// Offer fields shared by the per-offer events.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OfferFields {
    pub amount: f64,
    pub daily_rate: f64,
    pub period_days: u32,
}

impl From<&LoanOfferDraft> for OfferFields {
    fn from(draft: &LoanOfferDraft) -> Self {
        Self {
            amount: draft.amount,
            daily_rate: draft.daily_rate,
            period_days: draft.period_days,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    BotStart {
        run_mode: &'static str,
        test_mode: bool,
        currency: String,
        strategy: StrategyMode,
        order_limit: usize,
        min_loan: f64,
        max_loan: f64,
    },
    CycleSummary {
        strategy: StrategyMode,
        trigger: &'static str,
        cancelled_offers: usize,
        available: f64,
        lendable: f64,
        accepted: usize,
        rejected: usize,
        placed: usize,
        failed: usize,
        bonus_applied: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<String>,
    },
    OfferPlaced {
        #[serde(skip_serializing_if = "Option::is_none")]
        offer_id: Option<i64>,
        #[serde(flatten)]
        offer: OfferFields,
    },
    OfferSimulated {
        #[serde(flatten)]
        offer: OfferFields,
    },
    OfferRejected {
        #[serde(flatten)]
        offer: OfferFields,
        reason: String,
    },
    OfferFailed {
        #[serde(flatten)]
        offer: OfferFields,
        error: String,
    },
    RateAlert {
        peak_percent: f64,
        threshold_percent: f64,
    },
    CreditAlert {
        count: usize,
        total_amount: f64,
    },
    BotShutdown {
        reason: String,
    },
}

#[derive(Serialize)]
struct JournalLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a JournalEvent,
}

struct DayFile {
    day_key: String,
    file: File,
}

/// Shared across tasks behind an `Arc`; each write takes a short lock.
pub struct TradeJournal {
    dir: PathBuf,
    current: Mutex<DayFile>,
}

impl TradeJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self {
            dir,
            current: Mutex::new(DayFile { day_key, file }),
        })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("trades-{}.jsonl", day_key)))
    }

    /// Failures are logged and swallowed; the journal never stops a cycle.
    pub fn record(&self, event: JournalEvent) {
        let line = JournalLine {
            ts: now_iso(),
            event: &event,
        };
        let encoded = match serde_json::to_string(&line) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Trade journal encode failed: {}", e);
                return;
            }
        };

        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = (|| -> std::io::Result<()> {
            let today = Utc::now().format("%Y-%m-%d").to_string();
            if today != current.day_key {
                current.file = Self::open_day_file(&self.dir, &today)?;
                current.day_key = today;
            }
            writeln!(current.file, "{}", encoded)?;
            current.file.flush()
        })();

        if let Err(e) = result {
            warn!("Trade journal write failed: {}", e);
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
