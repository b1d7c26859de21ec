//! Bot configuration types.
//!
//! Rates that users type in (minimum daily rate, thresholds, high-hold rate,
//! bonus, notification threshold) are stored as percentages, the same unit
//! the exchange UI shows. The accessors below hand out decimal fractions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

const PERCENT_SCALE: f64 = 100.0;

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bitfinex API key.
    #[serde(default)]
    pub api_key: String,

    /// Bitfinex API secret.
    #[serde(default)]
    pub secret_key: String,

    /// Lending currency (e.g. "USD", "UST").
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Simulated placement: offers are logged, never submitted.
    #[serde(default)]
    pub test_mode: bool,

    /// Allocation parameters.
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Notification parameters.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Scheduling parameters.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Telegram bot credentials.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Legacy toggle; resolved into `strategy.mode` by the loader.
    #[serde(default, skip_serializing)]
    pub enable_smart_strategy: Option<bool>,

    /// Legacy toggle; resolved into `strategy.mode` by the loader.
    #[serde(default, skip_serializing)]
    pub enable_kline_strategy: Option<bool>,
}

impl BotConfig {
    /// Funding symbol for the configured currency, e.g. `fUSD`.
    pub fn funding_symbol(&self) -> String {
        format!("f{}", self.currency.to_uppercase())
    }
}

/// Which allocator runs the spread leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    #[default]
    Traditional,
    Smart,
    Kline,
}

impl StrategyMode {
    /// Resolve independent toggles by priority: Kline > Smart > Traditional.
    pub fn from_flags(kline_enabled: bool, smart_enabled: bool) -> Self {
        if kline_enabled {
            StrategyMode::Kline
        } else if smart_enabled {
            StrategyMode::Smart
        } else {
            StrategyMode::Traditional
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::Traditional => "traditional",
            StrategyMode::Smart => "smart",
            StrategyMode::Kline => "kline",
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle-series reduction used by the kline strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothMethod {
    /// Highest high.
    Max,
    /// Mean of closes.
    Sma,
    /// Exponential average of highs.
    #[default]
    Ema,
    /// Mean of the high and low averages.
    Hla,
    /// 90th percentile of highs.
    P90,
}

impl SmoothMethod {
    pub const ALL: [SmoothMethod; 5] = [
        SmoothMethod::Max,
        SmoothMethod::Sma,
        SmoothMethod::Ema,
        SmoothMethod::Hla,
        SmoothMethod::P90,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SmoothMethod::Max => "max",
            SmoothMethod::Sma => "sma",
            SmoothMethod::Ema => "ema",
            SmoothMethod::Hla => "hla",
            SmoothMethod::P90 => "p90",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SmoothMethod::Max => "highest high (most aggressive)",
            SmoothMethod::Sma => "simple average of closes (most conservative)",
            SmoothMethod::Ema => "exponential average of highs (balanced)",
            SmoothMethod::Hla => "average of mean high and mean low",
            SmoothMethod::P90 => "90th percentile of highs (ignores spikes)",
        }
    }
}

impl fmt::Display for SmoothMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmoothMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        SmoothMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| {
                Error::Config(format!(
                    "smooth method must be one of: max, sma, ema, hla, p90 (got {s:?})"
                ))
            })
    }
}

/// Allocation parameters consumed by the strategy engine.
///
/// The engine treats this as already validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Active allocator.
    #[serde(default)]
    pub mode: StrategyMode,

    /// Max offers placed per cycle (0 = unlimited).
    #[serde(default = "default_order_limit")]
    pub order_limit: usize,

    /// Smallest offer amount.
    #[serde(default = "default_min_loan")]
    pub min_loan: f64,

    /// Largest offer amount (0 = no cap).
    #[serde(default)]
    pub max_loan: f64,

    /// Floor for every offer rate, in percent per day.
    #[serde(default = "default_min_daily_lend_rate")]
    pub min_daily_lend_rate: f64,

    /// Number of spread offers.
    #[serde(default = "default_spread_lend")]
    pub spread_lend: i64,

    /// First book depth index sampled by the traditional ladder.
    #[serde(default = "default_gap_bottom")]
    pub gap_bottom: f64,

    /// Last book depth index sampled by the traditional ladder.
    #[serde(default = "default_gap_top")]
    pub gap_top: f64,

    /// Percent rate at which offers switch to the mid period (0 disables).
    #[serde(default)]
    pub thirty_day_lend_rate_threshold: f64,

    /// Percent rate at which offers switch to the long period (0 disables).
    #[serde(default)]
    pub one_twenty_day_lend_rate_threshold: f64,

    /// Percent added to every rate when no offers were pending.
    #[serde(default)]
    pub rate_bonus: f64,

    /// Amount kept out of lending.
    #[serde(default)]
    pub reserve_amount: f64,

    /// High-hold rate in percent per day.
    #[serde(default)]
    pub high_hold_rate: f64,

    /// High-hold offer size (must exceed `min_loan` to activate).
    #[serde(default)]
    pub high_hold_amount: f64,

    /// Number of high-hold offers.
    #[serde(default = "default_high_hold_orders")]
    pub high_hold_orders: i64,

    /// Offer period tiers.
    #[serde(default)]
    pub periods: PeriodConfig,

    /// Smart strategy parameters.
    #[serde(default)]
    pub smart: SmartConfig,

    /// Kline strategy parameters.
    #[serde(default)]
    pub kline: KlineConfig,
}

impl StrategyConfig {
    pub fn min_daily_rate(&self) -> f64 {
        self.min_daily_lend_rate / PERCENT_SCALE
    }

    pub fn high_hold_rate_decimal(&self) -> f64 {
        self.high_hold_rate / PERCENT_SCALE
    }

    pub fn thirty_day_threshold(&self) -> f64 {
        self.thirty_day_lend_rate_threshold / PERCENT_SCALE
    }

    pub fn one_twenty_day_threshold(&self) -> f64 {
        self.one_twenty_day_lend_rate_threshold / PERCENT_SCALE
    }

    pub fn rate_bonus_decimal(&self) -> f64 {
        self.rate_bonus / PERCENT_SCALE
    }
}

/// Offer period tiers in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    #[serde(default = "default_short_days")]
    pub short_days: u32,
    #[serde(default = "default_mid_days")]
    pub mid_days: u32,
    #[serde(default = "default_long_days")]
    pub long_days: u32,
}

/// Smart strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartConfig {
    /// Rate std-dev (decimal) above which the market counts as volatile.
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,

    #[serde(default = "default_max_rate_multiplier")]
    pub max_rate_multiplier: f64,

    #[serde(default = "default_min_rate_multiplier")]
    pub min_rate_multiplier: f64,

    /// Per-step rate increase as a fraction (0.1 = +10% per offer).
    #[serde(default = "default_rate_range_increase")]
    pub rate_range_increase_percent: f64,
}

/// Kline strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineConfig {
    /// Candle timeframe, e.g. "15m".
    #[serde(default = "default_kline_time_frame")]
    pub time_frame: String,

    /// Number of candles fetched.
    #[serde(default = "default_kline_period")]
    pub period: u32,

    /// Percent mark-up applied to the smoothed rate.
    #[serde(default)]
    pub spread_percent: f64,

    #[serde(default)]
    pub smooth_method: SmoothMethod,
}

/// Notification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Alert when the recent high exceeds this percent per day.
    #[serde(default)]
    pub rate_threshold: f64,

    /// Interval between new-credit checks.
    #[serde(default = "default_lending_check_minutes")]
    pub lending_check_minutes: u64,
}

/// Scheduling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between lending cycles.
    #[serde(default = "default_minutes_run")]
    pub minutes_run: u64,

    /// Wait after cancelling offers before reading the balance.
    #[serde(default = "default_cancel_settle_secs")]
    pub cancel_settle_secs: u64,

    /// Minute past each hour at which the rate check runs.
    #[serde(default = "default_rate_check_minute")]
    pub rate_check_minute: u32,
}

/// Telegram bot credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    /// Token a chat must send before commands are accepted.
    #[serde(default)]
    pub auth_token: String,
}

impl TelegramConfig {
    pub fn enabled(&self) -> bool {
        !self.bot_token.trim().is_empty()
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_currency() -> String {
    "USD".into()
}
fn default_order_limit() -> usize {
    3
}
fn default_min_loan() -> f64 {
    150.0
}
fn default_min_daily_lend_rate() -> f64 {
    0.02
}
fn default_spread_lend() -> i64 {
    3
}
fn default_gap_bottom() -> f64 {
    10.0
}
fn default_gap_top() -> f64 {
    100.0
}
fn default_high_hold_orders() -> i64 {
    1
}
fn default_short_days() -> u32 {
    2
}
fn default_mid_days() -> u32 {
    30
}
fn default_long_days() -> u32 {
    120
}
fn default_volatility_threshold() -> f64 {
    0.002
}
fn default_max_rate_multiplier() -> f64 {
    2.0
}
fn default_min_rate_multiplier() -> f64 {
    0.8
}
fn default_rate_range_increase() -> f64 {
    0.1
}
fn default_kline_time_frame() -> String {
    "15m".into()
}
fn default_kline_period() -> u32 {
    24
}
fn default_lending_check_minutes() -> u64 {
    10
}
fn default_minutes_run() -> u64 {
    15
}
fn default_cancel_settle_secs() -> u64 {
    5
}
fn default_rate_check_minute() -> u32 {
    6
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            short_days: default_short_days(),
            mid_days: default_mid_days(),
            long_days: default_long_days(),
        }
    }
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: default_volatility_threshold(),
            max_rate_multiplier: default_max_rate_multiplier(),
            min_rate_multiplier: default_min_rate_multiplier(),
            rate_range_increase_percent: default_rate_range_increase(),
        }
    }
}

impl Default for KlineConfig {
    fn default() -> Self {
        Self {
            time_frame: default_kline_time_frame(),
            period: default_kline_period(),
            spread_percent: 0.0,
            smooth_method: SmoothMethod::default(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            rate_threshold: 0.0,
            lending_check_minutes: default_lending_check_minutes(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            minutes_run: default_minutes_run(),
            cancel_settle_secs: default_cancel_settle_secs(),
            rate_check_minute: default_rate_check_minute(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: StrategyMode::default(),
            order_limit: default_order_limit(),
            min_loan: default_min_loan(),
            max_loan: 0.0,
            min_daily_lend_rate: default_min_daily_lend_rate(),
            spread_lend: default_spread_lend(),
            gap_bottom: default_gap_bottom(),
            gap_top: default_gap_top(),
            thirty_day_lend_rate_threshold: 0.0,
            one_twenty_day_lend_rate_threshold: 0.0,
            rate_bonus: 0.0,
            reserve_amount: 0.0,
            high_hold_rate: 0.0,
            high_hold_amount: 0.0,
            high_hold_orders: default_high_hold_orders(),
            periods: PeriodConfig::default(),
            smart: SmartConfig::default(),
            kline: KlineConfig::default(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            currency: default_currency(),
            test_mode: false,
            strategy: StrategyConfig::default(),
            notify: NotifyConfig::default(),
            timing: TimingConfig::default(),
            telegram: TelegramConfig::default(),
            enable_smart_strategy: None,
            enable_kline_strategy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_mode_priority() {
        assert_eq!(StrategyMode::from_flags(true, true), StrategyMode::Kline);
        assert_eq!(StrategyMode::from_flags(false, true), StrategyMode::Smart);
        assert_eq!(StrategyMode::from_flags(false, false), StrategyMode::Traditional);
    }

    #[test]
    fn test_smooth_method_parse() {
        assert_eq!("P90".parse::<SmoothMethod>().unwrap(), SmoothMethod::P90);
        assert_eq!(" hla ".parse::<SmoothMethod>().unwrap(), SmoothMethod::Hla);
        assert!("median".parse::<SmoothMethod>().is_err());
    }

    #[test]
    fn test_percent_accessors() {
        let cfg = StrategyConfig {
            min_daily_lend_rate: 0.02,
            high_hold_rate: 0.1,
            rate_bonus: 0.005,
            ..StrategyConfig::default()
        };
        assert!((cfg.min_daily_rate() - 0.0002).abs() < 1e-12);
        assert!((cfg.high_hold_rate_decimal() - 0.001).abs() < 1e-12);
        assert!((cfg.rate_bonus_decimal() - 0.00005).abs() < 1e-12);
    }

    #[test]
    fn test_nested_defaults_and_enums() {
        let cfg: BotConfig = serde_json::from_value(serde_json::json!({
            "currency": "ust",
            "strategy": {
                "mode": "smart",
                "min_loan": 200.0,
                "kline": { "smooth_method": "p90" }
            }
        }))
        .unwrap();
        assert_eq!(cfg.strategy.mode, StrategyMode::Smart);
        assert_eq!(cfg.strategy.kline.smooth_method, SmoothMethod::P90);
        assert_eq!(cfg.strategy.kline.time_frame, "15m");
        assert_eq!(cfg.strategy.periods.long_days, 120);
        assert_eq!(cfg.strategy.min_loan, 200.0);
        assert_eq!(cfg.funding_symbol(), "fUST");
    }
}
