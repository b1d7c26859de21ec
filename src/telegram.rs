//! Telegram control surface: long-polled commands and outbound notifications.
//!
//! Text is parsed once into [`Command`]; config setters are plain functions
//! over [`BotConfig`] so the range checks stay testable without a network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::config::{BotConfig, SmoothMethod, StrategyMode};
use common::Error;
use lending_strategy::rates::{daily_to_annual, decimal_to_percentage, validate_percentage_rate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cycle::{LendingService, Trigger};

const API_BASE_URL: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 60;
const RETRY_DELAY: Duration = Duration::from_secs(5);

const HELP_TEXT: &str = "Available commands:
/rate - current lending rate and alert threshold
/check - check the last hour's peak rate against the threshold
/status - current settings
/threshold <percent> - rate alert threshold
/reserve <amount> - amount kept out of lending
/orderlimit <n> - max offers per cycle (0 = unlimited)
/minloan <amount> - smallest offer
/maxloan <amount> - largest offer (0 = no cap)
/mindailylendrate <percent> - floor for every offer rate
/highholdrate <percent> - high-hold daily rate
/highholdamount <amount> - high-hold offer size (0 disables)
/highholdorders <n> - number of high-hold offers
/raterangeincrease <percent> - per-step rate increase (0-100)
/strategy - active strategy and its parameters
/smartstrategy on|off - toggle the smart strategy
/klinestrategy on|off - toggle the kline strategy
/smooth <max|sma|ema|hla|p90> - kline smoothing method
/lending - active lending credits
/restart - cancel all offers and run a lending cycle now
/help - this message";

// ── Commands ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Auth,
    Restart,
    Rate,
    Check,
    Status,
    Threshold(f64),
    Reserve(f64),
    OrderLimit(usize),
    MinLoan(f64),
    MaxLoan(f64),
    MinDailyLendRate(f64),
    HighHoldRate(f64),
    HighHoldAmount(f64),
    HighHoldOrders(i64),
    RateRangeIncrease(f64),
    Strategy,
    SmartStrategy(bool),
    KlineStrategy(bool),
    Smooth(SmoothMethod),
    Lending,
}

impl Command {
    /// Parse a chat message. `Err` carries the reply for malformed input.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut parts = text.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        // "/cmd@BotName" is how group chats address a specific bot.
        let name = head
            .strip_prefix('/')
            .map(|rest| rest.split('@').next().unwrap_or(rest))
            .ok_or_else(unknown_command)?
            .to_ascii_lowercase();

        let command = match name.as_str() {
            "help" | "start" => Command::Help,
            "auth" => Command::Auth,
            "restart" => Command::Restart,
            "rate" => Command::Rate,
            "check" => Command::Check,
            "status" => Command::Status,
            "strategy" => Command::Strategy,
            "lending" => Command::Lending,
            "threshold" => Command::Threshold(single_arg(&name, &args)?),
            "reserve" => Command::Reserve(single_arg(&name, &args)?),
            "orderlimit" => Command::OrderLimit(single_arg(&name, &args)?),
            "minloan" => Command::MinLoan(single_arg(&name, &args)?),
            "maxloan" => Command::MaxLoan(single_arg(&name, &args)?),
            "mindailylendrate" => Command::MinDailyLendRate(single_arg(&name, &args)?),
            "highholdrate" => Command::HighHoldRate(single_arg(&name, &args)?),
            "highholdamount" => Command::HighHoldAmount(single_arg(&name, &args)?),
            "highholdorders" => Command::HighHoldOrders(single_arg(&name, &args)?),
            "raterangeincrease" => Command::RateRangeIncrease(single_arg(&name, &args)?),
            "smartstrategy" => Command::SmartStrategy(on_off(&name, &args)?),
            "klinestrategy" => Command::KlineStrategy(on_off(&name, &args)?),
            "smooth" => {
                let raw: String = single_arg(&name, &args)?;
                Command::Smooth(raw.parse().map_err(|e: Error| e.to_string())?)
            }
            _ => return Err(unknown_command()),
        };
        Ok(command)
    }
}

fn unknown_command() -> String {
    "Unknown command, send /help for the list".to_string()
}

fn single_arg<T: std::str::FromStr>(name: &str, args: &[&str]) -> Result<T, String> {
    match args {
        [value] => value
            .parse::<T>()
            .map_err(|_| format!("Invalid value {value:?} for /{name}")),
        _ => Err(format!("Usage: /{name} <value>")),
    }
}

fn on_off(name: &str, args: &[&str]) -> Result<bool, String> {
    match args {
        [flag] if flag.eq_ignore_ascii_case("on") => Ok(true),
        [flag] if flag.eq_ignore_ascii_case("off") => Ok(false),
        _ => Err(format!("Usage: /{name} on|off")),
    }
}

// ── Setters ───────────────────────────────────────────────────────────

/// Apply a setter command to the runtime config.
///
/// `Ok` carries the confirmation, `Err` the rejection; the config is only
/// touched on `Ok`. Non-setter commands return `None`.
pub fn apply_setting(cfg: &mut BotConfig, command: &Command) -> Option<Result<String, String>> {
    let ccy = cfg.currency.clone();
    let s = &mut cfg.strategy;
    let outcome = match *command {
        Command::Threshold(value) => {
            if value <= 0.0 {
                Err("Threshold must be a positive percentage".to_string())
            } else {
                cfg.notify.rate_threshold = value;
                Ok(format!("Rate alert threshold set to {value:.4}%"))
            }
        }
        Command::Reserve(value) => {
            if value < 0.0 {
                Err("Reserve must be >= 0".to_string())
            } else {
                s.reserve_amount = value;
                Ok(format!("Reserve amount set to {value:.2} {ccy}"))
            }
        }
        Command::OrderLimit(value) => {
            s.order_limit = value;
            if value == 0 {
                Ok("Order limit removed (unlimited)".to_string())
            } else {
                Ok(format!("Order limit set to {value}"))
            }
        }
        Command::MinLoan(value) => {
            if value <= 0.0 {
                Err("Min loan must be positive".to_string())
            } else if s.max_loan > 0.0 && value > s.max_loan {
                Err(format!("Min loan cannot exceed max loan ({:.2})", s.max_loan))
            } else {
                s.min_loan = value;
                Ok(format!("Min loan set to {value:.2} {ccy}"))
            }
        }
        Command::MaxLoan(value) => {
            if value < 0.0 {
                Err("Max loan must be >= 0".to_string())
            } else if value > 0.0 && value < s.min_loan {
                Err(format!("Max loan cannot be below min loan ({:.2})", s.min_loan))
            } else {
                s.max_loan = value;
                if value == 0.0 {
                    Ok("Max loan cap removed".to_string())
                } else {
                    Ok(format!("Max loan set to {value:.2} {ccy}"))
                }
            }
        }
        Command::MinDailyLendRate(value) => {
            if !validate_percentage_rate(value) {
                Err("Rate must be in (0, 7]%".to_string())
            } else {
                s.min_daily_lend_rate = value;
                Ok(format!("Min daily lend rate set to {value:.4}%"))
            }
        }
        Command::HighHoldRate(value) => {
            if !validate_percentage_rate(value) {
                Err("Rate must be in (0, 7]%".to_string())
            } else {
                s.high_hold_rate = value;
                Ok(format!("High-hold rate set to {value:.4}%"))
            }
        }
        Command::HighHoldAmount(value) => {
            if value < 0.0 {
                Err("High-hold amount must be >= 0 (0 disables)".to_string())
            } else {
                s.high_hold_amount = value;
                if value == 0.0 {
                    Ok("High-hold disabled".to_string())
                } else {
                    Ok(format!("High-hold amount set to {value:.2} {ccy}"))
                }
            }
        }
        Command::HighHoldOrders(value) => {
            if value < 1 {
                Err("High-hold orders must be >= 1".to_string())
            } else {
                s.high_hold_orders = value;
                Ok(format!("High-hold orders set to {value}"))
            }
        }
        Command::RateRangeIncrease(percent) => {
            if percent <= 0.0 || percent > 100.0 {
                Err("Rate range increase must be in (0, 100]%".to_string())
            } else {
                let fraction = percent / 100.0;
                s.smart.rate_range_increase_percent = fraction;
                Ok(format!(
                    "Rate range increase set to {percent:.2}% ({fraction:.4})"
                ))
            }
        }
        Command::SmartStrategy(on) => Ok(toggle_mode(&mut s.mode, StrategyMode::Smart, on)),
        Command::KlineStrategy(on) => Ok(toggle_mode(&mut s.mode, StrategyMode::Kline, on)),
        Command::Smooth(method) => {
            s.kline.smooth_method = method;
            Ok(format!(
                "Smoothing method set to {} ({})",
                method,
                method.description()
            ))
        }
        _ => return None,
    };
    Some(outcome)
}

/// Enabling selects `target`; disabling falls back to traditional only when
/// `target` is the active mode.
fn toggle_mode(mode: &mut StrategyMode, target: StrategyMode, on: bool) -> String {
    if on {
        *mode = target;
        format!("{target} strategy enabled")
    } else if *mode == target {
        *mode = StrategyMode::Traditional;
        format!("{target} strategy disabled, using traditional")
    } else {
        format!("{target} strategy already inactive (active: {mode})")
    }
}

pub fn format_status(cfg: &BotConfig) -> String {
    let s = &cfg.strategy;
    let ccy = &cfg.currency;
    let mut lines = vec![
        format!("Currency: {ccy}"),
        format!("Strategy: {}", s.mode),
        format!("Test mode: {}", cfg.test_mode),
        format!("Min loan: {:.2} {ccy}", s.min_loan),
    ];
    if s.max_loan > 0.0 {
        lines.push(format!("Max loan: {:.2} {ccy}", s.max_loan));
    } else {
        lines.push("Max loan: no cap".to_string());
    }
    if s.reserve_amount > 0.0 {
        lines.push(format!("Reserve: {:.2} {ccy}", s.reserve_amount));
    }
    lines.push(format!(
        "Order limit: {}",
        if s.order_limit == 0 {
            "unlimited".to_string()
        } else {
            s.order_limit.to_string()
        }
    ));
    lines.push(format!("Min daily lend rate: {:.4}%", s.min_daily_lend_rate));
    lines.push(format!("Spread offers: {}", s.spread_lend));
    lines.push(format!("Rate bonus: {:.4}%", s.rate_bonus));
    if s.high_hold_amount > 0.0 {
        lines.push(format!(
            "High-hold: {} x {:.2} {ccy} at {:.4}%",
            s.high_hold_orders, s.high_hold_amount, s.high_hold_rate
        ));
    }
    lines.push(format!(
        "Rate alert threshold: {:.4}%",
        cfg.notify.rate_threshold
    ));
    lines.push(format!("Cycle interval: {} min", cfg.timing.minutes_run));
    lines.join("\n")
}

pub fn format_strategy(cfg: &BotConfig) -> String {
    let s = &cfg.strategy;
    let mut lines = vec![format!("Active strategy: {}", s.mode)];
    match s.mode {
        StrategyMode::Traditional => {
            lines.push(format!(
                "Depth ladder: gap {:.0} to {:.0}, {} offers",
                s.gap_bottom, s.gap_top, s.spread_lend
            ));
        }
        StrategyMode::Smart => {
            lines.push(format!(
                "Volatility threshold: {:.4}",
                s.smart.volatility_threshold
            ));
            lines.push(format!(
                "Rate multipliers: {:.2} to {:.2}",
                s.smart.min_rate_multiplier, s.smart.max_rate_multiplier
            ));
            lines.push(format!(
                "Rate range increase: {:.2}%",
                s.smart.rate_range_increase_percent * 100.0
            ));
        }
        StrategyMode::Kline => {
            lines.push(format!(
                "Candles: {} x {}",
                s.kline.period, s.kline.time_frame
            ));
            lines.push(format!(
                "Smoothing: {} ({})",
                s.kline.smooth_method,
                s.kline.smooth_method.description()
            ));
            lines.push(format!("Spread mark-up: {:.2}%", s.kline.spread_percent));
            lines.push(format!(
                "Step increase: {:.2}%",
                s.smart.rate_range_increase_percent * 100.0
            ));
        }
    }
    lines.push(format!(
        "Periods: {}d / {}d (>= {:.4}%) / {}d (>= {:.4}%)",
        s.periods.short_days,
        s.periods.mid_days,
        s.thirty_day_lend_rate_threshold,
        s.periods.long_days,
        s.one_twenty_day_lend_rate_threshold
    ));
    lines.join("\n")
}

// ── Session ───────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum AuthOutcome {
    Prompted,
    Accepted,
    Denied,
}

/// The single chat allowed to issue commands.
#[derive(Debug)]
pub struct TelegramSession {
    auth_token: String,
    chat_id: Option<i64>,
}

impl TelegramSession {
    pub fn new(auth_token: &str) -> Self {
        Self {
            auth_token: auth_token.trim().to_string(),
            chat_id: None,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat_id
    }

    pub fn is_authenticated(&self, chat_id: i64) -> bool {
        self.chat_id == Some(chat_id)
    }

    /// A later successful auth moves the session to the new chat.
    pub fn authenticate(&mut self, chat_id: i64, text: &str) -> AuthOutcome {
        let text = text.trim();
        if matches!(Command::parse(text), Ok(Command::Auth)) {
            AuthOutcome::Prompted
        } else if !self.auth_token.is_empty() && text == self.auth_token {
            self.chat_id = Some(chat_id);
            AuthOutcome::Accepted
        } else {
            AuthOutcome::Denied
        }
    }
}

// ── Bot API transport ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 15))
            .build()
            .map_err(|e| Error::Telegram(format!("failed to build reqwest client: {e}")))?;
        Ok(Self {
            client,
            base: format!("{API_BASE_URL}/bot{}", bot_token.trim()),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, Error> {
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            // reqwest errors embed the URL, which carries the bot token.
            .map_err(|e| Error::Telegram(format!("{method} request failed: {}", e.without_url())))?;

        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| Error::Telegram(format!("{method} decode failed: {}", e.without_url())))?;
        if !parsed.ok {
            return Err(Error::Telegram(format!(
                "{method}: {}",
                parsed.description.unwrap_or_else(|| "unknown error".into())
            )));
        }
        parsed
            .result
            .ok_or_else(|| Error::Telegram(format!("{method}: empty result")))
    }

    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, Error> {
        self.call(
            "getUpdates",
            &json!({ "offset": offset, "timeout": LONG_POLL_SECS, "allowed_updates": ["message"] }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), Error> {
        let _: serde_json::Value = self
            .call("sendMessage", &json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }
}

// ── Bot ───────────────────────────────────────────────────────────────

pub struct TelegramBot {
    client: TelegramClient,
    session: Mutex<TelegramSession>,
}

impl TelegramBot {
    pub fn new(bot_token: &str, auth_token: &str) -> Result<Self, Error> {
        Ok(Self {
            client: TelegramClient::new(bot_token)?,
            session: Mutex::new(TelegramSession::new(auth_token)),
        })
    }

    fn session(&self) -> std::sync::MutexGuard<'_, TelegramSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send to the authenticated chat; dropped with a debug log when no
    /// chat has authenticated yet.
    pub async fn notify(&self, text: &str) {
        let chat_id = self.session().chat_id();
        let Some(chat_id) = chat_id else {
            debug!("No authenticated Telegram chat; notification dropped");
            return;
        };
        if let Err(e) = self.client.send_message(chat_id, text).await {
            warn!("Telegram notification failed: {}", e);
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text).await {
            warn!("Telegram reply failed: {}", e);
        }
    }

    /// Long-poll loop; runs until the task is dropped.
    pub async fn run(self: Arc<Self>, service: Arc<LendingService>) {
        info!("Telegram poller started");
        let mut offset = 0i64;
        loop {
            let updates = match self.client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("Telegram getUpdates failed, retrying in {:?}: {}", RETRY_DELAY, e);
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                self.handle_message(&service, message.chat.id, &text).await;
            }
        }
    }

    async fn handle_message(&self, service: &Arc<LendingService>, chat_id: i64, text: &str) {
        let authenticated = self.session().is_authenticated(chat_id);
        if !authenticated {
            let outcome = self.session().authenticate(chat_id, text);
            let reply = match outcome {
                AuthOutcome::Prompted => "Send the auth token",
                AuthOutcome::Accepted => {
                    info!("Telegram chat {} authenticated", chat_id);
                    "Authenticated, commands are now accepted"
                }
                AuthOutcome::Denied => "Not authenticated, send /auth to begin",
            };
            self.reply(chat_id, reply).await;
            return;
        }

        let reply = match Command::parse(text) {
            Ok(command) => self.execute(service, command).await,
            Err(usage) => usage,
        };
        self.reply(chat_id, &reply).await;
    }

    async fn execute(&self, service: &Arc<LendingService>, command: Command) -> String {
        debug!("Telegram command: {:?}", command);
        {
            let mut cfg = service.config().write().await;
            if let Some(outcome) = apply_setting(&mut cfg, &command) {
                return match outcome {
                    Ok(msg) => {
                        info!("Runtime config changed via Telegram: {}", msg);
                        msg
                    }
                    Err(msg) => msg,
                };
            }
        }

        match command {
            Command::Help => HELP_TEXT.to_string(),
            Command::Auth => "Already authenticated".to_string(),
            Command::Status => format_status(&*service.config().read().await),
            Command::Strategy => format_strategy(&*service.config().read().await),
            Command::Rate => match service.current_rate().await {
                Ok(rate) => {
                    let pct = decimal_to_percentage(rate);
                    let threshold = service.config().read().await.notify.rate_threshold;
                    format!(
                        "Current rate: {pct:.4}% per day ({:.2}% annualized)\nAlert threshold: {threshold:.4}%",
                        daily_to_annual(pct)
                    )
                }
                Err(e) => format!("Failed to fetch the current rate: {e}"),
            },
            Command::Check => match service.check_rate(false).await {
                Ok(check) if check.exceeded => format!(
                    "Peak rate {:.4}% is above the threshold {:.4}%",
                    check.peak_percent, check.threshold_percent
                ),
                Ok(check) => format!(
                    "Peak rate {:.4}% is within the threshold {:.4}%",
                    check.peak_percent, check.threshold_percent
                ),
                Err(e) => format!("Rate check failed: {e}"),
            },
            Command::Lending => match service.active_credits_summary().await {
                Ok(summary) => summary,
                Err(e) => format!("Failed to fetch credits: {e}"),
            },
            Command::Restart => {
                let service = Arc::clone(service);
                tokio::spawn(async move {
                    let outcome = service.run_lending_cycle(Trigger::Manual).await;
                    let msg = match outcome {
                        Ok(report) => format!("Restart complete: {}", report.describe()),
                        Err(e) => format!("Restart failed: {e}"),
                    };
                    service.notify(&msg).await;
                });
                "Restarting: cancelling offers and running a lending cycle".to_string()
            }
            _ => unknown_command(),
        }
    }
}
