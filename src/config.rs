//! Configuration loader: `.env`, optional TOML file, then environment overrides.

use common::config::{BotConfig, StrategyMode};
use common::Error;
use std::path::Path;
use tracing::{debug, warn};

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

/// Fold the legacy `enable_*_strategy` toggles into `strategy.mode`.
///
/// When neither toggle is present the configured mode stands.
fn resolve_strategy_mode(config: &mut BotConfig) {
    let smart = config.enable_smart_strategy.take();
    let kline = config.enable_kline_strategy.take();
    if smart.is_none() && kline.is_none() {
        return;
    }

    let smart = smart.unwrap_or(false);
    let kline = kline.unwrap_or(false);
    if smart && kline {
        warn!("Both enable_smart_strategy and enable_kline_strategy are set; kline takes priority");
    }
    config.strategy.mode = StrategyMode::from_flags(kline, smart);
}

/// Apply environment overrides through `lookup` so tests can supply a fake environment.
fn apply_env_overrides<F>(config: &mut BotConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("BITFINEX_API_KEY") {
        config.api_key = key;
    }
    if let Some(secret) = lookup("BITFINEX_SECRET_KEY") {
        config.secret_key = secret;
    }
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
        config.telegram.bot_token = token;
    }
    if let Some(token) = lookup("TELEGRAM_AUTH_TOKEN") {
        config.telegram.auth_token = token;
    }
    if let Some(currency) = lookup("CURRENCY") {
        let trimmed = currency.trim();
        if !trimmed.is_empty() {
            config.currency = trimmed.to_ascii_uppercase();
        }
    }
    if let Some(raw) = lookup("TEST_MODE") {
        config.test_mode = parse_bool(&raw);
    }
}

pub fn validate_config(config: &BotConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.api_key.trim().is_empty() {
        issues.push("BITFINEX_API_KEY is required".into());
    }
    if config.secret_key.trim().is_empty() {
        issues.push("BITFINEX_SECRET_KEY is required".into());
    }
    if config.currency.trim().is_empty() {
        issues.push("currency must not be empty".into());
    }

    let s = &config.strategy;
    if s.min_loan <= 0.0 {
        issues.push("strategy.min_loan must be > 0".into());
    }
    if s.max_loan < 0.0 {
        issues.push("strategy.max_loan must be >= 0".into());
    } else if s.max_loan > 0.0 && s.max_loan < s.min_loan {
        issues.push("strategy.max_loan must be 0 (no cap) or >= strategy.min_loan".into());
    }
    if s.min_daily_lend_rate <= 0.0 {
        issues.push("strategy.min_daily_lend_rate must be > 0".into());
    }
    if s.spread_lend <= 0 {
        issues.push("strategy.spread_lend must be > 0".into());
    }
    if s.gap_bottom < 0.0 {
        issues.push("strategy.gap_bottom must be >= 0".into());
    }
    if s.gap_bottom >= s.gap_top {
        issues.push("strategy.gap_bottom must be < strategy.gap_top".into());
    }
    if s.reserve_amount < 0.0 {
        issues.push("strategy.reserve_amount must be >= 0".into());
    }
    if s.high_hold_amount < 0.0 {
        issues.push("strategy.high_hold_amount must be >= 0".into());
    }

    match s.mode {
        StrategyMode::Smart => {
            let smart = &s.smart;
            if smart.volatility_threshold <= 0.0 || smart.volatility_threshold > 0.01 {
                issues.push("strategy.smart.volatility_threshold must be in (0, 0.01]".into());
            }
            if smart.max_rate_multiplier <= 1.0 || smart.max_rate_multiplier > 5.0 {
                issues.push("strategy.smart.max_rate_multiplier must be in (1, 5]".into());
            }
            if smart.min_rate_multiplier < 0.1 || smart.min_rate_multiplier >= 1.0 {
                issues.push("strategy.smart.min_rate_multiplier must be in [0.1, 1)".into());
            }
            if smart.min_rate_multiplier >= smart.max_rate_multiplier {
                issues.push(
                    "strategy.smart.min_rate_multiplier must be < strategy.smart.max_rate_multiplier"
                        .into(),
                );
            }
            if smart.rate_range_increase_percent <= 0.0 || smart.rate_range_increase_percent > 1.0
            {
                issues.push("strategy.smart.rate_range_increase_percent must be in (0, 1]".into());
            }
        }
        StrategyMode::Kline => {
            let kline = &s.kline;
            if kline.time_frame.trim().is_empty() {
                issues.push("strategy.kline.time_frame must not be empty".into());
            }
            if kline.period == 0 {
                issues.push("strategy.kline.period must be > 0".into());
            }
            if kline.spread_percent < 0.0 || kline.spread_percent > 100.0 {
                issues.push("strategy.kline.spread_percent must be in [0, 100]".into());
            }
        }
        StrategyMode::Traditional => {}
    }

    if config.notify.lending_check_minutes == 0 {
        issues.push("notify.lending_check_minutes must be > 0".into());
    }
    if config.notify.rate_threshold < 0.0 {
        issues.push("notify.rate_threshold must be >= 0".into());
    }
    if config.timing.minutes_run == 0 {
        issues.push("timing.minutes_run must be > 0".into());
    }
    if config.timing.rate_check_minute > 59 {
        issues.push("timing.rate_check_minute must be in [0, 59]".into());
    }
    if config.telegram.enabled() && config.telegram.auth_token.trim().is_empty() {
        issues.push("TELEGRAM_AUTH_TOKEN is required when the Telegram bot is enabled".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load bot configuration from the TOML file at `path` (if present) and the environment.
pub fn load_config(path: &Path) -> Result<BotConfig, Error> {
    // 1. Load .env file from the working directory or its parents.
    if let Err(e) = dotenvy::dotenv() {
        debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, then the config file if it exists.
    let mut config = BotConfig::default();
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
    } else {
        debug!("Config file {} not found, using defaults", path.display());
    }

    // 3. Environment variables win over the file.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    // 4. Legacy strategy toggles.
    resolve_strategy_mode(&mut config);

    // 5. Validate.
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> BotConfig {
        BotConfig {
            api_key: "key".into(),
            secret_key: "secret".into(),
            ..BotConfig::default()
        }
    }

    fn issues_of(config: &BotConfig) -> String {
        match validate_config(config) {
            Err(Error::Config(msg)) => msg,
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_with_credentials_are_valid() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_credentials_are_reported_together() {
        let msg = issues_of(&BotConfig::default());
        assert!(msg.contains("BITFINEX_API_KEY"), "{msg}");
        assert!(msg.contains("BITFINEX_SECRET_KEY"), "{msg}");
    }

    #[test]
    fn test_loan_bounds() {
        let mut cfg = valid_config();
        cfg.strategy.max_loan = 100.0;
        cfg.strategy.min_loan = 150.0;
        assert!(issues_of(&cfg).contains("max_loan"));

        cfg.strategy.max_loan = 0.0;
        assert!(validate_config(&cfg).is_ok(), "0 means no cap");

        cfg.strategy.min_loan = 0.0;
        assert!(issues_of(&cfg).contains("min_loan must be > 0"));
    }

    #[test]
    fn test_gap_ordering() {
        let mut cfg = valid_config();
        cfg.strategy.gap_bottom = 100.0;
        cfg.strategy.gap_top = 100.0;
        assert!(issues_of(&cfg).contains("gap_bottom must be < strategy.gap_top"));
    }

    #[test]
    fn test_smart_ranges_only_checked_when_smart_active() {
        let mut cfg = valid_config();
        cfg.strategy.smart.max_rate_multiplier = 10.0;
        assert!(validate_config(&cfg).is_ok());

        cfg.strategy.mode = StrategyMode::Smart;
        let msg = issues_of(&cfg);
        assert!(msg.contains("max_rate_multiplier must be in (1, 5]"), "{msg}");
    }

    #[test]
    fn test_smart_min_multiplier_must_stay_below_max() {
        let mut cfg = valid_config();
        cfg.strategy.mode = StrategyMode::Smart;
        cfg.strategy.smart.min_rate_multiplier = 0.9;
        cfg.strategy.smart.max_rate_multiplier = 1.0;
        let msg = issues_of(&cfg);
        assert!(msg.contains("must be < strategy.smart.max_rate_multiplier"), "{msg}");
    }

    #[test]
    fn test_kline_ranges() {
        let mut cfg = valid_config();
        cfg.strategy.mode = StrategyMode::Kline;
        cfg.strategy.kline.time_frame = " ".into();
        cfg.strategy.kline.period = 0;
        cfg.strategy.kline.spread_percent = 150.0;
        let msg = issues_of(&cfg);
        assert!(msg.contains("time_frame"), "{msg}");
        assert!(msg.contains("period must be > 0"), "{msg}");
        assert!(msg.contains("spread_percent"), "{msg}");
    }

    #[test]
    fn test_intervals_must_be_positive() {
        let mut cfg = valid_config();
        cfg.notify.lending_check_minutes = 0;
        cfg.timing.minutes_run = 0;
        let msg = issues_of(&cfg);
        assert!(msg.contains("lending_check_minutes"), "{msg}");
        assert!(msg.contains("minutes_run"), "{msg}");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BITFINEX_API_KEY", "env-key"),
            ("BITFINEX_SECRET_KEY", "env-secret"),
            ("CURRENCY", " ust "),
            ("TEST_MODE", "yes"),
            ("TELEGRAM_BOT_TOKEN", "bot"),
        ]
        .into_iter()
        .collect();

        let mut cfg = BotConfig::default();
        apply_env_overrides(&mut cfg, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.api_key, "env-key");
        assert_eq!(cfg.secret_key, "env-secret");
        assert_eq!(cfg.currency, "UST");
        assert!(cfg.test_mode);
        assert_eq!(cfg.telegram.bot_token, "bot");
        assert!(cfg.telegram.auth_token.is_empty());
    }

    #[test]
    fn test_test_mode_off_values() {
        for raw in ["0", "false", "No", "off"] {
            let mut cfg = BotConfig {
                test_mode: true,
                ..BotConfig::default()
            };
            apply_env_overrides(&mut cfg, |name| {
                (name == "TEST_MODE").then(|| raw.to_string())
            });
            assert!(!cfg.test_mode, "{raw} should disable test mode");
        }
    }

    #[test]
    fn test_legacy_toggles_resolve_by_priority() {
        let mut cfg = valid_config();
        cfg.enable_smart_strategy = Some(true);
        cfg.enable_kline_strategy = Some(true);
        resolve_strategy_mode(&mut cfg);
        assert_eq!(cfg.strategy.mode, StrategyMode::Kline);
        assert!(cfg.enable_smart_strategy.is_none());

        let mut cfg = valid_config();
        cfg.strategy.mode = StrategyMode::Kline;
        cfg.enable_smart_strategy = Some(true);
        resolve_strategy_mode(&mut cfg);
        assert_eq!(cfg.strategy.mode, StrategyMode::Smart);
    }

    #[test]
    fn test_mode_kept_without_legacy_toggles() {
        let mut cfg = valid_config();
        cfg.strategy.mode = StrategyMode::Smart;
        resolve_strategy_mode(&mut cfg);
        assert_eq!(cfg.strategy.mode, StrategyMode::Smart);
    }

    #[test]
    fn test_toml_document_parses() {
        let raw = r#"
            currency = "UST"
            enable_kline_strategy = true

            [strategy]
            min_loan = 200.0
            spread_lend = 5

            [strategy.kline]
            time_frame = "1h"
            smooth_method = "p90"

            [timing]
            minutes_run = 10
        "#;
        let mut cfg: BotConfig = toml::from_str(raw).unwrap();
        resolve_strategy_mode(&mut cfg);

        assert_eq!(cfg.currency, "UST");
        assert_eq!(cfg.strategy.mode, StrategyMode::Kline);
        assert_eq!(cfg.strategy.min_loan, 200.0);
        assert_eq!(cfg.strategy.spread_lend, 5);
        assert_eq!(cfg.strategy.kline.time_frame, "1h");
        assert_eq!(cfg.timing.minutes_run, 10);
        assert_eq!(cfg.strategy.order_limit, 3);
    }

    #[test]
    fn test_load_config_rejects_unparsable_file() {
        let path = std::env::temp_dir().join(format!(
            "lending-bot-bad-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "strategy = [").unwrap();
        let result = load_config(&path);
        let _ = std::fs::remove_file(&path);
        match result {
            Err(Error::Config(msg)) => assert!(msg.contains("Failed to parse"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
