//! Lending Bot Entry Point.
//!
//! Orchestrates the tasks:
//! 1. Lending cycle (every `minutes_run`)
//! 2. Rate-threshold check (hourly)
//! 3. New-credit check (every `lending_check_minutes`)
//! 4. Telegram command poller (optional)

mod config;
mod cycle;
mod journal;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bitfinex_client::{BitfinexAuth, BitfinexRestClient};
use chrono::Utc;
use clap::Parser;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::load_config;
use crate::cycle::{until_minute_mark, LendingService, Trigger};
use crate::journal::{resolve_trades_dir, JournalEvent, TradeJournal};
use crate::telegram::TelegramBot;

#[derive(Parser)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run one simulated cycle and exit.
    #[arg(long)]
    dry_run: bool,

    /// Fetch the funding balance and exit.
    #[arg(long)]
    check_auth: bool,

    /// Keep running but only simulate offer placement.
    #[arg(long)]
    test_mode: bool,
}

async fn lending_loop(service: Arc<LendingService>) {
    let mut trigger = Trigger::Startup;
    loop {
        if let Err(e) = service.run_lending_cycle(trigger).await {
            error!("Lending cycle failed: {}", e);
        }
        trigger = Trigger::Schedule;

        let minutes = service.config().read().await.timing.minutes_run.max(1);
        sleep(Duration::from_secs(minutes * 60)).await;
    }
}

async fn rate_check_loop(service: Arc<LendingService>) {
    loop {
        let minute = service.config().read().await.timing.rate_check_minute;
        sleep(until_minute_mark(Utc::now(), minute)).await;

        if let Err(e) = service.check_rate(true).await {
            warn!("Rate check failed: {}", e);
        }
    }
}

async fn credit_check_loop(service: Arc<LendingService>) {
    loop {
        if let Err(e) = service.check_new_credits().await {
            warn!("Credit check failed: {}", e);
        }

        let minutes = service
            .config()
            .read()
            .await
            .notify
            .lending_check_minutes
            .max(1);
        sleep(Duration::from_secs(minutes * 60)).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lending_bot=info,lending_strategy=info,bitfinex_client=info".into()
            }),
        )
        .init();

    info!("Lending Bot starting...");

    let cli = Cli::parse();
    let mut cfg = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("Config error: {}", e);
            return;
        }
    };
    if cli.test_mode {
        cfg.test_mode = true;
    }
    if cli.dry_run {
        info!("Dry-run mode: one simulated cycle, then exit.");
    }
    info!(
        "Lending {} ({}) with {} strategy, min_loan={} max_loan={} order_limit={} test_mode={}",
        cfg.currency,
        cfg.funding_symbol(),
        cfg.strategy.mode,
        cfg.strategy.min_loan,
        cfg.strategy.max_loan,
        cfg.strategy.order_limit,
        cfg.test_mode
    );

    let trade_journal = match TradeJournal::open(resolve_trades_dir()) {
        Ok(journal) => Arc::new(journal),
        Err(e) => {
            error!("Failed to initialize trade journal: {}", e);
            return;
        }
    };
    info!("Trade journal path: {}", trade_journal.dir().display());
    trade_journal.record(JournalEvent::BotStart {
        run_mode: if cli.dry_run { "dry_run" } else { "live" },
        test_mode: cfg.test_mode,
        currency: cfg.currency.clone(),
        strategy: cfg.strategy.mode,
        order_limit: cfg.strategy.order_limit,
        min_loan: cfg.strategy.min_loan,
        max_loan: cfg.strategy.max_loan,
    });

    let auth = match BitfinexAuth::new(&cfg.api_key, &cfg.secret_key) {
        Ok(a) => a,
        Err(e) => {
            error!("Auth init failed: {}", e);
            return;
        }
    };
    let rest_client = match BitfinexRestClient::new(auth) {
        Ok(c) => c,
        Err(e) => {
            error!("REST client init failed: {}", e);
            return;
        }
    };

    // Auth check.
    if cli.check_auth {
        match rest_client.get_funding_balance(&cfg.currency).await {
            Ok(balance) => info!("Auth valid. Funding balance: {:.2} {}", balance, cfg.currency),
            Err(e) => error!("Auth failed: {}", e),
        }
        return;
    }

    let telegram = if cfg.telegram.enabled() && !cli.dry_run {
        match TelegramBot::new(&cfg.telegram.bot_token, &cfg.telegram.auth_token) {
            Ok(bot) => Some(Arc::new(bot)),
            Err(e) => {
                warn!("Telegram disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let shared_config = Arc::new(RwLock::new(cfg));
    let service = Arc::new(LendingService::new(
        rest_client,
        shared_config,
        Arc::clone(&trade_journal),
        telegram.clone(),
        cli.dry_run,
    ));

    if cli.dry_run {
        match service.run_lending_cycle(Trigger::DryRun).await {
            Ok(report) => info!("Dry run: {}", report.describe()),
            Err(e) => error!("Dry run failed: {}", e),
        }
        trade_journal.record(JournalEvent::BotShutdown {
            reason: "dry_run_complete".into(),
        });
        return;
    }

    let lending_task = tokio::spawn(lending_loop(Arc::clone(&service)));
    let rate_task = tokio::spawn(rate_check_loop(Arc::clone(&service)));
    let credit_task = tokio::spawn(credit_check_loop(Arc::clone(&service)));
    let telegram_task = telegram.map(|bot| tokio::spawn(bot.run(Arc::clone(&service))));
    if telegram_task.is_some() {
        info!("Telegram control enabled; send /auth to the bot to begin.");
    }

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "ctrl_c".to_string(),
        res = lending_task => format!("lending task exited: {res:?}"),
        res = rate_task => format!("rate check task exited: {res:?}"),
        res = credit_task => format!("credit check task exited: {res:?}"),
    };

    info!("Shutting down: {}", reason);
    if let Some(task) = telegram_task {
        task.abort();
    }
    trade_journal.record(JournalEvent::BotShutdown { reason });
}
