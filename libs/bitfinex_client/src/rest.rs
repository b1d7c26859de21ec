//! REST client for the Bitfinex v2 API.
//!
//! Covers: funding book, funding candles, wallets, funding offers and
//! credits. Public calls go to `api-pub`, authenticated calls are signed
//! POSTs to `api.bitfinex.com/v2/auth/...`. All methods are rate-limited.
//!
//! Bitfinex answers with positional JSON arrays; the `parse_*` helpers turn
//! those rows into the shared domain types and skip rows that are too short
//! or carry the wrong value types.

use serde_json::{json, Value};
use tracing::{debug, warn};

use common::{Candle, Error, FundingBookEntry, FundingCredit, FundingOffer, Wallet};

use crate::auth::BitfinexAuth;
use crate::rate_limit::RateLimiter;

const PUBLIC_BASE_URL: &str = "https://api-pub.bitfinex.com";
const AUTH_BASE_URL: &str = "https://api.bitfinex.com";

/// Default and maximum number of book levels per request.
pub const DEFAULT_BOOK_LEVELS: usize = 25;
pub const MAX_BOOK_LEVELS: usize = 100;

const FUNDING_WALLET: &str = "funding";
const RATE_LIMIT_BACKOFF_MS: u64 = 60_000;

/// Async REST client for the Bitfinex funding API.
#[derive(Debug, Clone)]
pub struct BitfinexRestClient {
    client: reqwest::Client,
    auth: BitfinexAuth,
    public_base: String,
    auth_base: String,
    limiter: RateLimiter,
}

impl BitfinexRestClient {
    pub fn new(auth: BitfinexAuth) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(format!("failed to build reqwest client: {e}")))?;

        Ok(Self {
            client,
            auth,
            public_base: PUBLIC_BASE_URL.to_string(),
            auth_base: AUTH_BASE_URL.to_string(),
            limiter: RateLimiter::new(),
        })
    }

    // ── Transport ─────────────────────────────────────────────────────

    async fn get_public(&self, path: &str) -> Result<Value, Error> {
        self.limiter.wait_read().await;

        let url = format!("{}/{}", self.public_base, path.trim_start_matches('/'));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        read_body(resp).await
    }

    /// Signed POST; `path` is relative to the API root, e.g. `v2/auth/r/wallets`.
    async fn post_auth(&self, path: &str, body: &Value, write: bool) -> Result<Value, Error> {
        if write {
            self.limiter.wait_write().await;
        } else {
            self.limiter.wait_read().await;
        }

        let body = body.to_string();
        let headers = self.auth.headers(path, &body)?;
        let url = format!("{}/{}", self.auth_base, path.trim_start_matches('/'));

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        read_body(resp).await
    }

    // ── Public endpoints ──────────────────────────────────────────────

    /// Fetch the lending side of the raw funding book, best level first.
    ///
    /// `limit <= 0` requests the default depth; anything above the maximum
    /// is capped.
    pub async fn get_funding_book(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<FundingBookEntry>, Error> {
        let levels = book_levels(limit);
        let path = format!("v2/book/{symbol}/R0?len={levels}");
        let body = self.get_public(&path).await?;

        let mut book = parse_book_rows(&body);
        book.truncate(levels);
        debug!("Fetched {} funding book levels for {}", book.len(), symbol);
        Ok(book)
    }

    /// Best (first) rate of the funding book.
    pub async fn get_current_funding_rate(&self, symbol: &str) -> Result<f64, Error> {
        let book = self.get_funding_book(symbol, 1).await?;
        book.first()
            .map(|e| e.daily_rate)
            .ok_or_else(|| Error::Payload(format!("no funding book data for {symbol}")))
    }

    /// Fetch funding-rate candles, newest first.
    pub async fn get_funding_candles(
        &self,
        symbol: &str,
        time_frame: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, Error> {
        let path = format!("v2/candles/{}/hist?limit={limit}", candle_key(time_frame, symbol));
        let body = self.get_public(&path).await?;

        let candles = parse_candle_rows(&body);
        debug!(
            "Fetched {} {} candles for {}",
            candles.len(),
            time_frame,
            symbol
        );
        Ok(candles)
    }

    // ── Authenticated endpoints ───────────────────────────────────────

    pub async fn get_wallets(&self) -> Result<Vec<Wallet>, Error> {
        let body = self.post_auth("v2/auth/r/wallets", &json!({}), false).await?;
        Ok(parse_wallet_rows(&body))
    }

    /// Available balance of the funding wallet for `currency` (0 if absent).
    pub async fn get_funding_balance(&self, currency: &str) -> Result<f64, Error> {
        let wallets = self.get_wallets().await?;
        Ok(funding_available(&wallets, currency))
    }

    /// Pending (unmatched) funding offers.
    pub async fn get_funding_offers(&self, symbol: &str) -> Result<Vec<FundingOffer>, Error> {
        let path = format!("v2/auth/r/funding/offers/{symbol}");
        let body = self.post_auth(&path, &json!({}), false).await?;
        Ok(parse_offer_rows(&body))
    }

    pub async fn cancel_funding_offer(&self, offer_id: i64) -> Result<(), Error> {
        let body = self
            .post_auth("v2/auth/w/funding/offer/cancel", &json!({ "id": offer_id }), true)
            .await?;
        check_notification(&body)?;
        debug!("Cancelled funding offer {}", offer_id);
        Ok(())
    }

    /// Submit a LIMIT funding offer. Returns the new offer id when the
    /// exchange echoes one.
    pub async fn submit_funding_offer(
        &self,
        symbol: &str,
        amount: f64,
        daily_rate: f64,
        period_days: u32,
    ) -> Result<Option<i64>, Error> {
        let request = json!({
            "type": "LIMIT",
            "symbol": symbol,
            "amount": format!("{amount:.2}"),
            "rate": format!("{daily_rate:.8}"),
            "period": period_days,
            "flags": 0,
        });

        let body = self
            .post_auth("v2/auth/w/funding/offer/submit", &request, true)
            .await?;
        check_notification(&body)?;

        Ok(body
            .get(4)
            .and_then(|offer| offer.get(0))
            .and_then(Value::as_i64))
    }

    /// Active (matched) funding credits.
    pub async fn get_funding_credits(&self, symbol: &str) -> Result<Vec<FundingCredit>, Error> {
        let path = format!("v2/auth/r/funding/credits/{symbol}");
        let body = self.post_auth(&path, &json!({}), false).await?;
        Ok(parse_credit_rows(&body))
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn read_body(resp: reqwest::Response) -> Result<Value, Error> {
    let status_code = resp.status().as_u16();
    let text = resp
        .text()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    if status_code == 429 {
        warn!("Bitfinex rate limit hit");
        return Err(Error::RateLimited {
            retry_after_ms: RATE_LIMIT_BACKOFF_MS,
        });
    }
    if status_code != 200 {
        return Err(Error::BitfinexApi {
            status: status_code,
            message: error_message(&text),
        });
    }

    let value: Value = serde_json::from_str(&text)?;
    if let Some(message) = error_array_message(&value) {
        return Err(Error::BitfinexApi {
            status: status_code,
            message,
        });
    }
    Ok(value)
}

/// `["error", code, "message"]`
fn error_array_message(value: &Value) -> Option<String> {
    let arr = value.as_array()?;
    if arr.first()?.as_str()? != "error" {
        return None;
    }
    let code = arr.get(1).and_then(Value::as_i64).unwrap_or_default();
    let text = arr.get(2).and_then(Value::as_str).unwrap_or("unknown error");
    Some(format!("{text} (code {code})"))
}

fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| error_array_message(&v))
        .unwrap_or_else(|| text.to_string())
}

/// Write endpoints answer with a notification:
/// `[MTS, TYPE, MSG_ID, null, DATA, CODE, STATUS, TEXT]`.
fn check_notification(value: &Value) -> Result<(), Error> {
    let status = value.get(6).and_then(Value::as_str).unwrap_or("");
    if status.eq_ignore_ascii_case("SUCCESS") {
        return Ok(());
    }
    let text = value.get(7).and_then(Value::as_str).unwrap_or("no status text");
    Err(Error::BitfinexApi {
        status: 200,
        message: format!("{status}: {text}"),
    })
}

// ── Row parsing ──────────────────────────────────────────────────────

pub fn book_levels(limit: i64) -> usize {
    if limit <= 0 {
        DEFAULT_BOOK_LEVELS
    } else if limit == 1 {
        1
    } else if limit as usize <= DEFAULT_BOOK_LEVELS {
        DEFAULT_BOOK_LEVELS
    } else {
        MAX_BOOK_LEVELS
    }
}

pub fn candle_key(time_frame: &str, symbol: &str) -> String {
    format!("trade:{time_frame}:{symbol}:a30:p2:p30")
}

fn rows(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn num(row: &[Value], idx: usize) -> Option<f64> {
    row.get(idx).and_then(Value::as_f64)
}

fn int(row: &[Value], idx: usize) -> Option<i64> {
    row.get(idx)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

fn text(row: &[Value], idx: usize) -> Option<String> {
    row.get(idx).and_then(Value::as_str).map(str::to_string)
}

/// Raw funding book rows: `[OFFER_ID, PERIOD, RATE, AMOUNT]`.
///
/// Positive amounts are lending offers; borrower bids are dropped.
pub fn parse_book_rows(value: &Value) -> Vec<FundingBookEntry> {
    rows(value)
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            let period = int(row, 1)?;
            let daily_rate = num(row, 2)?;
            let amount = num(row, 3)?;
            (amount > 0.0).then_some(FundingBookEntry {
                daily_rate,
                amount,
                period: period.max(0) as u32,
                count: 1,
            })
        })
        .collect()
}

/// Candle rows: `[MTS, OPEN, CLOSE, HIGH, LOW, VOLUME]`.
pub fn parse_candle_rows(value: &Value) -> Vec<Candle> {
    rows(value)
        .iter()
        .filter_map(Value::as_array)
        .filter(|row| row.len() == 6)
        .filter_map(|row| {
            Some(Candle {
                open_time_ms: int(row, 0)?,
                open: num(row, 1)?,
                close: num(row, 2)?,
                high: num(row, 3)?,
                low: num(row, 4)?,
                volume: num(row, 5)?,
            })
        })
        .collect()
}

/// Wallet rows: `[TYPE, CURRENCY, BALANCE, UNSETTLED_INTEREST, AVAILABLE, ...]`.
///
/// `AVAILABLE` may be null right after a balance change; it reads as 0.
pub fn parse_wallet_rows(value: &Value) -> Vec<Wallet> {
    rows(value)
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            Some(Wallet {
                wallet_type: text(row, 0)?,
                currency: text(row, 1)?,
                balance: num(row, 2).unwrap_or(0.0),
                available: num(row, 4).unwrap_or(0.0),
            })
        })
        .collect()
}

pub fn funding_available(wallets: &[Wallet], currency: &str) -> f64 {
    wallets
        .iter()
        .find(|w| w.wallet_type == FUNDING_WALLET && w.currency.eq_ignore_ascii_case(currency))
        .map(|w| w.available)
        .unwrap_or(0.0)
}

/// Offer rows: ID at 0, SYMBOL 1, AMOUNT 4, RATE 14, PERIOD 15.
pub fn parse_offer_rows(value: &Value) -> Vec<FundingOffer> {
    rows(value)
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            Some(FundingOffer {
                id: int(row, 0)?,
                symbol: text(row, 1)?,
                amount: num(row, 4)?,
                daily_rate: num(row, 14)?,
                period: int(row, 15)?.max(0) as u32,
            })
        })
        .collect()
}

/// Credit rows: ID 0, SYMBOL 1, MTS_CREATE 3, AMOUNT 5, STATUS 7, RATE 11,
/// PERIOD 12, MTS_OPENING 13.
pub fn parse_credit_rows(value: &Value) -> Vec<FundingCredit> {
    rows(value)
        .iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            Some(FundingCredit {
                id: int(row, 0)?,
                symbol: text(row, 1)?,
                amount: num(row, 5)?,
                daily_rate: num(row, 11)?,
                period: int(row, 12)?.max(0) as u32,
                created_at_ms: int(row, 3).unwrap_or(0),
                opened_at_ms: int(row, 13).unwrap_or(0),
                status: text(row, 7).unwrap_or_default(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_levels_clamp() {
        assert_eq!(book_levels(0), 25);
        assert_eq!(book_levels(-3), 25);
        assert_eq!(book_levels(1), 1);
        assert_eq!(book_levels(10), 25);
        assert_eq!(book_levels(50), 100);
        assert_eq!(book_levels(500), 100);
    }

    #[test]
    fn test_candle_key_format() {
        assert_eq!(candle_key("15m", "fUSD"), "trade:15m:fUSD:a30:p2:p30");
    }

    #[test]
    fn test_parse_book_keeps_offer_side() {
        let body = json!([
            [41_000_001, 2, 0.00021, 1500.0],
            [41_000_002, 30, 0.00025, -800.0],
            [41_000_003, 2, 0.00023, 300.5],
        ]);
        let book = parse_book_rows(&body);
        assert_eq!(book.len(), 2);
        assert_eq!(book[0].daily_rate, 0.00021);
        assert_eq!(book[0].period, 2);
        assert_eq!(book[1].amount, 300.5);
    }

    #[test]
    fn test_parse_candles_skips_malformed_rows() {
        let body = json!([
            [1_700_000_000_000i64, 0.0002, 0.00021, 0.00025, 0.00019, 12345.0],
            [1_700_000_900_000i64, 0.0002, 0.00021, 0.00025],
            [1_700_001_800_000i64, "x", 0.00021, 0.00025, 0.00019, 1.0],
        ]);
        let candles = parse_candle_rows(&body);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, 0.00025);
        assert_eq!(candles[0].open_time_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_wallets_and_funding_balance() {
        let body = json!([
            ["exchange", "USD", 50.0, 0, 50.0],
            ["funding", "USD", 1200.0, 0.5, 1100.25],
            ["funding", "BTC", 1.0, 0, null],
        ]);
        let wallets = parse_wallet_rows(&body);
        assert_eq!(wallets.len(), 3);
        assert_eq!(wallets[2].available, 0.0);
        assert_eq!(funding_available(&wallets, "usd"), 1100.25);
        assert_eq!(funding_available(&wallets, "EUR"), 0.0);
    }

    #[test]
    fn test_parse_offer_row() {
        let mut row = vec![Value::Null; 21];
        row[0] = json!(123456);
        row[1] = json!("fUSD");
        row[4] = json!(500.0);
        row[14] = json!(0.0003);
        row[15] = json!(2);
        let offers = parse_offer_rows(&Value::Array(vec![Value::Array(row)]));
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].id, 123456);
        assert_eq!(offers[0].daily_rate, 0.0003);
        assert_eq!(offers[0].period, 2);
    }

    #[test]
    fn test_parse_credit_row() {
        let mut row = vec![Value::Null; 22];
        row[0] = json!(987);
        row[1] = json!("fUSD");
        row[3] = json!(1_700_000_000_000i64);
        row[5] = json!(1000.0);
        row[7] = json!("ACTIVE");
        row[11] = json!(0.0005);
        row[12] = json!(30);
        row[13] = json!(1_700_000_060_000i64);
        let credits = parse_credit_rows(&Value::Array(vec![Value::Array(row)]));
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].opened_at_ms, 1_700_000_060_000);
        assert_eq!(credits[0].status, "ACTIVE");
        assert!((credits[0].expected_earnings() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_array_detected() {
        let v = json!(["error", 10100, "apikey: invalid"]);
        assert_eq!(
            error_array_message(&v).as_deref(),
            Some("apikey: invalid (code 10100)")
        );
        assert!(error_array_message(&json!([[1, 2]])).is_none());
    }

    #[test]
    fn test_notification_status() {
        let ok = json!([1, "fon-req", null, null, [55], null, "SUCCESS", "Submitting"]);
        assert!(check_notification(&ok).is_ok());

        let err = json!([1, "fon-req", null, null, null, null, "ERROR", "Invalid offer: incorrect amount"]);
        match check_notification(&err) {
            Err(Error::BitfinexApi { message, .. }) => assert!(message.contains("incorrect amount")),
            other => panic!("expected BitfinexApi error, got {other:?}"),
        }
    }
}
