//! HMAC-SHA384 authentication for the Bitfinex v2 API.
//!
//! Signature format: `hex(HMAC-SHA384(secret, "/api/" + path + nonce + body))`,
//! where `path` is the request path after `/`, e.g. `v2/auth/r/wallets`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::Sha384;

use common::Error;

type HmacSha384 = Hmac<Sha384>;

/// Holds API credentials and the nonce counter.
#[derive(Clone)]
pub struct BitfinexAuth {
    pub api_key: String,
    secret: String,
    last_nonce: Arc<AtomicU64>,
}

impl std::fmt::Debug for BitfinexAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitfinexAuth")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl BitfinexAuth {
    pub fn new(api_key: &str, secret: &str) -> Result<Self, Error> {
        let api_key = api_key.trim();
        let secret = secret.trim();
        if api_key.is_empty() || secret.is_empty() {
            return Err(Error::Auth("Bitfinex API key and secret are required".into()));
        }

        Ok(Self {
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            last_nonce: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Load credentials from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("BITFINEX_API_KEY")
            .map_err(|_| Error::Auth("BITFINEX_API_KEY not set".into()))?;
        let secret = std::env::var("BITFINEX_SECRET_KEY")
            .map_err(|_| Error::Auth("BITFINEX_SECRET_KEY not set".into()))?;

        Self::new(&api_key, &secret)
    }

    /// Strictly increasing microsecond nonce.
    ///
    /// The exchange rejects a nonce that is not larger than the previous one,
    /// so two requests in the same microsecond are bumped apart.
    pub fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let mut prev = self.last_nonce.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last_nonce.compare_exchange_weak(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Sign `/api/{path}{nonce}{body}` and return the hex digest.
    pub fn sign(&self, path: &str, nonce: &str, body: &str) -> Result<String, Error> {
        let path = path.trim_start_matches('/');
        let payload = format!("/api/{path}{nonce}{body}");

        let mut mac = HmacSha384::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Auth(format!("Invalid HMAC key: {e}")))?;
        mac.update(payload.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build the authenticated header set for a POST to `path`.
    pub fn headers(&self, path: &str, body: &str) -> Result<HeaderMap, Error> {
        let nonce = self.next_nonce().to_string();
        let signature = self.sign(path, &nonce, body)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("bfx-nonce", header_value(&nonce)?);
        headers.insert("bfx-apikey", header_value(&self.api_key)?);
        headers.insert("bfx-signature", header_value(&signature)?);
        Ok(headers)
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(raw).map_err(|e| Error::Auth(format!("Invalid header value: {e}")))
}
