//! Bitfinex API client library.
//!
//! Public market data (funding book, funding candles) and the authenticated
//! funding endpoints (wallets, offers, credits) of the v2 REST API.

pub mod auth;
pub mod rate_limit;
pub mod rest;

pub use auth::BitfinexAuth;
pub use rate_limit::RateLimiter;
pub use rest::BitfinexRestClient;
