//! Lending strategy crate.
//!
//! Turns a funding snapshot into ordered offer drafts under one of three
//! strategies (traditional ladder, smart adaptive, kline smoothed), and
//! derives the rate and new-credit notifications.

pub mod alerts;
pub mod analyzer;
pub mod engine;
pub mod high_hold;
pub mod kline;
pub mod ladder;
pub mod rates;
pub mod smart;
pub mod smoothing;
pub mod tiered;

pub use alerts::{CreditWatcher, RateCheck};
pub use analyzer::{MarketAnalyzer, MarketCondition, RateSnapshot, Trend};
pub use engine::{Allocation, AllocationEngine, OrderGate, PreparedOffers, RejectReason, RejectedOffer};
pub use ladder::{PeriodTier, PeriodTiers};
pub use smart::{SmartAllocation, SmartStrategy};
