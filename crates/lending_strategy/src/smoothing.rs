//! Candle-series reductions used by the kline strategy.
//!
//! Each method reduces a series of funding-rate candles to one
//! representative daily rate. An empty series yields the caller's fallback
//! (the configured minimum daily rate).

use common::config::SmoothMethod;
use common::Candle;

pub fn smooth(candles: &[Candle], method: SmoothMethod, fallback: f64) -> f64 {
    if candles.is_empty() {
        return fallback;
    }

    match method {
        SmoothMethod::Max => max_high(candles),
        SmoothMethod::Sma => sma_close(candles),
        SmoothMethod::Ema => ema_high(candles),
        SmoothMethod::Hla => high_low_average(candles),
        SmoothMethod::P90 => p90_high(candles),
    }
}

/// Highest `high` in the series.
pub fn max_high(candles: &[Candle]) -> f64 {
    candles
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Mean of `close`.
pub fn sma_close(candles: &[Candle]) -> f64 {
    mean(candles.iter().map(|c| c.close), candles.len())
}

/// Exponential average of `high`, seeded with the first candle,
/// `alpha = 2 / (n + 1)`.
pub fn ema_high(candles: &[Candle]) -> f64 {
    let Some(first) = candles.first() else {
        return 0.0;
    };
    let alpha = 2.0 / (candles.len() as f64 + 1.0);
    candles[1..]
        .iter()
        .fold(first.high, |ema, c| alpha * c.high + (1.0 - alpha) * ema)
}

/// `(mean(high) + mean(low)) / 2`
pub fn high_low_average(candles: &[Candle]) -> f64 {
    let n = candles.len();
    let avg_high = mean(candles.iter().map(|c| c.high), n);
    let avg_low = mean(candles.iter().map(|c| c.low), n);
    (avg_high + avg_low) / 2.0
}

/// 90th percentile of `high`: sorted ascending, index `floor(0.9 * n)`
/// clamped to the last element.
pub fn p90_high(candles: &[Candle]) -> f64 {
    let mut highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    if highs.is_empty() {
        return 0.0;
    }
    highs.sort_by(f64::total_cmp);

    let index = ((highs.len() as f64 * 0.9).floor() as usize).min(highs.len() - 1);
    highs[index]
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}
