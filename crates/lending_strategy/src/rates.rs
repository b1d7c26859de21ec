//! Rate unit conversions.
//!
//! Daily rates are decimal fractions (0.0003 = 0.03%/day); percentages are
//! what users type and what the exchange UI shows.

pub const DAYS_PER_YEAR: f64 = 365.0;
pub const PERCENT_SCALE: f64 = 100.0;

/// Highest daily rate the exchange accepts (7%/day).
pub const MAX_DAILY_RATE: f64 = 0.07;

pub fn percentage_to_decimal(percentage: f64) -> f64 {
    percentage / PERCENT_SCALE
}

pub fn decimal_to_percentage(decimal: f64) -> f64 {
    decimal * PERCENT_SCALE
}

pub fn daily_to_annual(daily_rate: f64) -> f64 {
    daily_rate * DAYS_PER_YEAR
}

pub fn annual_to_daily(annual_rate: f64) -> f64 {
    annual_rate / DAYS_PER_YEAR
}

/// Daily percentage to annualized decimal: 0.05 (%/day) becomes 0.1825.
pub fn percentage_to_annual_decimal(percentage: f64) -> f64 {
    daily_to_annual(percentage_to_decimal(percentage))
}

pub fn annual_decimal_to_percentage(annual_decimal: f64) -> f64 {
    decimal_to_percentage(annual_to_daily(annual_decimal))
}

/// `0 < daily_rate <= MAX_DAILY_RATE`
pub fn validate_daily_rate(daily_rate: f64) -> bool {
    daily_rate > 0.0 && daily_rate <= MAX_DAILY_RATE
}

pub fn validate_percentage_rate(percentage: f64) -> bool {
    validate_daily_rate(percentage_to_decimal(percentage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_decimal_roundtrip() {
        for x in [0.0, 1e-6, 0.0002, 0.0003, 0.015, 0.07, 0.123456789, 3.5] {
            let back = percentage_to_decimal(decimal_to_percentage(x));
            assert!((back - x).abs() < 1e-9, "{x} came back as {back}");
        }
    }

    #[test]
    fn test_annualization() {
        assert!((daily_to_annual(0.0003) - 0.1095).abs() < 1e-12);
        assert!((annual_to_daily(0.1095) - 0.0003).abs() < 1e-12);
        assert!((percentage_to_annual_decimal(0.05) - 0.1825).abs() < 1e-12);
        assert!((annual_decimal_to_percentage(0.1825) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_validate_daily_rate_bounds() {
        assert!(!validate_daily_rate(0.0));
        assert!(!validate_daily_rate(-0.0001));
        assert!(validate_daily_rate(0.0001));
        assert!(validate_daily_rate(MAX_DAILY_RATE));
        assert!(!validate_daily_rate(0.0701));
    }

    #[test]
    fn test_validate_percentage_rate() {
        assert!(validate_percentage_rate(7.0));
        assert!(validate_percentage_rate(0.02));
        assert!(!validate_percentage_rate(7.5));
        assert!(!validate_percentage_rate(0.0));
    }
}
