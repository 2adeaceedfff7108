//! Span weight calculation.

use crate::trace::Span;

const KEY_SAMPLING_RATE_GLOBAL: &str = "_sample_rate";

/// Returns the weight of a span: the inverse of its sampling rate.
///
/// Rates outside of `(0, 1]`, or a missing rate, give a weight of `1`.
pub fn weight(span: &Span) -> f64 {
    match span.metrics().get(KEY_SAMPLING_RATE_GLOBAL) {
        Some(&rate) if rate > 0.0 && rate <= 1.0 => 1.0 / rate,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_rate(rate: f64) -> Span {
        Span::default().with_metric(KEY_SAMPLING_RATE_GLOBAL, rate)
    }

    #[test]
    fn test_weight() {
        assert_eq!(weight(&Span::default()), 1.0);
        assert_eq!(weight(&with_rate(-1.0)), 1.0);
        assert_eq!(weight(&with_rate(0.0)), 1.0);
        assert_eq!(weight(&with_rate(0.25)), 4.0);
        assert_eq!(weight(&with_rate(1.0)), 1.0);
        assert_eq!(weight(&with_rate(1.5)), 1.0);
        assert!(weight(&with_rate(f64::NAN)) == 1.0);
    }
}
