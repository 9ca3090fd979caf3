//! Price-swing anomaly detection.

use serde::Serialize;

use crate::pricing::PriceBreakdown;
use crate::types::Sku;

/// Direction of an anomalous price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Increase,
    Decrease,
}

impl PriceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
        }
    }
}

impl std::fmt::Display for PriceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected swing between the current and the newly computed price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSwing {
    pub direction: PriceDirection,
    pub pct_change: f64,
}

/// Check whether moving from `current` to `new` meets `threshold_pct`.
///
/// Returns `None` when the current price is not positive, when no
/// positive threshold is configured, or when the swing is below it.
pub fn detect_swing(current: f64, new: f64, threshold_pct: Option<f64>) -> Option<PriceSwing> {
    let threshold = threshold_pct.filter(|t| *t > 0.0)?;
    if !(current > 0.0) {
        return None;
    }
    let pct_change = (new - current).abs() / current * 100.0;
    if pct_change < threshold {
        return None;
    }
    let direction = if new > current {
        PriceDirection::Increase
    } else {
        PriceDirection::Decrease
    };
    Some(PriceSwing {
        direction,
        pct_change,
    })
}

/// Alert raised when a price update crosses the anomaly threshold.
#[derive(Debug, Clone, Serialize)]
pub struct PriceAlert {
    pub sku: Sku,
    pub variation_id: u64,
    pub size_key: String,
    pub direction: PriceDirection,
    pub old_price: f64,
    pub new_price: f64,
    /// Percentage change rounded to one decimal.
    pub pct_change: f64,
    pub threshold_pct: f64,
    pub breakdown: PriceBreakdown,
}

impl PriceAlert {
    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} size {}: price {} {:.1}% ({:.2} -> {:.2})",
            self.sku, self.size_key, self.direction, self.pct_change, self.old_price, self.new_price
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_of_a_third_meets_thirty_percent() {
        let swing = detect_swing(150.0, 100.0, Some(30.0)).unwrap();
        assert_eq!(swing.direction, PriceDirection::Decrease);
        assert!((swing.pct_change - 33.333).abs() < 0.01);
    }

    #[test]
    fn twenty_percent_drop_stays_quiet() {
        assert!(detect_swing(150.0, 120.0, Some(30.0)).is_none());
    }

    #[test]
    fn exact_threshold_fires() {
        let swing = detect_swing(100.0, 130.0, Some(30.0)).unwrap();
        assert_eq!(swing.direction, PriceDirection::Increase);
    }

    #[test]
    fn no_threshold_or_no_current_price_never_fires() {
        assert!(detect_swing(100.0, 500.0, None).is_none());
        assert!(detect_swing(100.0, 500.0, Some(0.0)).is_none());
        assert!(detect_swing(0.0, 500.0, Some(10.0)).is_none());
    }
}
