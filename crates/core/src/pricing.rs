//! Margin calculator: converts a market price into a selling price.
//!
//! The order of operations is fixed:
//!
//! 1. A non-positive market price yields 0.
//! 2. The margin comes from the first tier with `min <= price < max`,
//!    falling back to the flat margin.
//! 3. `raw = market * (1 + margin / 100)`, kept at cent precision.
//! 4. A positive floor lifts `raw` up to the floor.
//! 5. Rounding (`whole` / `half` up, `none` to cents).
//!
//! Floor-then-round means a floor can be nudged up by rounding but never
//! down.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{from_cents, to_cents};

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Final rounding step applied to the selling price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Round up to the next whole unit.
    #[default]
    Whole,
    /// Round up to the next 0.50 increment.
    Half,
    /// Round to two decimals, no directional bias.
    None,
}

impl RoundingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whole => "whole",
            Self::Half => "half",
            Self::None => "none",
        }
    }

    fn apply_cents(self, cents: i64) -> i64 {
        match self {
            Self::Whole => ceil_to(cents, 100),
            Self::Half => ceil_to(cents, 50),
            Self::None => cents,
        }
    }
}

impl FromStr for RoundingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whole" => Ok(Self::Whole),
            "half" => Ok(Self::Half),
            "none" => Ok(Self::None),
            other => Err(CoreError::Config(format!(
                "unknown rounding mode '{other}' (expected whole, half or none)"
            ))),
        }
    }
}

fn ceil_to(cents: i64, step: i64) -> i64 {
    (cents + step - 1).div_euclid(step) * step
}

/// Apply a rounding mode to a price.
pub fn apply_rounding(price: f64, mode: RoundingMode) -> f64 {
    from_cents(mode.apply_cents(to_cents(price)))
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A price-range-specific margin rule. The range is half-open
/// (`min <= price < max`); a missing `max` is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginTier {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(alias = "margin")]
    pub margin_pct: f64,
}

impl MarginTier {
    pub fn new(min: f64, max: Option<f64>, margin_pct: f64) -> Self {
        Self {
            min,
            max,
            margin_pct,
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && self.max.map_or(true, |max| price < max)
    }
}

/// Validated margin configuration.
///
/// Construct via [`MarginConfig::new`], which sorts tiers by `min` and
/// rejects overlapping or inverted ranges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarginConfig {
    flat_margin_pct: f64,
    tiers: Vec<MarginTier>,
    floor_price: f64,
    rounding: RoundingMode,
}

impl MarginConfig {
    pub fn new(
        flat_margin_pct: f64,
        mut tiers: Vec<MarginTier>,
        floor_price: f64,
        rounding: RoundingMode,
    ) -> Result<Self, CoreError> {
        if !flat_margin_pct.is_finite() || flat_margin_pct <= -100.0 {
            return Err(CoreError::Config(format!(
                "flat margin {flat_margin_pct} must be a finite percentage above -100"
            )));
        }
        if !floor_price.is_finite() || floor_price < 0.0 {
            return Err(CoreError::Config(format!(
                "floor price {floor_price} must be zero or positive"
            )));
        }

        for tier in &tiers {
            let range_ok = tier.min.is_finite()
                && tier.min >= 0.0
                && tier.max.map_or(true, |max| max.is_finite() && max > tier.min);
            if !range_ok {
                return Err(CoreError::Config(format!(
                    "tier [{}, {:?}) is not a valid range",
                    tier.min, tier.max
                )));
            }
            if !tier.margin_pct.is_finite() || tier.margin_pct <= -100.0 {
                return Err(CoreError::Config(format!(
                    "tier starting at {} has invalid margin {}",
                    tier.min, tier.margin_pct
                )));
            }
        }

        tiers.sort_by(|a, b| a.min.total_cmp(&b.min));
        for pair in tiers.windows(2) {
            let overlaps = pair[0].max.map_or(true, |max| max > pair[1].min);
            if overlaps {
                return Err(CoreError::Config(format!(
                    "tiers starting at {} and {} overlap",
                    pair[0].min, pair[1].min
                )));
            }
        }

        Ok(Self {
            flat_margin_pct,
            tiers,
            floor_price,
            rounding,
        })
    }

    /// Flat margin only, no floor, whole-unit rounding.
    pub fn flat(flat_margin_pct: f64) -> Result<Self, CoreError> {
        Self::new(flat_margin_pct, Vec::new(), 0.0, RoundingMode::Whole)
    }

    pub fn flat_margin_pct(&self) -> f64 {
        self.flat_margin_pct
    }

    pub fn tiers(&self) -> &[MarginTier] {
        &self.tiers
    }

    pub fn floor_price(&self) -> f64 {
        self.floor_price
    }

    pub fn rounding(&self) -> RoundingMode {
        self.rounding
    }
}

// ---------------------------------------------------------------------------
// Breakdown
// ---------------------------------------------------------------------------

/// Which rule supplied the margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginSource {
    /// Market price was not positive; nothing was computed.
    None,
    Flat,
    /// Index into the sorted tier list.
    Tier(usize),
}

impl std::fmt::Display for MarginSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Flat => f.write_str("flat"),
            Self::Tier(index) => write!(f, "tier_{index}"),
        }
    }
}

impl Serialize for MarginSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Audit record produced by every price calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub market_price: f64,
    pub margin_pct: f64,
    pub margin_source: MarginSource,
    /// Market price plus margin, before floor and rounding.
    pub raw_price: f64,
    pub floor_applied: bool,
    pub final_price: f64,
}

impl PriceBreakdown {
    fn zero() -> Self {
        Self {
            market_price: 0.0,
            margin_pct: 0.0,
            margin_source: MarginSource::None,
            raw_price: 0.0,
            floor_applied: false,
            final_price: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Deterministic market-price to selling-price conversion.
#[derive(Debug, Clone)]
pub struct MarginCalculator {
    config: MarginConfig,
}

impl MarginCalculator {
    pub fn new(config: MarginConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarginConfig {
        &self.config
    }

    /// Selling price for a market price.
    pub fn calculate(&self, market_price: f64) -> f64 {
        self.calculate_with_breakdown(market_price).final_price
    }

    /// Selling price plus the full audit breakdown.
    pub fn calculate_with_breakdown(&self, market_price: f64) -> PriceBreakdown {
        if !(market_price > 0.0) || !market_price.is_finite() {
            return PriceBreakdown::zero();
        }

        let (margin_pct, margin_source) = self.resolve_margin(market_price);
        let raw_cents = (market_price * (100.0 + margin_pct)).round() as i64;

        let floor_cents = to_cents(self.config.floor_price);
        let floor_applied = floor_cents > 0 && raw_cents < floor_cents;
        let floored_cents = if floor_applied { floor_cents } else { raw_cents };

        let final_cents = self.config.rounding.apply_cents(floored_cents);

        PriceBreakdown {
            market_price,
            margin_pct,
            margin_source,
            raw_price: from_cents(raw_cents),
            floor_applied,
            final_price: from_cents(final_cents),
        }
    }

    /// Margin percentage and its source for a positive market price.
    pub fn resolve_margin(&self, market_price: f64) -> (f64, MarginSource) {
        self.config
            .tiers
            .iter()
            .enumerate()
            .find(|(_, tier)| tier.contains(market_price))
            .map(|(index, tier)| (tier.margin_pct, MarginSource::Tier(index)))
            .unwrap_or((self.config.flat_margin_pct, MarginSource::Flat))
    }
}
