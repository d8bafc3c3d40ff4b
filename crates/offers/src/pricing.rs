use retention_core::config::OfferConfig;
use retention_core::types::Variant;
use serde::{Deserialize, Serialize};

/// Where the original price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Stored,
    /// The subscription price could not be read; the configured default was
    /// used instead.
    Fallback,
}

/// Offer price for one variant. All amounts are in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub variant: Variant,
    pub original_cents: u32,
    pub discounted_cents: u32,
    pub discount_cents: u32,
    pub source: PriceSource,
}

impl Pricing {
    /// A takes `percent_off` off (rounded down to whole cents), B takes a
    /// flat amount off and never goes below zero.
    pub fn for_variant(
        variant: Variant,
        original_cents: u32,
        config: &OfferConfig,
        source: PriceSource,
    ) -> Self {
        let discounted_cents = match variant {
            Variant::A => {
                let keep = 100 - u64::from(config.percent_off.min(100));
                (u64::from(original_cents) * keep / 100) as u32
            }
            Variant::B => original_cents.saturating_sub(config.flat_discount_cents),
        };

        Self {
            variant,
            original_cents,
            discounted_cents,
            discount_cents: original_cents - discounted_cents,
            source,
        }
    }

    pub fn original_dollars(&self) -> f64 {
        f64::from(self.original_cents) / 100.0
    }

    pub fn discounted_dollars(&self) -> f64 {
        f64::from(self.discounted_cents) / 100.0
    }

    pub fn discount_dollars(&self) -> f64 {
        f64::from(self.discount_cents) / 100.0
    }
}

/// `2500` -> `"$25.00"`.
pub fn format_cents(cents: u32) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
