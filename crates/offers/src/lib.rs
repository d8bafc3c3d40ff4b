//! Downsell offers: deterministic A/B bucketing of a subscription and the
//! discounted price each bucket is shown.

pub mod assignment;
pub mod pricing;

pub use assignment::{
    assign_variant, subscription_key, AssignmentSource, OfferQuote, VariantAssigner,
    VariantAssignment,
};
pub use pricing::{format_cents, PriceSource, Pricing};
