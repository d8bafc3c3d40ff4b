//! Deterministic downsell bucketing.
//!
//! A subscription's bucket is derived from the 32-bit rolling hash
//! `h = h * 31 + unit` over the UTF-16 code units of
//! `"{user_id}-{subscription_id}"`, wrapped to a signed 32-bit integer.
//! An even `|h|` maps to variant B and an odd one to variant A. This mapping
//! is the only one used anywhere in the workspace.

use std::sync::Arc;

use retention_core::config::OfferConfig;
use retention_core::event_bus::{make_event, noop_sink, EventSink, FlowEventKind};
use retention_core::types::Variant;
use retention_core::CancellationStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pricing::{PriceSource, Pricing};

/// Signed 32-bit rolling hash of `key`.
pub fn hash_key(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Buckets `key` into A or B. Same key, same answer.
pub fn assign_variant(key: &str) -> Variant {
    if hash_key(key).unsigned_abs() % 2 == 0 {
        Variant::B
    } else {
        Variant::A
    }
}

/// The bucketing key for a user's subscription.
pub fn subscription_key(user_id: &str, subscription_id: &str) -> String {
    format!("{user_id}-{subscription_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Reused from the user's latest stored cancellation.
    Stored,
    /// Hashed locally, either because nothing was stored or the lookup failed.
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAssignment {
    pub variant: Variant,
    pub source: AssignmentSource,
}

/// A resolved variant together with the price the user will be offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferQuote {
    pub assignment: VariantAssignment,
    pub pricing: Pricing,
}

/// Resolves a user's downsell bucket, preferring a previously persisted
/// assignment so repeat visits see the same offer.
pub struct VariantAssigner<S> {
    store: Arc<S>,
    config: OfferConfig,
    event_sink: Arc<dyn EventSink>,
}

impl<S: CancellationStore> VariantAssigner<S> {
    pub fn new(store: Arc<S>, config: OfferConfig) -> Self {
        Self {
            store,
            config,
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink for emitting assignment events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Never fails: a broken lookup degrades to local hashing.
    pub async fn resolve(&self, user_id: &str, subscription_id: &str) -> VariantAssignment {
        let stored = match self.store.latest_variant(user_id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(user_id, error = %e, "Variant lookup failed, computing locally");
                None
            }
        };

        let assignment = match stored {
            Some(variant) => VariantAssignment {
                variant,
                source: AssignmentSource::Stored,
            },
            None => VariantAssignment {
                variant: assign_variant(&subscription_key(user_id, subscription_id)),
                source: AssignmentSource::Computed,
            },
        };

        info!(
            user_id,
            subscription_id,
            variant = %assignment.variant,
            source = ?assignment.source,
            "Downsell variant resolved"
        );
        metrics::counter!("retention.variant.assigned", "variant" => assignment.variant.to_string())
            .increment(1);
        self.event_sink.emit(make_event(
            FlowEventKind::VariantAssigned,
            Some(user_id),
            serde_json::json!({
                "subscription_id": subscription_id,
                "variant": assignment.variant,
                "source": assignment.source,
            }),
        ));

        assignment
    }

    /// Resolves the variant and prices the offer. A failed price lookup uses
    /// the configured default and says so in `PriceSource::Fallback`.
    pub async fn quote(&self, user_id: &str, subscription_id: &str) -> OfferQuote {
        let assignment = self.resolve(user_id, subscription_id).await;

        let (original_cents, source) = match self.store.monthly_price(subscription_id).await {
            Ok(cents) => (cents, PriceSource::Stored),
            Err(e) => {
                warn!(
                    subscription_id,
                    error = %e,
                    default_cents = self.config.default_price_cents,
                    "Subscription price unavailable, using default"
                );
                (self.config.default_price_cents, PriceSource::Fallback)
            }
        };

        OfferQuote {
            assignment,
            pricing: Pricing::for_variant(assignment.variant, original_cents, &self.config, source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retention_core::event_bus::CaptureSink;
    use retention_core::types::{CancellationReason, NewCancellation};
    use retention_store::MemoryStore;

    #[test]
    fn test_hash_matches_known_values() {
        assert_eq!(hash_key(""), 0);
        assert_eq!(hash_key("a"), 97);
        assert_eq!(hash_key("ab"), 3105);
        assert_eq!(hash_key("user-1-sub-1"), -2074381498);
        // Astral characters hash as two UTF-16 units.
        assert_eq!(hash_key("😀"), 1772899);
    }

    #[test]
    fn test_parity_mapping() {
        assert_eq!(assign_variant("a"), Variant::A);
        assert_eq!(assign_variant("b"), Variant::B);
        assert_eq!(assign_variant("user-1-sub-1"), Variant::B);
        assert_eq!(assign_variant(""), Variant::B);
    }

    #[test]
    fn test_assignment_is_deterministic() {
        for i in 0..200 {
            let key = subscription_key(&format!("user-{i}"), "sub");
            let first = assign_variant(&key);
            for _ in 0..3 {
                assert_eq!(assign_variant(&key), first);
            }
        }
    }

    #[test]
    fn test_both_buckets_are_used() {
        let b_count = (0..1000)
            .filter(|i| assign_variant(&subscription_key(&format!("user-{i}"), "sub")) == Variant::B)
            .count();
        assert!(b_count > 300 && b_count < 700, "b_count = {b_count}");
    }

    #[tokio::test]
    async fn test_resolve_prefers_stored_variant() {
        let store = Arc::new(MemoryStore::new());
        // Hashing this pair gives B; the stored row says A.
        assert_eq!(assign_variant(&subscription_key("user", "1-sub-1")), Variant::B);
        store
            .insert_cancellation(NewCancellation {
                user_id: "user".to_string(),
                subscription_id: "1-sub-1".to_string(),
                downsell_variant: Variant::A,
                reason: CancellationReason::Other,
                accepted_downsell: false,
                feedback: None,
            })
            .await
            .unwrap();

        let assigner = VariantAssigner::new(store, OfferConfig::default());
        let assignment = assigner.resolve("user", "1-sub-1").await;
        assert_eq!(assignment.variant, Variant::A);
        assert_eq!(assignment.source, AssignmentSource::Stored);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_lookup_fails() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        let sink = Arc::new(CaptureSink::new());
        let assigner =
            VariantAssigner::new(store, OfferConfig::default()).with_event_sink(sink.clone());

        let assignment = assigner.resolve("user-1", "sub-1").await;
        assert_eq!(assignment.variant, Variant::B);
        assert_eq!(assignment.source, AssignmentSource::Computed);
        assert_eq!(sink.count_kind(FlowEventKind::VariantAssigned), 1);
    }

    #[tokio::test]
    async fn test_quote_uses_stored_price() {
        let store = Arc::new(MemoryStore::new());
        store.seed_subscription("sub-1", "user-1", 2500);
        let assigner = VariantAssigner::new(store, OfferConfig::default());

        let quote = assigner.quote("user-1", "sub-1").await;
        assert_eq!(quote.assignment.variant, Variant::B);
        assert_eq!(quote.pricing.source, PriceSource::Stored);
        assert_eq!(quote.pricing.discounted_cents, 1500);
    }

    #[tokio::test]
    async fn test_quote_falls_back_to_default_price() {
        let store = Arc::new(MemoryStore::new());
        let config = OfferConfig {
            default_price_cents: 3000,
            ..OfferConfig::default()
        };
        let assigner = VariantAssigner::new(store, config);

        let quote = assigner.quote("user-1", "missing").await;
        assert_eq!(quote.pricing.source, PriceSource::Fallback);
        assert_eq!(quote.pricing.original_cents, 3000);
    }
}
