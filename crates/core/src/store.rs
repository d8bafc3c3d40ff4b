//! Persistence seam over the `subscriptions` and `cancellations` tables.

use std::future::Future;

use uuid::Uuid;

use crate::error::RetentionResult;
use crate::types::{
    CancellationPatch, CancellationRecord, NewCancellation, SubscriptionStatus, Variant,
};

/// Backing store for the cancellation flow. Implementations wrap whatever
/// hosted database the product uses; every call may fail and callers decide
/// what to do about it.
pub trait CancellationStore: Send + Sync {
    /// `downsell_variant` of the user's most recent cancellation, if any.
    fn latest_variant(
        &self,
        user_id: &str,
    ) -> impl Future<Output = RetentionResult<Option<Variant>>> + Send;

    /// `monthly_price` of a subscription, in cents.
    fn monthly_price(&self, subscription_id: &str)
        -> impl Future<Output = RetentionResult<u32>> + Send;

    fn insert_cancellation(
        &self,
        new: NewCancellation,
    ) -> impl Future<Output = RetentionResult<CancellationRecord>> + Send;

    /// Sets `status` and bumps `updated_at`. Only matches a subscription
    /// owned by `user_id`.
    fn update_subscription_status(
        &self,
        subscription_id: &str,
        user_id: &str,
        status: SubscriptionStatus,
    ) -> impl Future<Output = RetentionResult<()>> + Send;

    fn update_cancellation(
        &self,
        id: Uuid,
        patch: CancellationPatch,
    ) -> impl Future<Output = RetentionResult<CancellationRecord>> + Send;

    /// Removes a cancellation. Only used to undo an insert whose submit
    /// failed on a later step.
    fn delete_cancellation(&self, id: Uuid) -> impl Future<Output = RetentionResult<()>> + Send;

    /// The user's cancellations, newest first.
    fn list_cancellations(
        &self,
        user_id: &str,
    ) -> impl Future<Output = RetentionResult<Vec<CancellationRecord>>> + Send;
}
