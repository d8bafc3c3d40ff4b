//! In-process store backed by DashMap. Used by the CLI and tests in place of
//! the hosted database; read and write failures can be switched on to
//! exercise fallback paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use retention_core::types::{
    CancellationPatch, CancellationRecord, NewCancellation, Subscription, SubscriptionStatus,
    Variant,
};
use retention_core::{CancellationStore, RetentionError, RetentionResult};
use tracing::debug;
use uuid::Uuid;

struct StoredCancellation {
    /// Insertion order, breaks ties between equal `created_at` values.
    seq: u64,
    record: CancellationRecord,
}

#[derive(Default)]
pub struct MemoryStore {
    subscriptions: DashMap<String, Subscription>,
    cancellations: DashMap<Uuid, StoredCancellation>,
    next_seq: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_inserts: AtomicBool,
    fail_status_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an active subscription.
    pub fn seed_subscription(&self, id: &str, user_id: &str, monthly_price_cents: u32) {
        self.subscriptions.insert(
            id.to_string(),
            Subscription {
                id: id.to_string(),
                user_id: user_id.to_string(),
                monthly_price_cents,
                status: SubscriptionStatus::Active,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.get(id).map(|s| s.value().clone())
    }

    pub fn cancellation(&self, id: &Uuid) -> Option<CancellationRecord> {
        self.cancellations.get(id).map(|c| c.record.clone())
    }

    pub fn cancellation_count(&self) -> usize {
        self.cancellations.len()
    }

    /// Make every read return a storage error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write return a storage error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only `insert_cancellation` fail.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make only `update_subscription_status` fail.
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> RetentionResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RetentionError::Store("read unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> RetentionResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RetentionError::Store("write unavailable".to_string()));
        }
        Ok(())
    }

    fn check_flag(flag: &AtomicBool, what: &str) -> RetentionResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(RetentionError::Store(format!("{what} unavailable")));
        }
        Ok(())
    }

    fn user_cancellations(&self, user_id: &str) -> Vec<(u64, CancellationRecord)> {
        let mut rows: Vec<(u64, CancellationRecord)> = self
            .cancellations
            .iter()
            .filter(|c| c.record.user_id == user_id)
            .map(|c| (c.seq, c.record.clone()))
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        rows
    }
}

impl CancellationStore for MemoryStore {
    async fn latest_variant(&self, user_id: &str) -> RetentionResult<Option<Variant>> {
        self.check_read()?;
        Ok(self
            .user_cancellations(user_id)
            .first()
            .map(|(_, record)| record.downsell_variant))
    }

    async fn monthly_price(&self, subscription_id: &str) -> RetentionResult<u32> {
        self.check_read()?;
        self.subscriptions
            .get(subscription_id)
            .map(|s| s.monthly_price_cents)
            .ok_or_else(|| RetentionError::NotFound(format!("subscription {subscription_id}")))
    }

    async fn insert_cancellation(&self, new: NewCancellation) -> RetentionResult<CancellationRecord> {
        self.check_write()?;
        Self::check_flag(&self.fail_inserts, "insert")?;
        let record = CancellationRecord {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            subscription_id: new.subscription_id,
            downsell_variant: new.downsell_variant,
            reason: new.reason,
            accepted_downsell: new.accepted_downsell,
            feedback: new.feedback,
            created_at: Utc::now(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        debug!(cancellation_id = %record.id, user_id = %record.user_id, "Cancellation inserted");
        self.cancellations.insert(
            record.id,
            StoredCancellation {
                seq,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn update_subscription_status(
        &self,
        subscription_id: &str,
        user_id: &str,
        status: SubscriptionStatus,
    ) -> RetentionResult<()> {
        self.check_write()?;
        Self::check_flag(&self.fail_status_updates, "status update")?;
        let mut sub = self
            .subscriptions
            .get_mut(subscription_id)
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| {
                RetentionError::NotFound(format!(
                    "subscription {subscription_id} for user {user_id}"
                ))
            })?;
        sub.status = status;
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn update_cancellation(
        &self,
        id: Uuid,
        patch: CancellationPatch,
    ) -> RetentionResult<CancellationRecord> {
        self.check_write()?;
        let mut stored = self
            .cancellations
            .get_mut(&id)
            .ok_or_else(|| RetentionError::NotFound(format!("cancellation {id}")))?;
        if let Some(accepted) = patch.accepted_downsell {
            stored.record.accepted_downsell = accepted;
        }
        if let Some(feedback) = patch.feedback.filter(|f| !f.is_empty()) {
            stored.record.feedback = Some(feedback);
        }
        Ok(stored.record.clone())
    }

    async fn delete_cancellation(&self, id: Uuid) -> RetentionResult<()> {
        self.check_write()?;
        if self.cancellations.remove(&id).is_none() {
            return Err(RetentionError::NotFound(format!("cancellation {id}")));
        }
        debug!(cancellation_id = %id, "Cancellation deleted");
        Ok(())
    }

    async fn list_cancellations(&self, user_id: &str) -> RetentionResult<Vec<CancellationRecord>> {
        self.check_read()?;
        Ok(self
            .user_cancellations(user_id)
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }
}
