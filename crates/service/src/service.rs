use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use retention_core::config::AppConfig;
use retention_core::event_bus::{make_event, noop_sink, EventSink, FlowEventKind};
use retention_core::types::{
    CancellationForm, CancellationPatch, CancellationRecord, NewCancellation, SubmitAction,
    SubscriptionStatus, Variant,
};
use retention_core::{CancellationStore, RetentionError, RetentionResult};
use retention_platform::validation::{
    sanitize_input, validate_form, validate_subscription_id, validate_user_id,
};
use retention_platform::{issue_form_token, verify_form_token, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What the final form submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub subscription_id: String,
    /// Bucket the user was shown; stored with the cancellation so later
    /// visits reuse it.
    pub variant: Variant,
    pub form: CancellationForm,
    /// Token handed out by `issue_form_token` when the modal opened.
    pub form_token: String,
}

/// Confirmation that a submit was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub cancellation: CancellationRecord,
    pub subscription_status: SubscriptionStatus,
}

/// Applies submit actions. Validation and rate limiting run before anything
/// touches the store; a failed write is returned as an error, never masked.
pub struct CancellationService<S> {
    store: Arc<S>,
    limiter: Arc<RateLimiter>,
    config: AppConfig,
    event_sink: Arc<dyn EventSink>,
    /// Outstanding form token per user.
    form_tokens: DashMap<String, String>,
}

impl<S: CancellationStore> CancellationService<S> {
    pub fn new(store: Arc<S>, limiter: Arc<RateLimiter>, config: AppConfig) -> Self {
        Self {
            store,
            limiter,
            config,
            event_sink: noop_sink(),
            form_tokens: DashMap::new(),
        }
    }

    /// Attach an event sink for emitting submit events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Issues the token the user's submits must carry, replacing any earlier
    /// one.
    pub fn issue_form_token(&self, user_id: &str) -> String {
        let token = issue_form_token();
        self.form_tokens.insert(user_id.to_string(), token.clone());
        token
    }

    /// Drops the user's token, e.g. when the modal closes.
    pub fn revoke_form_token(&self, user_id: &str) {
        self.form_tokens.remove(user_id);
    }

    /// "Get discount": records the cancellation attempt with the downsell
    /// accepted, then keeps the subscription active.
    pub async fn accept_discount(&self, request: SubmitRequest) -> RetentionResult<SubmitReceipt> {
        let new = self.prepare(SubmitAction::Discount, &request, true)?;

        let cancellation = self
            .persisted(&request.user_id, "insert_cancellation", self.store.insert_cancellation(new))
            .await?;
        let reactivated = self
            .persisted(
                &request.user_id,
                "reactivate_subscription",
                self.store.update_subscription_status(
                    &request.subscription_id,
                    &request.user_id,
                    SubscriptionStatus::Active,
                ),
            )
            .await;
        if let Err(e) = reactivated {
            // No accepted row may outlive a failed discount.
            let _ = self
                .persisted(
                    &request.user_id,
                    "rollback_insert_cancellation",
                    self.store.delete_cancellation(cancellation.id),
                )
                .await;
            return Err(e);
        }

        info!(
            user_id = %request.user_id,
            cancellation_id = %cancellation.id,
            variant = %request.variant,
            "Downsell accepted"
        );
        metrics::counter!("retention.downsell.accepted", "variant" => request.variant.to_string())
            .increment(1);
        self.emit(
            FlowEventKind::DiscountAccepted,
            &request.user_id,
            serde_json::json!({
                "cancellation_id": cancellation.id,
                "variant": request.variant,
            }),
        );

        Ok(SubmitReceipt {
            cancellation,
            subscription_status: SubscriptionStatus::Active,
        })
    }

    /// "Complete cancellation": marks the subscription pending cancellation
    /// and records why.
    pub async fn complete_cancellation(
        &self,
        request: SubmitRequest,
    ) -> RetentionResult<SubmitReceipt> {
        let new = self.prepare(SubmitAction::Cancellation, &request, false)?;

        self.persisted(
            &request.user_id,
            "mark_pending_cancellation",
            self.store.update_subscription_status(
                &request.subscription_id,
                &request.user_id,
                SubscriptionStatus::PendingCancellation,
            ),
        )
        .await?;
        let inserted = self
            .persisted(&request.user_id, "insert_cancellation", self.store.insert_cancellation(new))
            .await;
        let cancellation = match inserted {
            Ok(cancellation) => cancellation,
            Err(e) => {
                // Pending status without a cancellation row is undone.
                let _ = self
                    .persisted(
                        &request.user_id,
                        "rollback_pending_cancellation",
                        self.store.update_subscription_status(
                            &request.subscription_id,
                            &request.user_id,
                            SubscriptionStatus::Active,
                        ),
                    )
                    .await;
                return Err(e);
            }
        };

        info!(
            user_id = %request.user_id,
            cancellation_id = %cancellation.id,
            reason = %cancellation.reason,
            "Cancellation recorded"
        );
        metrics::counter!("retention.cancellations.recorded").increment(1);
        self.emit(
            FlowEventKind::CancellationRecorded,
            &request.user_id,
            serde_json::json!({
                "cancellation_id": cancellation.id,
                "reason": cancellation.reason,
                "variant": request.variant,
            }),
        );

        Ok(SubmitReceipt {
            cancellation,
            subscription_status: SubscriptionStatus::PendingCancellation,
        })
    }

    /// Later change to acceptance or feedback. Feedback is sanitized and
    /// dropped when nothing is left of it.
    pub async fn update_cancellation(
        &self,
        cancellation_id: Uuid,
        patch: CancellationPatch,
    ) -> RetentionResult<CancellationRecord> {
        let patch = CancellationPatch {
            accepted_downsell: patch.accepted_downsell,
            feedback: patch
                .feedback
                .map(|f| sanitize_input(&f))
                .filter(|f| !f.is_empty()),
        };
        if patch.is_empty() {
            return Err(RetentionError::Validation(vec![
                "Nothing to update".to_string(),
            ]));
        }

        let record = self
            .persisted("", "update_cancellation", self.store.update_cancellation(cancellation_id, patch))
            .await?;
        info!(cancellation_id = %record.id, accepted = record.accepted_downsell, "Cancellation updated");
        self.emit(
            FlowEventKind::CancellationUpdated,
            &record.user_id,
            serde_json::json!({
                "cancellation_id": record.id,
                "accepted_downsell": record.accepted_downsell,
            }),
        );
        Ok(record)
    }

    pub async fn reactivate_subscription(
        &self,
        subscription_id: &str,
        user_id: &str,
    ) -> RetentionResult<()> {
        self.persisted(
            user_id,
            "reactivate_subscription",
            self.store
                .update_subscription_status(subscription_id, user_id, SubscriptionStatus::Active),
        )
        .await?;
        info!(user_id, subscription_id, "Subscription reactivated");
        self.emit(
            FlowEventKind::SubscriptionReactivated,
            user_id,
            serde_json::json!({ "subscription_id": subscription_id }),
        );
        Ok(())
    }

    /// The user's cancellations, newest first.
    pub async fn history(&self, user_id: &str) -> RetentionResult<Vec<CancellationRecord>> {
        self.persisted(user_id, "list_cancellations", self.store.list_cancellations(user_id))
            .await
    }

    /// Validation, then the rate limit, then the insert payload. Invalid
    /// forms do not spend an attempt.
    fn prepare(
        &self,
        action: SubmitAction,
        request: &SubmitRequest,
        accepted_downsell: bool,
    ) -> RetentionResult<NewCancellation> {
        validate_user_id(&request.user_id)
            .merge(validate_subscription_id(&request.subscription_id))
            .merge(validate_form(&request.form, &self.config.validation))
            .into_result()?;

        let token_ok = self
            .form_tokens
            .get(&request.user_id)
            .map_or(false, |expected| verify_form_token(&request.form_token, expected.value()));
        if !token_ok {
            warn!(user_id = %request.user_id, %action, "Submit with missing or stale form token");
            return Err(RetentionError::Validation(vec![
                "Invalid form token. Please reload and try again.".to_string(),
            ]));
        }

        let reason = request.form.parsed_reason().ok_or_else(|| {
            RetentionError::Validation(vec!["Invalid cancellation reason".to_string()])
        })?;

        let policy = match action {
            SubmitAction::Discount => &self.config.rate_limits.discount,
            SubmitAction::Cancellation => &self.config.rate_limits.cancellation,
        };
        let check = self
            .limiter
            .check(&action.rate_limit_key(&request.user_id), policy);
        if !check.allowed {
            warn!(user_id = %request.user_id, %action, reset_at = %check.reset_at, "Submit rate limited");
            self.emit(
                FlowEventKind::RateLimited,
                &request.user_id,
                serde_json::json!({ "action": action, "reset_at": check.reset_at }),
            );
            return Err(RetentionError::RateLimited {
                action,
                reset_at: check.reset_at,
            });
        }

        Ok(NewCancellation {
            user_id: request.user_id.clone(),
            subscription_id: request.subscription_id.clone(),
            downsell_variant: request.variant,
            reason,
            accepted_downsell,
            feedback: request.form.feedback_text().map(sanitize_input),
        })
    }

    async fn persisted<T>(
        &self,
        user_id: &str,
        operation: &'static str,
        call: impl Future<Output = RetentionResult<T>>,
    ) -> RetentionResult<T> {
        match call.await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(user_id, operation, error = %e, "Persistence call failed");
                metrics::counter!("retention.persistence.failed", "operation" => operation)
                    .increment(1);
                self.emit(
                    FlowEventKind::PersistenceFailed,
                    user_id,
                    serde_json::json!({ "operation": operation, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }

    fn emit(&self, kind: FlowEventKind, user_id: &str, detail: serde_json::Value) {
        let user = (!user_id.is_empty()).then_some(user_id);
        self.event_sink.emit(make_event(kind, user, detail));
    }
}
