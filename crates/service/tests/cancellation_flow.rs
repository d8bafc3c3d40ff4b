//! End-to-end walk through the cancellation wizard over the in-memory store.

use std::sync::Arc;

use chrono::Utc;
use retention_core::config::AppConfig;
use retention_core::event_bus::{CaptureSink, FlowEventKind};
use retention_core::types::{CancellationForm, ScreenState, SubscriptionStatus};
use retention_core::RetentionError;
use retention_flow::{FlowAction, FlowController};
use retention_offers::{assign_variant, subscription_key, AssignmentSource, PriceSource, VariantAssigner};
use retention_platform::RateLimiter;
use retention_service::{CancellationService, SubmitRequest};
use retention_store::MemoryStore;

const USER: &str = "550e8400-e29b-41d4-a716-446655440000";
const SUB: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

struct Harness {
    store: Arc<MemoryStore>,
    sink: Arc<CaptureSink>,
    assigner: VariantAssigner<MemoryStore>,
    service: CancellationService<MemoryStore>,
}

fn harness() -> Harness {
    let config = AppConfig::default();
    let store = Arc::new(MemoryStore::new());
    store.seed_subscription(SUB, USER, 2500);
    let sink = Arc::new(CaptureSink::new());

    let assigner =
        VariantAssigner::new(store.clone(), config.offers.clone()).with_event_sink(sink.clone());
    let service = CancellationService::new(store.clone(), Arc::new(RateLimiter::new()), config)
        .with_event_sink(sink.clone());

    Harness {
        store,
        sink,
        assigner,
        service,
    }
}

#[tokio::test]
async fn test_still_looking_then_cancel() {
    let h = harness();
    let mut flow = FlowController::new(USER).with_event_sink(h.sink.clone());
    flow.open();

    // Pressing "still looking" before the variant resolves is refused.
    assert!(matches!(
        flow.apply(FlowAction::StillLooking),
        Err(RetentionError::Flow(_))
    ));

    let quote = h.assigner.quote(USER, SUB).await;
    assert_eq!(quote.assignment.source, AssignmentSource::Computed);
    assert_eq!(
        quote.assignment.variant,
        assign_variant(&subscription_key(USER, SUB))
    );
    assert_eq!(quote.pricing.source, PriceSource::Stored);
    assert_eq!(quote.pricing.original_cents, 2500);
    flow.set_variant(quote.assignment.variant);

    assert_eq!(flow.apply(FlowAction::StillLooking).unwrap(), ScreenState::Downsell);
    assert_eq!(
        flow.apply(FlowAction::DeclineDownsell).unwrap(),
        ScreenState::OfferDeclined
    );

    let token = h.service.issue_form_token(USER);
    let form = CancellationForm::new("Platform not helpful")
        .with_feedback("The matches I got were not relevant to my field at all");
    let receipt = h
        .service
        .complete_cancellation(SubmitRequest {
            user_id: USER.to_string(),
            subscription_id: SUB.to_string(),
            variant: quote.assignment.variant,
            form,
            form_token: token,
        })
        .await
        .unwrap();
    assert_eq!(receipt.subscription_status, SubscriptionStatus::PendingCancellation);
    assert!(receipt.cancellation.created_at <= Utc::now());

    assert_eq!(
        flow.apply(FlowAction::OfferDeclinedContinue).unwrap(),
        ScreenState::Initial
    );
    assert!(!flow.is_open());

    // A returning user sees the variant they were shown last time.
    let again = h.assigner.resolve(USER, SUB).await;
    assert_eq!(again.source, AssignmentSource::Stored);
    assert_eq!(again.variant, quote.assignment.variant);

    assert_eq!(h.sink.count_kind(FlowEventKind::ModalOpened), 1);
    assert_eq!(h.sink.count_kind(FlowEventKind::ModalClosed), 1);
    assert_eq!(h.sink.count_kind(FlowEventKind::CancellationRecorded), 1);
}

#[tokio::test]
async fn test_accepting_downsell_keeps_subscription() {
    let h = harness();
    let mut flow = FlowController::new(USER);
    flow.open();

    let quote = h.assigner.quote(USER, SUB).await;
    flow.set_variant(quote.assignment.variant);
    flow.apply(FlowAction::StillLooking).unwrap();
    assert_eq!(
        flow.apply(FlowAction::AcceptDownsell).unwrap(),
        ScreenState::OfferAccepted
    );

    let token = h.service.issue_form_token(USER);
    let receipt = h
        .service
        .accept_discount(SubmitRequest {
            user_id: USER.to_string(),
            subscription_id: SUB.to_string(),
            variant: quote.assignment.variant,
            form: CancellationForm::new("Too expensive").with_price("15"),
            form_token: token,
        })
        .await
        .unwrap();
    assert!(receipt.cancellation.accepted_downsell);
    assert_eq!(h.store.subscription(SUB).unwrap().status, SubscriptionStatus::Active);

    flow.apply(FlowAction::OfferAcceptedContinue).unwrap();
    assert!(!flow.is_open());

    let history = h.service.history(USER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, receipt.cancellation.id);
}

#[tokio::test]
async fn test_job_found_path_and_back_navigation() {
    let h = harness();
    let mut flow = FlowController::new(USER);
    flow.open();

    assert_eq!(flow.apply(FlowAction::JobFound).unwrap(), ScreenState::JobFound);
    assert_eq!(flow.apply(FlowAction::JobFoundContinue).unwrap(), ScreenState::Feedback);
    assert_eq!(flow.back(), ScreenState::JobFound);
    assert_eq!(flow.back(), ScreenState::Initial);

    flow.apply(FlowAction::JobFound).unwrap();
    flow.apply(FlowAction::JobFoundContinue).unwrap();
    assert_eq!(flow.apply(FlowAction::FeedbackContinue).unwrap(), ScreenState::Visa);
    flow.apply(FlowAction::VisaComplete).unwrap();
    assert!(!flow.is_open());

    // The job-found path never touches persistence.
    assert_eq!(h.store.cancellation_count(), 0);
}

#[tokio::test]
async fn test_outage_degrades_reads_and_fails_writes() {
    let h = harness();
    h.store.fail_reads(true);

    let quote = h.assigner.quote(USER, SUB).await;
    assert_eq!(quote.assignment.source, AssignmentSource::Computed);
    assert_eq!(quote.pricing.source, PriceSource::Fallback);
    assert_eq!(quote.pricing.original_cents, 2500);

    h.store.fail_reads(false);
    h.store.fail_writes(true);
    let token = h.service.issue_form_token(USER);
    let err = h
        .service
        .complete_cancellation(SubmitRequest {
            user_id: USER.to_string(),
            subscription_id: SUB.to_string(),
            variant: quote.assignment.variant,
            form: CancellationForm::new("Decided not to move")
                .with_feedback("Plans changed and I am staying where I am for now"),
            form_token: token,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RetentionError::Store(_)));
    assert_eq!(h.store.subscription(SUB).unwrap().status, SubscriptionStatus::Active);
    assert_eq!(h.sink.count_kind(FlowEventKind::PersistenceFailed), 1);
}
