use std::sync::Arc;

use retention_core::event_bus::{make_event, noop_sink, EventSink, FlowEventKind};
use retention_core::types::{ScreenState, Variant};
use retention_core::{RetentionError, RetentionResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A button press that moves the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    JobFound,
    StillLooking,
    JobFoundContinue,
    FeedbackContinue,
    AcceptDownsell,
    DeclineDownsell,
    VisaComplete,
    OfferAcceptedContinue,
    OfferDeclinedContinue,
}

/// Describes a single valid move between screens. `to == None` closes the
/// modal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTransition {
    pub from: ScreenState,
    pub to: Option<ScreenState>,
    pub action: FlowAction,
}

fn default_transitions() -> Vec<FlowTransition> {
    use FlowAction as A;
    use ScreenState as S;

    let step = |from: S, action: A, to: S| FlowTransition {
        from,
        to: Some(to),
        action,
    };
    let finish = |from: S, action: A| FlowTransition {
        from,
        to: None,
        action,
    };

    vec![
        // Initial ->
        step(S::Initial, A::JobFound, S::JobFound),
        step(S::Initial, A::StillLooking, S::Downsell),
        // Job found path
        step(S::JobFound, A::JobFoundContinue, S::Feedback),
        step(S::Feedback, A::FeedbackContinue, S::Visa),
        finish(S::Visa, A::VisaComplete),
        // Still looking path
        step(S::Downsell, A::AcceptDownsell, S::OfferAccepted),
        step(S::Downsell, A::DeclineDownsell, S::OfferDeclined),
        finish(S::OfferAccepted, A::OfferAcceptedContinue),
        finish(S::OfferDeclined, A::OfferDeclinedContinue),
    ]
}

/// Drives one modal session. Holds the current screen and the screen it was
/// reached from; everything else about the wizard lives in the host UI.
pub struct FlowController {
    user_id: String,
    open: bool,
    current: ScreenState,
    previous: Option<ScreenState>,
    variant: Option<Variant>,
    transitions: Vec<FlowTransition>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("user_id", &self.user_id)
            .field("open", &self.open)
            .field("current", &self.current)
            .field("previous", &self.previous)
            .field("variant", &self.variant)
            .finish()
    }
}

impl FlowController {
    /// A closed controller sitting on `initial`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            open: false,
            current: ScreenState::Initial,
            previous: None,
            variant: None,
            transitions: default_transitions(),
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink for emitting flow events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn current(&self) -> ScreenState {
        self.current
    }

    /// The back target; `initial` when there is no history.
    pub fn previous(&self) -> ScreenState {
        self.previous.unwrap_or(ScreenState::Initial)
    }

    pub fn variant(&self) -> Option<Variant> {
        self.variant
    }

    /// Records the resolved downsell bucket. The still-looking branch refuses
    /// to move until this is set.
    pub fn set_variant(&mut self, variant: Variant) {
        self.variant = Some(variant);
    }

    pub fn transitions(&self) -> &[FlowTransition] {
        &self.transitions
    }

    /// Shows the modal on the first screen with empty history.
    pub fn open(&mut self) {
        self.open = true;
        self.current = ScreenState::Initial;
        self.previous = None;
        info!(user_id = %self.user_id, "Cancellation flow opened");
        self.emit(FlowEventKind::ModalOpened, serde_json::json!({}));
    }

    /// Hides the modal and resets both screens to `initial`.
    pub fn close(&mut self) {
        let last = self.current;
        self.open = false;
        self.current = ScreenState::Initial;
        self.previous = None;
        info!(user_id = %self.user_id, last_screen = %last, "Cancellation flow closed");
        self.emit(FlowEventKind::ModalClosed, serde_json::json!({ "last_screen": last }));
    }

    /// Unconditional move: previous = current, current = target.
    pub fn navigate(&mut self, target: ScreenState) {
        let from = self.current;
        self.previous = Some(from);
        self.current = target;
        debug!(user_id = %self.user_id, %from, to = %target, "Screen changed");
        self.emit(
            FlowEventKind::ScreenChanged,
            serde_json::json!({ "from": from, "to": target }),
        );
    }

    /// Returns to the recorded previous screen, consuming it. With no
    /// history this lands on `initial`.
    pub fn back(&mut self) -> ScreenState {
        let from = self.current;
        let target = self.previous.take().unwrap_or(ScreenState::Initial);
        self.current = target;
        debug!(user_id = %self.user_id, %from, to = %target, "Navigated back");
        self.emit(
            FlowEventKind::ScreenChanged,
            serde_json::json!({ "from": from, "to": target, "back": true }),
        );
        target
    }

    /// Returns `true` if `action` is allowed from the current screen.
    pub fn can_apply(&self, action: FlowAction) -> bool {
        self.find(action).is_some()
    }

    /// Applies a user action and returns the screen now showing. Actions
    /// that finish the flow close the modal and return `initial`.
    pub fn apply(&mut self, action: FlowAction) -> RetentionResult<ScreenState> {
        if !self.open {
            return Err(RetentionError::Flow(format!(
                "{action:?} pressed while the cancellation modal is closed"
            )));
        }

        let transition = self.find(action).cloned().ok_or_else(|| {
            RetentionError::Flow(format!(
                "Invalid action {action:?} on screen {}",
                self.current
            ))
        })?;

        if action == FlowAction::StillLooking && self.variant.is_none() {
            return Err(RetentionError::Flow(
                "downsell variant not resolved yet".to_string(),
            ));
        }

        match transition.to {
            Some(target) => {
                self.navigate(target);
                Ok(target)
            }
            None => {
                self.close();
                Ok(ScreenState::Initial)
            }
        }
    }

    fn find(&self, action: FlowAction) -> Option<&FlowTransition> {
        self.transitions
            .iter()
            .find(|t| t.from == self.current && t.action == action)
    }

    fn emit(&self, kind: FlowEventKind, mut detail: serde_json::Value) {
        if let (Some(obj), Some(variant)) = (detail.as_object_mut(), self.variant) {
            obj.insert("variant".to_string(), serde_json::json!(variant));
        }
        self.event_sink
            .emit(make_event(kind, Some(&self.user_id), detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retention_core::event_bus::CaptureSink;

    fn opened() -> FlowController {
        let mut flow = FlowController::new("user-1");
        flow.open();
        flow
    }

    #[test]
    fn test_navigate_then_back_returns_to_initial() {
        let mut flow = opened();
        flow.navigate(ScreenState::JobFound);
        assert_eq!(flow.previous(), ScreenState::Initial);
        assert_eq!(flow.back(), ScreenState::Initial);
        assert_eq!(flow.current(), ScreenState::Initial);
    }

    #[test]
    fn test_back_from_feedback_returns_to_downsell() {
        let mut flow = opened();
        flow.navigate(ScreenState::Downsell);
        flow.navigate(ScreenState::Feedback);
        assert_eq!(flow.back(), ScreenState::Downsell);
    }

    #[test]
    fn test_back_without_history_defaults_to_initial() {
        let mut flow = opened();
        assert_eq!(flow.back(), ScreenState::Initial);

        flow.navigate(ScreenState::Visa);
        flow.back();
        // History was consumed by the first back.
        assert_eq!(flow.back(), ScreenState::Initial);
    }

    #[test]
    fn test_close_resets_both_screens() {
        let mut flow = opened();
        flow.navigate(ScreenState::Downsell);
        flow.navigate(ScreenState::OfferDeclined);
        flow.close();
        assert!(!flow.is_open());
        assert_eq!(flow.current(), ScreenState::Initial);
        assert_eq!(flow.previous(), ScreenState::Initial);
    }

    #[test]
    fn test_job_found_path_finishes_by_closing() {
        let mut flow = opened();
        assert_eq!(flow.apply(FlowAction::JobFound).unwrap(), ScreenState::JobFound);
        assert_eq!(
            flow.apply(FlowAction::JobFoundContinue).unwrap(),
            ScreenState::Feedback
        );
        assert_eq!(flow.apply(FlowAction::FeedbackContinue).unwrap(), ScreenState::Visa);
        assert_eq!(flow.previous(), ScreenState::Feedback);
        flow.apply(FlowAction::VisaComplete).unwrap();
        assert!(!flow.is_open());
    }

    #[test]
    fn test_transition_table_covers_every_screen() {
        let flow = FlowController::new("user-1");
        let table = flow.transitions();
        assert_eq!(table.len(), 9);

        // Every screen but `initial` is entered by some action.
        for screen in ScreenState::ALL {
            if screen != ScreenState::Initial {
                assert!(
                    table.iter().any(|t| t.to == Some(screen)),
                    "{screen} is unreachable"
                );
            }
        }

        let mut closing: Vec<ScreenState> = table
            .iter()
            .filter(|t| t.to.is_none())
            .map(|t| t.from)
            .collect();
        closing.sort_by_key(|s| s.as_str());
        assert_eq!(
            closing,
            vec![
                ScreenState::OfferAccepted,
                ScreenState::OfferDeclined,
                ScreenState::Visa
            ]
        );
    }

    #[test]
    fn test_still_looking_waits_for_variant() {
        let mut flow = opened();
        assert!(flow.apply(FlowAction::StillLooking).is_err());
        assert_eq!(flow.current(), ScreenState::Initial);

        flow.set_variant(Variant::B);
        assert_eq!(flow.apply(FlowAction::StillLooking).unwrap(), ScreenState::Downsell);
    }

    #[test]
    fn test_both_variants_reach_downsell() {
        for variant in [Variant::A, Variant::B] {
            let mut flow = opened();
            flow.set_variant(variant);
            flow.apply(FlowAction::StillLooking).unwrap();
            assert_eq!(flow.current(), ScreenState::Downsell);
            assert_eq!(
                flow.apply(FlowAction::DeclineDownsell).unwrap(),
                ScreenState::OfferDeclined
            );
        }
    }

    #[test]
    fn test_rejects_action_from_wrong_screen() {
        let mut flow = opened();
        assert!(!flow.can_apply(FlowAction::AcceptDownsell));
        let err = flow.apply(FlowAction::AcceptDownsell).unwrap_err();
        assert!(err.to_string().contains("AcceptDownsell"));
        assert_eq!(flow.current(), ScreenState::Initial);
    }

    #[test]
    fn test_rejects_action_while_closed() {
        let mut flow = FlowController::new("user-1");
        assert!(flow.apply(FlowAction::JobFound).is_err());
    }

    #[test]
    fn test_emits_screen_events() {
        let sink = Arc::new(CaptureSink::new());
        let mut flow = FlowController::new("user-1").with_event_sink(sink.clone());
        flow.open();
        flow.set_variant(Variant::A);
        flow.apply(FlowAction::StillLooking).unwrap();
        flow.apply(FlowAction::AcceptDownsell).unwrap();
        flow.apply(FlowAction::OfferAcceptedContinue).unwrap();

        assert_eq!(sink.count_kind(FlowEventKind::ModalOpened), 1);
        assert_eq!(sink.count_kind(FlowEventKind::ScreenChanged), 2);
        assert_eq!(sink.count_kind(FlowEventKind::ModalClosed), 1);

        let changed = sink
            .events()
            .into_iter()
            .find(|e| e.kind == FlowEventKind::ScreenChanged)
            .unwrap();
        assert_eq!(changed.detail["to"], "downsell");
        assert_eq!(changed.detail["variant"], "A");
    }
}
