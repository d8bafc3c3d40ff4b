use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of the cancellation wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenState {
    Initial,
    JobFound,
    Feedback,
    Visa,
    Downsell,
    OfferAccepted,
    OfferDeclined,
}

impl ScreenState {
    pub const ALL: [ScreenState; 7] = [
        ScreenState::Initial,
        ScreenState::JobFound,
        ScreenState::Feedback,
        ScreenState::Visa,
        ScreenState::Downsell,
        ScreenState::OfferAccepted,
        ScreenState::OfferDeclined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenState::Initial => "initial",
            ScreenState::JobFound => "job-found",
            ScreenState::Feedback => "feedback",
            ScreenState::Visa => "visa",
            ScreenState::Downsell => "downsell",
            ScreenState::OfferAccepted => "offer-accepted",
            ScreenState::OfferDeclined => "offer-declined",
        }
    }
}

impl fmt::Display for ScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downsell A/B bucket. A frames the offer as 50% off, B as a flat $10 off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::A => f.write_str("A"),
            Variant::B => f.write_str("B"),
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Variant::A),
            "B" | "b" => Ok(Variant::B),
            other => Err(format!("unknown downsell variant '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PendingCancellation,
}

/// The fixed set of reasons a user can pick on the final cancellation form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationReason {
    #[serde(rename = "Too expensive")]
    TooExpensive,
    #[serde(rename = "Platform not helpful")]
    PlatformNotHelpful,
    #[serde(rename = "Not enough relevant jobs")]
    NotEnoughRelevantJobs,
    #[serde(rename = "Decided not to move")]
    DecidedNotToMove,
    #[serde(rename = "Other")]
    Other,
}

impl CancellationReason {
    pub const ALL: [CancellationReason; 5] = [
        CancellationReason::TooExpensive,
        CancellationReason::PlatformNotHelpful,
        CancellationReason::NotEnoughRelevantJobs,
        CancellationReason::DecidedNotToMove,
        CancellationReason::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CancellationReason::TooExpensive => "Too expensive",
            CancellationReason::PlatformNotHelpful => "Platform not helpful",
            CancellationReason::NotEnoughRelevantJobs => "Not enough relevant jobs",
            CancellationReason::DecidedNotToMove => "Decided not to move",
            CancellationReason::Other => "Other",
        }
    }

    /// "Too expensive" asks for a price; every other reason asks for text.
    pub fn wants_price(&self) -> bool {
        matches!(self, CancellationReason::TooExpensive)
    }
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CancellationReason {
    type Err = String;

    /// Labels match exactly, the same way the form submits them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.label() == s)
            .ok_or_else(|| format!("unknown cancellation reason '{s}'"))
    }
}

/// Submit buttons guarded by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitAction {
    Discount,
    Cancellation,
}

impl SubmitAction {
    pub fn rate_limit_key(&self, user_id: &str) -> String {
        format!("{self}_{user_id}")
    }
}

impl fmt::Display for SubmitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitAction::Discount => f.write_str("discount"),
            SubmitAction::Cancellation => f.write_str("cancellation"),
        }
    }
}

/// Row of the `subscriptions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    /// Monthly price in cents.
    #[serde(rename = "monthly_price")]
    pub monthly_price_cents: u32,
    pub status: SubscriptionStatus,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `cancellations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub subscription_id: String,
    pub downsell_variant: Variant,
    pub reason: CancellationReason,
    pub accepted_downsell: bool,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a cancellation; the store assigns id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCancellation {
    pub user_id: String,
    pub subscription_id: String,
    pub downsell_variant: Variant,
    pub reason: CancellationReason,
    pub accepted_downsell: bool,
    pub feedback: Option<String>,
}

/// The only fields of a cancellation that may change after insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancellationPatch {
    pub accepted_downsell: Option<bool>,
    pub feedback: Option<String>,
}

impl CancellationPatch {
    /// Empty feedback strings are not written.
    pub fn is_empty(&self) -> bool {
        self.accepted_downsell.is_none()
            && self.feedback.as_deref().map_or(true, |f| f.is_empty())
    }
}

/// Raw input of the final cancellation form. `reason` stays a string so an
/// unknown label can be reported as a validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancellationForm {
    pub reason: String,
    #[serde(default)]
    pub price_input: String,
    #[serde(default)]
    pub feedback: String,
}

impl CancellationForm {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price_input = price.into();
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn parsed_reason(&self) -> Option<CancellationReason> {
        self.reason.parse().ok()
    }

    /// Free text belonging to the selected reason; "Too expensive" has none.
    pub fn feedback_text(&self) -> Option<&str> {
        match self.parsed_reason() {
            Some(reason) if !reason.wants_price() && !self.feedback.is_empty() => {
                Some(self.feedback.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    Yes,
    No,
}

/// Answers to the job-search questionnaire shown on the job-found and
/// offer-declined screens. Empty strings mean "not answered yet".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSearchSurvey {
    /// Only asked on the job-found screen.
    pub found_with_us: Option<YesNo>,
    pub roles_applied: String,
    pub companies_emailed: String,
    pub companies_interviewed: String,
}

/// Answers on the visa screen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisaAnswers {
    pub has_immigration_lawyer: Option<YesNo>,
    pub visa_type: String,
}

impl VisaAnswers {
    pub fn needs_visa_help(&self) -> bool {
        self.has_immigration_lawyer == Some(YesNo::No)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_state_serializes_kebab_case() {
        let json = serde_json::to_string(&ScreenState::OfferDeclined).unwrap();
        assert_eq!(json, "\"offer-declined\"");
        for screen in ScreenState::ALL {
            let json = serde_json::to_string(&screen).unwrap();
            assert_eq!(json.trim_matches('"'), screen.as_str());
        }
    }

    #[test]
    fn test_reason_labels_parse_exactly() {
        for reason in CancellationReason::ALL {
            assert_eq!(reason.label().parse::<CancellationReason>().unwrap(), reason);
        }
        assert!("too expensive".parse::<CancellationReason>().is_err());
        let json = serde_json::to_string(&CancellationReason::NotEnoughRelevantJobs).unwrap();
        assert_eq!(json, "\"Not enough relevant jobs\"");
    }

    #[test]
    fn test_rate_limit_keys() {
        assert_eq!(SubmitAction::Discount.rate_limit_key("u1"), "discount_u1");
        assert_eq!(SubmitAction::Cancellation.rate_limit_key("u1"), "cancellation_u1");
    }

    #[test]
    fn test_feedback_text_follows_reason() {
        let form = CancellationForm::new("Too expensive")
            .with_price("12")
            .with_feedback("ignored");
        assert_eq!(form.feedback_text(), None);

        let form = CancellationForm::new("Other").with_feedback("some words");
        assert_eq!(form.feedback_text(), Some("some words"));
    }

    #[test]
    fn test_patch_ignores_empty_feedback() {
        let patch = CancellationPatch {
            accepted_downsell: None,
            feedback: Some(String::new()),
        };
        assert!(patch.is_empty());
    }
}
