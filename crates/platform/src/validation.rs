//! Input validation and sanitization for the cancellation forms.
//!
//! Every validator is a pure function returning a `ValidationResult` whose
//! `errors` are ready to show next to the offending field.

use once_cell::sync::Lazy;
use regex::Regex;
use retention_core::config::ValidationConfig;
use retention_core::types::{CancellationForm, CancellationReason, JobSearchSurvey, VisaAnswers};
use retention_core::{RetentionError, RetentionResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FEEDBACK_MIN_LENGTH: usize = 25;
pub const PRICE_MIN: f64 = 0.01;
pub const PRICE_MAX: f64 = 1000.0;

/// Answer buckets for "roles applied" and "companies emailed".
pub const ACTIVITY_BUCKETS: [&str; 4] = ["0", "1-5", "6-20", "20+"];
/// Answer buckets for "companies interviewed".
pub const INTERVIEW_BUCKETS: [&str; 4] = ["0", "1-2", "3-5", "5+"];

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("uuid pattern compiles")
});

static XSS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<script|javascript:|on\w+\s*=|<iframe|<object|<embed|vbscript:|data:")
        .expect("xss pattern compiles")
});

/// Whole dangerous elements, opening tag through the first matching close.
static ELEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script>|<iframe\b.*?</iframe>|<object\b.*?</object>|<embed\b.*?</embed>",
    )
    .expect("element pattern compiles")
});

static INLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)javascript:|on\w+\s*=").expect("inline pattern compiles")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn ok() -> Self {
        Self::from_errors(Vec::new())
    }

    /// Appends `other`'s errors after this result's.
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.is_valid = self.errors.is_empty();
        self
    }

    pub fn into_result(self) -> RetentionResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(RetentionError::Validation(self.errors))
        }
    }
}

pub fn validate_cancellation_reason(reason: &str) -> ValidationResult {
    let mut errors = Vec::new();
    if reason.trim().is_empty() {
        errors.push("Cancellation reason is required".to_string());
    }
    if reason.parse::<CancellationReason>().is_err() {
        errors.push("Invalid cancellation reason".to_string());
    }
    ValidationResult::from_errors(errors)
}

/// Accepts `$`, `,` and whitespace around the number; the value must fall in
/// [0.01, 1000].
pub fn validate_price_input(price: &str) -> ValidationResult {
    validate_price_in_range(price, PRICE_MIN, PRICE_MAX)
}

pub fn validate_price_in_range(price: &str, min: f64, max: f64) -> ValidationResult {
    if price.trim().is_empty() {
        return ValidationResult::from_errors(vec!["Price input is required".to_string()]);
    }

    let clean: String = price
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    let errors = match clean.parse::<f64>() {
        Ok(value) if !value.is_nan() => {
            if value < min || value > max {
                vec![format!("Price must be between ${min} and ${max}")]
            } else {
                Vec::new()
            }
        }
        _ => vec!["Please enter a valid price".to_string()],
    };
    ValidationResult::from_errors(errors)
}

/// Free-text feedback: required, at least `min_length` characters after
/// trimming, and free of markup or script URIs.
pub fn validate_feedback(feedback: &str, min_length: usize) -> ValidationResult {
    let trimmed = feedback.trim();
    if trimmed.is_empty() {
        return ValidationResult::from_errors(vec!["Feedback is required".to_string()]);
    }

    let mut errors = Vec::new();
    if trimmed.chars().count() < min_length {
        errors.push(format!(
            "Feedback must be at least {min_length} characters long"
        ));
    }
    if contains_xss(feedback) {
        errors.push("Feedback contains invalid content".to_string());
    }
    ValidationResult::from_errors(errors)
}

pub fn validate_user_id(user_id: &str) -> ValidationResult {
    validate_uuid_field(user_id, "User ID", "user ID")
}

pub fn validate_subscription_id(subscription_id: &str) -> ValidationResult {
    validate_uuid_field(subscription_id, "Subscription ID", "subscription ID")
}

fn validate_uuid_field(value: &str, label: &str, lower: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return ValidationResult::from_errors(vec![format!("{label} is required")]);
    }
    if !UUID_RE.is_match(value) {
        return ValidationResult::from_errors(vec![format!("Invalid {lower} format")]);
    }
    ValidationResult::ok()
}

/// Full check of the final cancellation form: the reason, then whichever
/// companion input that reason asks for.
pub fn validate_form(form: &CancellationForm, config: &ValidationConfig) -> ValidationResult {
    let result = validate_cancellation_reason(&form.reason);
    match form.parsed_reason() {
        Some(reason) if reason.wants_price() => result.merge(validate_price_in_range(
            &form.price_input,
            config.price_min,
            config.price_max,
        )),
        Some(_) => result.merge(validate_feedback(&form.feedback, config.feedback_min_length)),
        None => result,
    }
}

/// The job-search questionnaire. `ask_found_with_us` is set on the
/// job-found screen, which has the extra first question.
pub fn validate_survey(survey: &JobSearchSurvey, ask_found_with_us: bool) -> ValidationResult {
    let mut errors = Vec::new();
    if ask_found_with_us && survey.found_with_us.is_none() {
        errors.push("Please tell us whether you found this job with us".to_string());
    }
    check_bucket(&survey.roles_applied, &ACTIVITY_BUCKETS, "roles applied", &mut errors);
    check_bucket(
        &survey.companies_emailed,
        &ACTIVITY_BUCKETS,
        "companies emailed",
        &mut errors,
    );
    check_bucket(
        &survey.companies_interviewed,
        &INTERVIEW_BUCKETS,
        "companies interviewed",
        &mut errors,
    );
    ValidationResult::from_errors(errors)
}

fn check_bucket(answer: &str, buckets: &[&str], question: &str, errors: &mut Vec<String>) {
    if answer.is_empty() {
        errors.push(format!("Please select how many {question}"));
    } else if !buckets.contains(&answer) {
        errors.push(format!("Invalid answer for {question}"));
    }
}

pub fn validate_visa(answers: &VisaAnswers) -> ValidationResult {
    let mut errors = Vec::new();
    if answers.has_immigration_lawyer.is_none() {
        errors.push("Please tell us whether your company provides an immigration lawyer".to_string());
    }
    if answers.visa_type.trim().is_empty() {
        errors.push("Visa type is required".to_string());
    } else if contains_xss(&answers.visa_type) {
        errors.push("Visa type contains invalid content".to_string());
    }
    ValidationResult::from_errors(errors)
}

/// Strips script-like elements, `javascript:` URIs and inline event
/// handlers, then trims.
pub fn sanitize_input(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let without_elements = ELEMENT_RE.replace_all(input, "");
    let without_inline = INLINE_RE.replace_all(&without_elements, "");
    without_inline.trim().to_string()
}

pub fn contains_xss(input: &str) -> bool {
    XSS_RE.is_match(input)
}
