//! Request hygiene for the cancellation flow: input validation and
//! sanitization, submit rate limiting and form tokens.

pub mod rate_limit;
pub mod tokens;
pub mod validation;

pub use rate_limit::{spawn_sweeper, RateLimitResult, RateLimiter};
pub use tokens::{issue_form_token, verify_form_token};
pub use validation::ValidationResult;
