//! Retention CLI: operator tooling for the subscription cancellation flow.
//!
//! Computes variant assignments and offer quotes, validates form input, and
//! replays a scripted cancellation flow against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use retention_core::config::AppConfig;
use retention_core::event_bus::CaptureSink;
use retention_core::types::{CancellationForm, JobSearchSurvey, VisaAnswers, YesNo};
use retention_flow::{FlowAction, FlowController};
use retention_offers::{assign_variant, format_cents, subscription_key, VariantAssigner};
use retention_platform::validation::{validate_form, validate_survey, validate_visa};
use retention_platform::{spawn_sweeper, RateLimiter};
use retention_service::{CancellationService, SubmitRequest};
use retention_store::MemoryStore;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "retention-cli")]
#[command(about = "Subscription cancellation flow with A/B downsell offers")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "RETENTION_FLOW__NODE_ID")]
    node_id: Option<String>,

    /// Price used when a subscription's price cannot be read, in cents
    #[arg(long, env = "RETENTION_FLOW__OFFERS__DEFAULT_PRICE_CENTS")]
    default_price_cents: Option<u32>,

    /// Minimum feedback length (overrides config)
    #[arg(long, env = "RETENTION_FLOW__VALIDATION__FEEDBACK_MIN_LENGTH")]
    feedback_min_length: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the variant a user/subscription pair hashes to
    Assign {
        #[arg(long)]
        user: String,
        #[arg(long)]
        subscription: String,
    },
    /// Resolve the variant and price the downsell offer
    Quote {
        #[arg(long)]
        user: String,
        #[arg(long)]
        subscription: String,
        /// Seed the subscription at this monthly price; unseeded falls back
        /// to the default price
        #[arg(long)]
        price_cents: Option<u32>,
    },
    /// Validate final-form input and print the messages a user would see
    Validate {
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "")]
        price: String,
        #[arg(long, default_value = "")]
        feedback: String,
    },
    /// Replay a scripted flow against the in-memory store and print its events
    Simulate {
        #[arg(long, value_enum, default_value_t = Path::Cancel)]
        path: Path,
        /// Submit attempts to make, to exercise the rate limiter
        #[arg(long, default_value_t = 1)]
        attempts: u32,
        #[arg(long, default_value_t = 2500)]
        price_cents: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Path {
    /// Still looking, decline the downsell, cancel
    Cancel,
    /// Still looking, accept the downsell
    Discount,
    /// Found a job, answer the survey and visa questions
    JobFound,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(cents) = cli.default_price_cents {
        config.offers.default_price_cents = cents;
    }
    if let Some(min) = cli.feedback_min_length {
        config.validation.feedback_min_length = min;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        percent_off = config.offers.percent_off,
        flat_discount_cents = config.offers.flat_discount_cents,
        "Configuration loaded"
    );

    match cli.command {
        Command::Assign { user, subscription } => {
            let key = subscription_key(&user, &subscription);
            let variant = assign_variant(&key);
            print_json(&serde_json::json!({ "key": key, "variant": variant }))?;
        }
        Command::Quote {
            user,
            subscription,
            price_cents,
        } => {
            let store = Arc::new(MemoryStore::new());
            if let Some(cents) = price_cents {
                store.seed_subscription(&subscription, &user, cents);
            }
            let quote = VariantAssigner::new(store, config.offers.clone())
                .quote(&user, &subscription)
                .await;
            print_json(&serde_json::json!({
                "quote": quote,
                "original": format_cents(quote.pricing.original_cents),
                "discounted": format_cents(quote.pricing.discounted_cents),
            }))?;
        }
        Command::Validate {
            reason,
            price,
            feedback,
        } => {
            let form = CancellationForm::new(reason)
                .with_price(price)
                .with_feedback(feedback);
            let result = validate_form(&form, &config.validation);
            print_json(&serde_json::json!({
                "is_valid": result.is_valid,
                "errors": result.errors,
            }))?;
            if !result.is_valid {
                anyhow::bail!("form is invalid");
            }
        }
        Command::Simulate {
            path,
            attempts,
            price_cents,
        } => simulate(config, path, attempts, price_cents).await?,
    }

    Ok(())
}

async fn simulate(
    config: AppConfig,
    path: Path,
    attempts: u32,
    price_cents: u32,
) -> anyhow::Result<()> {
    let user_id = Uuid::new_v4().to_string();
    let subscription_id = Uuid::new_v4().to_string();

    let store = Arc::new(MemoryStore::new());
    store.seed_subscription(&subscription_id, &user_id, price_cents);
    let sink = Arc::new(CaptureSink::new());
    let limiter = Arc::new(RateLimiter::new());
    let sweeper = spawn_sweeper(
        limiter.clone(),
        Duration::from_secs(config.rate_limits.sweep_interval_secs.max(1)),
    );

    let assigner =
        VariantAssigner::new(store.clone(), config.offers.clone()).with_event_sink(sink.clone());
    let service = CancellationService::new(store.clone(), limiter, config)
        .with_event_sink(sink.clone());
    let mut flow = FlowController::new(user_id.clone()).with_event_sink(sink.clone());

    flow.open();
    let form_token = service.issue_form_token(&user_id);
    let quote = assigner.quote(&user_id, &subscription_id).await;
    flow.set_variant(quote.assignment.variant);

    match path {
        Path::JobFound => {
            flow.apply(FlowAction::JobFound)?;
            let survey = JobSearchSurvey {
                found_with_us: Some(YesNo::Yes),
                roles_applied: "1-5".to_string(),
                companies_emailed: "6-20".to_string(),
                companies_interviewed: "1-2".to_string(),
            };
            validate_survey(&survey, true).into_result()?;
            flow.apply(FlowAction::JobFoundContinue)?;
            flow.apply(FlowAction::FeedbackContinue)?;
            let visa = VisaAnswers {
                has_immigration_lawyer: Some(YesNo::No),
                visa_type: "H-1B".to_string(),
            };
            validate_visa(&visa).into_result()?;
            info!(needs_visa_help = visa.needs_visa_help(), "Visa answers collected");
            flow.apply(FlowAction::VisaComplete)?;
        }
        Path::Cancel | Path::Discount => {
            flow.apply(FlowAction::StillLooking)?;
            let accept = matches!(path, Path::Discount);
            flow.apply(if accept {
                FlowAction::AcceptDownsell
            } else {
                FlowAction::DeclineDownsell
            })?;

            for attempt in 1..=attempts.max(1) {
                let request = SubmitRequest {
                    user_id: user_id.clone(),
                    subscription_id: subscription_id.clone(),
                    variant: quote.assignment.variant,
                    form_token: form_token.clone(),
                    form: if accept {
                        CancellationForm::new("Too expensive")
                            .with_price(format_cents(quote.pricing.discounted_cents))
                    } else {
                        CancellationForm::new("Not enough relevant jobs")
                            .with_feedback("Most listings did not match my experience level")
                    },
                };
                let outcome = if accept {
                    service.accept_discount(request).await
                } else {
                    service.complete_cancellation(request).await
                };
                match outcome {
                    Ok(receipt) => info!(
                        attempt,
                        cancellation_id = %receipt.cancellation.id,
                        status = ?receipt.subscription_status,
                        "Submit accepted"
                    ),
                    Err(e) => warn!(attempt, messages = ?e.user_messages(), "Submit rejected"),
                }
            }

            flow.apply(if accept {
                FlowAction::OfferAcceptedContinue
            } else {
                FlowAction::OfferDeclinedContinue
            })?;
        }
    }

    service.revoke_form_token(&user_id);
    sweeper.abort();

    for event in sink.events() {
        println!("{}", serde_json::to_string(&event)?);
    }
    print_json(&serde_json::json!({
        "user_id": user_id,
        "quote": quote,
        "history": service.history(&user_id).await?,
        "subscription": store.subscription(&subscription_id),
    }))?;
    Ok(())
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
