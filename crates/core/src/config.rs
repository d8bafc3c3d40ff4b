use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `RETENTION_FLOW__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub offers: OfferConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
}

/// Downsell pricing knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferConfig {
    /// Used when the subscription price cannot be read.
    #[serde(default = "default_price_cents")]
    pub default_price_cents: u32,
    /// Variant B: flat amount off, in cents.
    #[serde(default = "default_flat_discount_cents")]
    pub flat_discount_cents: u32,
    /// Variant A: percentage off.
    #[serde(default = "default_percent_off")]
    pub percent_off: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_feedback_min_length")]
    pub feedback_min_length: usize,
    #[serde(default = "default_price_min")]
    pub price_min: f64,
    #[serde(default = "default_price_max")]
    pub price_max: f64,
}

/// Longest accepted rate-limit window: one year.
pub const MAX_RATE_LIMIT_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// A fixed-window budget: `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    /// The window as a signed duration, capped at
    /// `MAX_RATE_LIMIT_WINDOW_SECS`.
    pub fn window(&self) -> chrono::Duration {
        let secs = self.window_secs.min(MAX_RATE_LIMIT_WINDOW_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_discount_policy")]
    pub discount: RateLimitPolicy,
    #[serde(default = "default_cancellation_policy")]
    pub cancellation: RateLimitPolicy,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "retention-01".to_string()
}
fn default_price_cents() -> u32 {
    2500
}
fn default_flat_discount_cents() -> u32 {
    1000
}
fn default_percent_off() -> u8 {
    50
}
fn default_feedback_min_length() -> usize {
    25
}
fn default_price_min() -> f64 {
    0.01
}
fn default_price_max() -> f64 {
    1000.0
}
fn default_discount_policy() -> RateLimitPolicy {
    RateLimitPolicy {
        max_requests: 3,
        window_secs: 60,
    }
}
fn default_cancellation_policy() -> RateLimitPolicy {
    RateLimitPolicy {
        max_requests: 2,
        window_secs: 300,
    }
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            default_price_cents: default_price_cents(),
            flat_discount_cents: default_flat_discount_cents(),
            percent_off: default_percent_off(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            feedback_min_length: default_feedback_min_length(),
            price_min: default_price_min(),
            price_max: default_price_max(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            discount: default_discount_policy(),
            cancellation: default_cancellation_policy(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            offers: OfferConfig::default(),
            validation: ValidationConfig::default(),
            rate_limits: RateLimitSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("RETENTION_FLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        tracing::debug!(node_id = %config.node_id, "Configuration read from environment");
        Ok(config)
    }

    /// Rejects settings the flow cannot run with.
    pub fn validate(&self) -> Result<(), crate::RetentionError> {
        if self.offers.percent_off > 100 {
            return Err(crate::RetentionError::Config(format!(
                "offers.percent_off must be at most 100, got {}",
                self.offers.percent_off
            )));
        }
        if self.validation.price_min > self.validation.price_max {
            return Err(crate::RetentionError::Config(
                "validation.price_min exceeds validation.price_max".to_string(),
            ));
        }
        for (name, policy) in [
            ("discount", &self.rate_limits.discount),
            ("cancellation", &self.rate_limits.cancellation),
        ] {
            if policy.window_secs == 0 || policy.window_secs > MAX_RATE_LIMIT_WINDOW_SECS {
                return Err(crate::RetentionError::Config(format!(
                    "rate_limits.{name}.window_secs must be between 1 and {MAX_RATE_LIMIT_WINDOW_SECS}, got {}",
                    policy.window_secs
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_flow_policies() {
        let config = AppConfig::default();
        assert_eq!(config.offers.default_price_cents, 2500);
        assert_eq!(config.rate_limits.discount.max_requests, 3);
        assert_eq!(config.rate_limits.discount.window_secs, 60);
        assert_eq!(config.rate_limits.cancellation.max_requests, 2);
        assert_eq!(config.rate_limits.cancellation.window_secs, 300);
        assert_eq!(config.validation.feedback_min_length, 25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_percent_over_100() {
        let mut config = AppConfig::default();
        config.offers.percent_off = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_windows() {
        let mut config = AppConfig::default();
        config.rate_limits.cancellation.window_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(crate::RetentionError::Config(_))
        ));

        config.rate_limits.cancellation.window_secs = 0;
        assert!(config.validate().is_err());

        config.rate_limits.cancellation.window_secs = MAX_RATE_LIMIT_WINDOW_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_is_capped() {
        let policy = RateLimitPolicy {
            max_requests: 1,
            window_secs: u64::MAX,
        };
        assert_eq!(
            policy.window(),
            chrono::Duration::seconds(MAX_RATE_LIMIT_WINDOW_SECS as i64)
        );
    }
}
