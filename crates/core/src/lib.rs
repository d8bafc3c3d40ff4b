pub mod config;
pub mod error;
pub mod event_bus;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{RetentionError, RetentionResult};
pub use store::CancellationStore;
