//! Submit actions of the cancellation flow: accepting the downsell,
//! completing a cancellation, and follow-up patches, applied over an injected
//! `CancellationStore`.

pub mod service;

pub use service::{CancellationService, SubmitReceipt, SubmitRequest};
