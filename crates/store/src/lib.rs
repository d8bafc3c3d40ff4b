//! Storage backends for the cancellation flow.

pub mod memory;

pub use memory::MemoryStore;
