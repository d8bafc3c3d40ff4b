//! Screen-flow controller for the subscription cancellation wizard:
//! current/previous screen tracking, named user actions and the modal's
//! open/close lifecycle.

pub mod state_machine;

pub use state_machine::{FlowAction, FlowController, FlowTransition};
