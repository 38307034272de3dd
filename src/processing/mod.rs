//! Processing orchestration: queue, lanes, reconciliation, state machine

pub mod fast_lane;
pub mod queue;
pub mod reconciler;
pub mod state_machine;
pub mod worker;

pub use fast_lane::{FastLaneOutcome, FastLaneProcessor};
pub use queue::ProcessingQueue;
pub use reconciler::CallbackReconciler;
pub use state_machine::StateMachine;
pub use worker::HeavyLaneDispatcher;
