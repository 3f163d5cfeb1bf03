//! Signal module - dedup, confirmation and outcome evaluation

pub mod dispatcher;
pub mod stores;

pub use dispatcher::{
    signal_hash, spawn_evaluation, DispatchDecision, EvaluationResult, Signal, SignalDispatcher,
};
pub use stores::ExpiryStore;
