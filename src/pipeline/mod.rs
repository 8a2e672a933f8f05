//! Orchestration: per-stage worker threads, the state machine, and the
//! public controller facade.

pub mod controller;
pub mod machine;
pub(crate) mod stage_worker;

pub use controller::PipelineController;
pub use machine::{PipelineState, StageSet};
