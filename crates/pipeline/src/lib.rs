//! The documentation pipeline: a fixed linear sequence of stages over a
//! shared run state, plus the stage tools each step delegates to.

pub mod cancel;
pub mod prompt;
pub mod run_state;
pub mod stages;
pub mod tools;

pub use cancel::{CancelReason, CancelToken};
pub use run_state::RunState;
pub use stages::Pipeline;
