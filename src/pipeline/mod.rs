//! Step execution
//!
//! - [`Sequence`]: steps one at a time against one target, fail-fast
//! - [`Parallel`]: independent branches at the same time, never short-circuits
//! - [`Build`]: a target plus its steps, driven by the layer cache
//!
//! Every executed step appends a [`StepResult`] to the invocation's
//! [`ResultLog`], so nested and parallel runs report through one flat list.

mod build;
mod parallel;
mod result;
mod sequence;

pub use build::{Build, BuildTarget};
pub use parallel::Parallel;
pub use result::{ResultLog, StepResult, Tally};
pub use sequence::{run_step, Sequence, StepHook};
