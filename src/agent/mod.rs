//! The plan → act-or-escalate → resume control loop.

pub mod intent;
pub mod runner;

pub use intent::{NextStep, StepClass};
pub use runner::{AgentRunner, CompletionEvent, Outcome};
