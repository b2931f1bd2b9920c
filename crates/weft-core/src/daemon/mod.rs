//! Worker loops and their supervisor.
//!
//! A [`WorkerLoop`] is a long-running actor that drives the crawler one
//! cycle at a time. The [`LoopSupervisor`] reconciles the set of running
//! loops to the configured count and reacts to configuration changes.

mod supervisor;
mod worker;

pub use supervisor::{LoopHandle, LoopSupervisor};
pub use worker::{STOP_SENTINEL, WorkerLoop};
