//! In-process job scheduler.
//!
//! Jobs carry a cron-like schedule and an async callback; the engine polls
//! once a second, enforces single-flight per job, and coalesces missed
//! ticks into one run. The job table lives in memory — it is the process's
//! only global mutable state besides the adapter registry, and both are
//! torn down on shutdown. Durable restart state belongs to the watermarks.

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{JobInfo, Scheduler};
pub use error::{Result, SchedulerError};
pub use schedule::{compute_next_run, parse_schedule, Schedule};
