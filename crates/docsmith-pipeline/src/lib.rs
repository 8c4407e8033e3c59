//! The batch processor and pipeline orchestrator.
//!
//! One tick selects per-stream 24-hour windows behind the processing
//! watermark, groups the window's messages into conversations, and drives
//! the ordered step pipeline (filter → classify → enrich(RAG) → generate →
//! context-enrich → ruleset-review → validate → condense). Everything a
//! batch produces commits in one transaction together with the watermark
//! advance; a failed batch rolls back untouched and is retried next tick.

pub mod batch;
pub mod conversation;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod steps;

pub use batch::{BatchProcessor, TickSummary};
pub use conversation::{group_conversations, reply_depths, Conversation};
pub use error::{PipelineError, Result};
pub use orchestrator::{Orchestrator, PipelineContext, PipelineState, PipelineStep, StepOutcome};
