//! Stream adapters and the stream manager.
//!
//! Each adapter pulls (or receives) messages from one kind of source and
//! normalises them into the unified shape; the database's
//! `(stream_id, message_id)` uniqueness makes repeated runs safe. The
//! manager owns the registry, schedules runs and disables streams that
//! keep failing.

pub mod adapter;
pub mod bot_chat;
pub mod chat_api;
pub mod error;
pub mod file_drop;
pub mod manager;

pub use adapter::{build_adapter, validate_config, AdapterContext, StreamAdapter};
pub use error::{Result, StreamError};
pub use manager::{StreamManager, StreamStatus};
