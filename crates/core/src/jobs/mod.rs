// crates/core/src/jobs/mod.rs
//! Background job bookkeeping for long-running operations.
//!
//! Provides:
//! - `JobHandle` - cancellable handle owned by one running job
//! - `Group` - the jobs active for one operation name
//! - `Registry` - single-flight registration keyed by (operation, cache key)

pub mod handle;
pub mod registry;

pub use handle::{JobHandle, JobId, JobSnapshot};
pub use registry::{Group, Registry};
