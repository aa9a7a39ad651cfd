//! Per-title locking for concept merges
//!
//! The resolver serializes merges that touch the same normalized name. Locks are
//! in-process async mutexes keyed by normalized title; disjoint batches run in
//! parallel, and retrieval never takes them.
//!
//! # Example
//!
//! ```ignore
//! use syllabus_core::domain::locking::{LockConfig, TitleLockManager};
//!
//! let manager = TitleLockManager::new(LockConfig::default());
//! let guard = manager.acquire_titles(["gradient descent".to_string()], None).await?;
//!
//! // Plan and commit the merge...
//!
//! // Locks are released when the guard is dropped
//! ```

pub mod guard;
pub mod manager;
pub mod types;

pub use guard::TitleLockGuard;
pub use manager::TitleLockManager;
pub use types::{LockConfig, LockError, LockResult};
