//! Domain layer
//!
//! Contains the core graph model, resolution and retrieval logic.

pub mod knowledge;
pub mod locking;
