//! Infrastructure layer
//!
//! Concrete adapters behind the domain traits: graph stores and the
//! embedding gateway.

pub mod embedding;
pub mod knowledge;
