//! Core types shared by the waypoint crates.
//!
//! Holds the rootcause-based `Result` alias and the ULID-backed identifiers
//! used by the timer registry and the transition engine.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, TimerId, TransitionId};
