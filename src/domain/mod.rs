//! # Domain Layer
//!
//! Entities, repository traits and the real-time event model of the
//! delivery path. Nothing here depends on infrastructure or presentation.
//!
//! - **entities**: messages, delivery records, membership, presence, calls
//! - **events**: server -> client events, audiences and the publisher trait

pub mod entities;
pub mod events;

pub use entities::*;
pub use events::*;
