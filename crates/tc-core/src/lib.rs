//! tc-core: shared types, errors, configuration, and transcode profiles.
//!
//! This crate is the foundational dependency for all other tc-* crates,
//! providing the unified error type, the task and queue data model, the
//! structured transcode profile records, and application configuration.

pub mod config;
pub mod error;
pub mod message;
pub mod profile;
pub mod task;

// Re-export the most commonly used items at the crate root.
pub use error::{EncodeFailureKind, Error, Result};
pub use message::{QueueMessage, StorageEvent};
pub use profile::{AudioPolicy, Profile, ProfileKind, RateControl, Resolution, VideoCodec};
pub use task::*;
