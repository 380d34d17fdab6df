//! # tc-av
//!
//! Encoder execution for the transcoder.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and nvidia-smi.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   and cancellation support, capturing combined output and duration.
//! - **Platform detection** ([`PlatformCapabilities`]) -- which hardware
//!   encoder path is usable, with a synchronized downgrade flag
//!   ([`HardwareState`]).
//! - **Profiles** ([`ProfileRegistry`]) -- the built-in transcode profiles
//!   plus configured additions, and the generic argument builder.
//! - **Engine** ([`ExecutionEngine`]) -- run a profile with one software
//!   retry after a hardware failure, and the raw-argument test entry point.

pub mod builder;
pub mod command;
pub mod engine;
pub mod platform;
pub mod profiles;
pub mod tools;

// ---- Re-exports for convenience ----

pub use builder::build_args;
pub use command::{ToolCommand, ToolOutput};
pub use engine::{EncodeFailure, EncodeReport, ExecutionEngine};
pub use platform::{CapabilitySnapshot, HardwareState, Platform, PlatformCapabilities};
pub use profiles::ProfileRegistry;
pub use tools::{ToolInfo, ToolRegistry};
