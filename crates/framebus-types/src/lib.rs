//! Shared wire and configuration types for framebus.
//!
//! This crate contains the envelope exchanged between contexts, the bus
//! configuration, and the error taxonomy used across the workspace.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod message;
