//! Infrastructure layer for framebus.
//!
//! Contains the concrete host transport (`hub`, an in-process frame tree
//! implementing the `Host`/`Port` traits from `framebus-core`) and the TOML
//! configuration loader.

pub mod config;
pub mod hub;

pub use hub::{LocalHost, LocalHub, LocalPort};
