//! Bus lifecycle: one instance per context, created once and torn down on request.

pub mod directory;

pub use directory::{BusDirectory, InitState};
