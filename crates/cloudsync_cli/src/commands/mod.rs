//! CLI command implementations.

pub mod reset;
pub mod start;
pub mod status;
