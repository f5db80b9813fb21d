//! Shared plumbing for the basalt server: logging setup and re-exports.

pub mod logging;
