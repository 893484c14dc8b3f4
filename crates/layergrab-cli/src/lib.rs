//! layergrab CLI library.
//!
//! Exposes the daemon client so integration tests can drive it against a
//! mock daemon.

pub mod client;
pub mod commands;
