//! Type-safe system command modules.
//!
//! Each struct implements `SystemCommand` and maps Rust fields to the exact
//! flags, stdin and working directory the underlying tool expects.

pub mod account;
pub mod setup;
