//! Prism CLI library.
//!
//! Wires the lock manager, task store, broadcast hub and terraform executor
//! together behind the `prism` binary.

pub mod cli;
pub mod commands;
pub mod config;
