// ABOUTME: Library module for tabledump
// ABOUTME: Exports the dump format, sessions and transfer commands for the binary and tests

pub mod commands;
pub mod config;
pub mod dump;
pub mod error;
pub mod filters;
pub mod ordering;
pub mod progress;
pub mod session;
pub mod source;
pub mod utils;
