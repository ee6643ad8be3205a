//! CLI surface for swarmq.

pub mod commands;

pub use commands::Cli;
