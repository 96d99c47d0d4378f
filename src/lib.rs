//! Library entrypoint for wager-engine.
//!
//! Exposes all modules so integration tests can import them.

pub mod config;
pub mod data;
pub mod errors;
pub mod execution;
pub mod risk;
pub mod state;
pub mod strategies;
