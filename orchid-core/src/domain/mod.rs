//! Core domain types
//!
//! Executions are produced and mutated by the engine; jobs, steps and machines
//! are read from the configuration directory and never change at runtime.

pub mod execution;
pub mod server;
pub mod setup;
