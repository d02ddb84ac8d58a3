//! Orchid execution engine
//!
//! Builds pipelines from job definitions, runs their steps on this host or
//! on remote machines over ssh, and records status and output for every
//! execution. Callers go through the [`Dispatcher`], which either runs work
//! in this process or forwards it to a remote Orchid server.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod repository;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use scheduler::{Dispatcher, LocalDispatcher, RemoteDispatcher};
