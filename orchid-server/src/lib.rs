//! Orchid Server
//!
//! HTTP front end of a local Orchid engine. Remote CLIs and peer engines
//! launch jobs, list executions and follow output through it.

pub mod api;
pub mod config;
