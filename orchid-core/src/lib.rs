//! Orchid Core
//!
//! Core types and abstractions shared by the Orchid engine, server, client and CLI.
//!
//! This crate contains:
//! - Domain types: executions, jobs, steps, machines and the remote server entry
//! - Output sentinels: the reserved lines that terminate an execution's output
//! - Setup loading: reading and validating the configuration directory
//! - DTOs: wire shapes that are not domain entities

pub mod domain;
pub mod dto;
pub mod error;
pub mod output;
pub mod setup;

pub use error::SetupError;
