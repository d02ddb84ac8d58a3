//! Scheduler layer
//!
//! This layer decides where executions run and keeps track of the runs
//! launched by this process, from launch to their terminal state.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, LocalDispatcher, RemoteDispatcher};
