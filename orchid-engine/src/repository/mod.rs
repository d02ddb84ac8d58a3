//! Repository layer
//!
//! Repositories own the engine's on-disk state: execution status records and
//! execution output files. They provide focused interfaces without any
//! pipeline logic.

mod output;
mod status;

// Re-export traits
pub use status::StatusStore;

// Re-export implementations
pub use output::{OutputChannels, OutputStream, OutputWriter};
pub use status::JournalStatusStore;
