//! Root of the `vetting-core` library: optimistic vote submission and row
//! reconciliation for a collaborative vetting client.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output goes through tracing or the engine's event stream.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod checksum;
pub mod config_loader;
pub mod config_types;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod events;
pub mod page;
pub mod pending;
pub mod protocol;
pub mod queue;
pub mod reconcile;
mod refresh;
pub mod row;
pub mod status;
mod sync;
pub mod timing;
pub mod transport;
pub mod vote;

#[cfg(test)]
mod test_support;

pub use config_loader::ConfigLoader;
pub use config_types::EngineConfig;
pub use engine::VettingEngine;
pub use error::EngineError;
pub use error::Result;
pub use error::TransportError;
pub use events::EngineEvent;
pub use reconcile::ApplyOutcome;
pub use reconcile::SnapshotOrigin;
pub use row::PageId;
pub use row::RowHash;
pub use row::RowId;
pub use vote::VoteChoice;
pub use vote::VoteReport;
