//! Mooring Common Library
//!
//! Shared types, utilities, and error handling for the mooring ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the error taxonomy shared by harvesters, parsers and the driver
//! - **Checksums**: content hashes used to identify harvested files
//! - **Types**: the persisted data model (file records, driver memento, cursors)
//! - **Logging**: one-shot `tracing` subscriber setup for binaries
//!
//! # Example
//!
//! ```no_run
//! use mooring_common::checksum::compute_file_checksum;
//! use mooring_common::types::ChecksumAlgorithm;
//!
//! fn fingerprint(path: &str) -> mooring_common::Result<()> {
//!     let checksum = compute_file_checksum(path, ChecksumAlgorithm::Sha256)?;
//!     tracing::info!(%checksum, "file fingerprinted");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ConfigError, MooringError, Result, SampleDecodeError};
