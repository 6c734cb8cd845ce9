//! Mooring Ingest Library
//!
//! Recovers instrument data from files that a mooring's data logger writes to
//! disk, turns them into decoded samples and remembers how far it got.
//!
//! # Pipeline
//!
//! - **Harvesters** ([`harvester`]): poll a directory or a single growing file
//! - **Chunkers** ([`chunker`]): split a raw byte stream into candidate records
//! - **Decoders** ([`decoder`]): turn one record into samples
//! - **Parsers** ([`parser`]): drive chunker and decoder over a file, with a
//!   resumable cursor
//! - **Driver** ([`driver`]): wires it together per data source, paces output
//!   and owns the persisted memento
//!
//! # Example
//!
//! ```no_run
//! use mooring_ingest::config::DriverConfig;
//! use mooring_ingest::driver::{DatasetDriver, DriverCallbacks};
//! use std::sync::Arc;
//!
//! async fn run(callbacks: Arc<dyn DriverCallbacks>) -> anyhow::Result<()> {
//!     let config = DriverConfig::load("mooring.toml")?;
//!     let mut driver = DatasetDriver::new(config, None, callbacks)?;
//!     driver.start_sampling()?;
//!     tokio::signal::ctrl_c().await?;
//!     driver.stop_sampling().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod chunker;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod harvester;
pub mod parser;

pub use config::DriverConfig;
pub use driver::{DatasetDriver, DriverCallbacks, DriverEvent, DriverException};
