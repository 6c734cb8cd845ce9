//! File harvesters
//!
//! A harvester watches one location on a fixed cadence and reports files
//! that are new or that changed. It never looks inside a file beyond
//! checksumming it. The persisted [`DriverState`] is the only thing it
//! consults to decide what is already known, and it only ever reads it.
//!
//! Each configured data source gets one harvester task (see
//! [`spawn_harvester`]). A harvester that hits an I/O error reports it and its
//! task stops; sampling has to be restarted to bring it back.

pub mod directory;
pub mod single_file;

use crate::config::{HarvesterConfig, Topology};
use mooring_common::types::{DriverState, FileRecord};
use mooring_common::{ConfigError, MooringError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

pub use directory::DirectoryHarvester;
pub use single_file::SingleFileHarvester;

/// Driver state shared between the driver (writer) and its harvesters (readers).
pub type SharedState = Arc<RwLock<DriverState>>;

/// Read access to shared state. A panic while another holder had the lock
/// does not make the memento unusable, so poisoning is ignored.
pub fn read_state(state: &SharedState) -> RwLockReadGuard<'_, DriverState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn write_state(state: &SharedState) -> RwLockWriteGuard<'_, DriverState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub enum HarvestEvent {
    /// A file to parse, carrying its persisted cursor if it has one
    NewFile(FileRecord),
    /// Current snapshot of a known file whose content changed
    FileChanged(FileRecord),
    /// The harvester cannot continue
    Error(MooringError),
}

pub trait Harvester: Send {
    /// Scan once and return what changed since the last call.
    ///
    /// Blocking: runs on the blocking thread pool.
    fn poll(&mut self) -> Vec<HarvestEvent>;

    fn poll_interval(&self) -> Duration;
}

/// Builds the harvester for one data source.
pub trait HarvesterFactory: Send + Sync {
    fn create(&self, key: &str, state: SharedState) -> Result<Box<dyn Harvester>>;
}

/// Receives harvest events for one data source.
pub trait HarvestHandler: Send + Sync {
    fn handle(&self, event: HarvestEvent);
}

/// Harvester factory driven by the `harvester` section of the configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredHarvesterFactory {
    harvesters: BTreeMap<String, HarvesterConfig>,
}

impl ConfiguredHarvesterFactory {
    pub fn new(harvesters: BTreeMap<String, HarvesterConfig>) -> Self {
        Self { harvesters }
    }
}

impl HarvesterFactory for ConfiguredHarvesterFactory {
    fn create(&self, key: &str, state: SharedState) -> Result<Box<dyn Harvester>> {
        let config = self.harvesters.get(key).ok_or_else(|| {
            MooringError::Configuration(ConfigError::UnmatchedSourceKey {
                key: key.to_string(),
                present_in: "parser",
                missing_from: "harvester",
            })
        })?;

        Ok(match config.topology {
            Topology::SingleDirectory => Box::new(DirectoryHarvester::new(key, config, state)?),
            Topology::SingleFile => Box::new(SingleFileHarvester::new(key, config, state)),
        })
    }
}

/// Whether a file last modified at `modified` has been left alone for at
/// least `window`. Modification times in the future count as just modified.
pub(crate) fn is_stable(modified: SystemTime, window: Duration) -> bool {
    if window.is_zero() {
        return true;
    }
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= window,
        Err(_) => false,
    }
}

/// Run `harvester` until cancelled or until it reports an error.
pub fn spawn_harvester(
    key: String,
    harvester: Box<dyn Harvester>,
    handler: Arc<dyn HarvestHandler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = tracing::info_span!("harvester", key = %key);
    tokio::spawn(
        async move {
            let interval = harvester.poll_interval();
            let mut slot = Some(harvester);
            info!(interval_ms = interval.as_millis() as u64, "harvester started");

            while let Some(mut harvester) = slot.take() {
                if cancel.is_cancelled() {
                    break;
                }

                let polled = tokio::task::spawn_blocking(move || {
                    let events = harvester.poll();
                    (harvester, events)
                })
                .await;

                let (harvester, events) = match polled {
                    Ok(result) => result,
                    Err(e) => {
                        handler.handle(HarvestEvent::Error(MooringError::TaskJoin(e.to_string())));
                        break;
                    }
                };

                let mut failed = false;
                for event in events {
                    if let HarvestEvent::Error(ref e) = event {
                        error!(error = %e, "harvester failed, stopping");
                        failed = true;
                    }
                    handler.handle(event);
                }
                if failed {
                    break;
                }
                slot = Some(harvester);

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }

            debug!("harvester stopped");
        }
        .instrument(span),
    )
}
