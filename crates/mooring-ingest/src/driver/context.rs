//! Per data-source context: queue, in-process marker and callback bindings.

use super::callbacks::{DriverCallbacks, DriverEvent, DriverException};
use crate::config::Topology;
use crate::harvester::{write_state, HarvestEvent, HarvestHandler, SharedState};
use mooring_common::types::{CursorState, DataSourceLocation, FileRecord};
use mooring_common::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State one data source shares between its harvester task and its
/// publisher loop.
///
/// Single-directory sources queue every new file. Single-file sources keep
/// at most one pending snapshot in `next_state`; a newer snapshot replaces
/// it, and it only becomes `in_process` once the current drain is finished.
pub struct SourceContext {
    pub key: String,
    pub topology: Topology,
    pub(crate) state: SharedState,
    pub(crate) callbacks: Arc<dyn DriverCallbacks>,
    queue: Mutex<VecDeque<FileRecord>>,
    next_state: Mutex<Option<FileRecord>>,
    in_process: Mutex<Option<FileRecord>>,
    location: Mutex<DataSourceLocation>,
}

impl SourceContext {
    pub fn new(
        key: impl Into<String>,
        topology: Topology,
        state: SharedState,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Self {
        Self {
            key: key.into(),
            topology,
            state,
            callbacks,
            queue: Mutex::new(VecDeque::new()),
            next_state: Mutex::new(None),
            in_process: Mutex::new(None),
            location: Mutex::new(DataSourceLocation::default()),
        }
    }

    /// Next file to drain, marking it in process. Returns `None` while a
    /// drain is still in progress.
    pub fn take_next(&self) -> Option<FileRecord> {
        let mut in_process = lock(&self.in_process);
        if in_process.is_some() {
            return None;
        }
        let next = match self.topology {
            Topology::SingleDirectory => lock(&self.queue).pop_front(),
            Topology::SingleFile => lock(&self.next_state).take(),
        };
        *in_process = next.clone();
        next
    }

    /// The current drain is over.
    pub fn finish(&self) {
        *lock(&self.in_process) = None;
    }

    pub fn in_process(&self) -> Option<FileRecord> {
        lock(&self.in_process).clone()
    }

    pub fn pending(&self) -> usize {
        match self.topology {
            Topology::SingleDirectory => lock(&self.queue).len(),
            Topology::SingleFile => usize::from(lock(&self.next_state).is_some()),
        }
    }

    pub fn location(&self) -> DataSourceLocation {
        lock(&self.location).clone()
    }

    pub fn update_location(&self, cursor: CursorState, file: &str) -> Result<()> {
        lock(&self.location).update(Some(cursor), Some(file.to_string()))
    }

    fn enqueue(&self, record: FileRecord) {
        match self.topology {
            Topology::SingleDirectory => lock(&self.queue).push_back(record),
            Topology::SingleFile => *lock(&self.next_state) = Some(record),
        }
    }

    fn modified_after_ingestion(&self, current: FileRecord) {
        let mut ingested_checksum = None;
        {
            let mut state = write_state(&self.state);
            let updated = state.update_file(&self.key, &current.name, |record| {
                ingested_checksum = Some(record.checksum.clone());
                record.mark_modified(&current);
            });
            // still under the lock, so this memento cannot overtake a commit
            if updated {
                self.callbacks.on_state_change(&state);
            }
        }

        warn!(key = %self.key, file = %current.name, "file modified after ingestion");
        self.callbacks.on_event(DriverEvent::ModifiedAfterIngestion {
            key: self.key.clone(),
            file: current.name.clone(),
            ingested_checksum: ingested_checksum.unwrap_or_default(),
            current_checksum: current.checksum,
            size: current.size,
        });
    }
}

impl HarvestHandler for SourceContext {
    fn handle(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::NewFile(record) => {
                info!(key = %self.key, file = %record.name, "queued for parsing");
                self.callbacks.on_event(DriverEvent::NewFile {
                    key: self.key.clone(),
                    file: record.name.clone(),
                    size: record.size,
                });
                self.enqueue(record);
            }
            HarvestEvent::FileChanged(record) => match self.topology {
                Topology::SingleDirectory => self.modified_after_ingestion(record),
                Topology::SingleFile => self.enqueue(record),
            },
            HarvestEvent::Error(error) => {
                self.callbacks
                    .on_exception(DriverException::for_source(&self.key, error));
            }
        }
    }
}
