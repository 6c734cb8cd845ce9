//! Single-file topology: one fixed file whose growth is followed.

use super::{is_stable, read_state, HarvestEvent, Harvester, SharedState};
use crate::config::HarvesterConfig;
use chrono::{DateTime, Utc};
use mooring_common::checksum::compute_file_checksum;
use mooring_common::types::{ChecksumAlgorithm, FileRecord};
use mooring_common::{MooringError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub struct SingleFileHarvester {
    key: String,
    path: PathBuf,
    name: String,
    interval: Duration,
    stability_window: Duration,
    algorithm: ChecksumAlgorithm,
    state: SharedState,
    /// Size and modification time at the last poll that produced a decision
    last_seen: Option<(u64, DateTime<Utc>)>,
}

impl SingleFileHarvester {
    pub fn new(key: &str, config: &HarvesterConfig, state: SharedState) -> Self {
        Self {
            key: key.to_string(),
            path: config.target(),
            name: config.pattern.clone(),
            interval: config.poll_interval(),
            stability_window: config.stability_window(),
            algorithm: config.checksum,
            state,
            last_seen: None,
        }
    }

    fn check(&mut self) -> Result<Option<HarvestEvent>> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MooringError::harvester(&self.path, e)),
        };
        let modified = metadata.modified().map_err(|e| MooringError::harvester(&self.path, e))?;
        if !is_stable(modified, self.stability_window) {
            debug!(key = %self.key, file = %self.name, "file still being written");
            return Ok(None);
        }

        let size = metadata.len();
        let mod_time = DateTime::<Utc>::from(modified);
        if self.last_seen == Some((size, mod_time)) {
            return Ok(None);
        }
        let first_sighting = self.last_seen.is_none();

        let known = read_state(&self.state).file(&self.key, &self.name).cloned();
        if let Some(record) = &known {
            if record.ingested && record.size == size && record.mod_time == mod_time {
                self.last_seen = Some((size, mod_time));
                return Ok(None);
            }
        }

        let checksum = compute_file_checksum(&self.path, self.algorithm).map_err(|e| match e {
            MooringError::Io(io) => MooringError::harvester(&self.path, io),
            other => other,
        })?;
        self.last_seen = Some((size, mod_time));

        if let Some(record) = &known {
            if record.ingested && record.checksum == checksum {
                return Ok(None);
            }
        }

        let snapshot = FileRecord::discovered(&self.name, size, mod_time, checksum);
        if known.is_none() && first_sighting {
            info!(key = %self.key, file = %self.name, size, "new file detected");
            Ok(Some(HarvestEvent::NewFile(snapshot)))
        } else {
            debug!(key = %self.key, file = %self.name, size, "file changed");
            Ok(Some(HarvestEvent::FileChanged(snapshot)))
        }
    }
}

impl Harvester for SingleFileHarvester {
    fn poll(&mut self) -> Vec<HarvestEvent> {
        match self.check() {
            Ok(Some(event)) => vec![event],
            Ok(None) => Vec::new(),
            Err(e) => vec![HarvestEvent::Error(e)],
        }
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}
