//! Single-directory topology: every file matching a glob is tracked on its own.

use super::{is_stable, read_state, HarvestEvent, Harvester, SharedState};
use crate::config::HarvesterConfig;
use chrono::{DateTime, Utc};
use mooring_common::checksum::compute_file_checksum;
use mooring_common::types::{ChecksumAlgorithm, FileRecord};
use mooring_common::{ConfigError, MooringError, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

pub struct DirectoryHarvester {
    key: String,
    directory: PathBuf,
    pattern: glob::Pattern,
    interval: Duration,
    stability_window: Duration,
    algorithm: ChecksumAlgorithm,
    state: SharedState,
    /// Files handed to the driver this session
    emitted: HashSet<String>,
    /// Last checksum reported as modified, per file
    reported_changes: HashMap<String, String>,
    /// Size and mtime each ingested file had when it was last hashed
    verified: HashMap<String, (u64, SystemTime)>,
}

struct Candidate {
    name: String,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DirectoryHarvester {
    pub fn new(key: &str, config: &HarvesterConfig, state: SharedState) -> Result<Self> {
        let pattern = glob::Pattern::new(&config.pattern).map_err(|e| ConfigError::InvalidPattern {
            key: key.to_string(),
            pattern: config.pattern.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            key: key.to_string(),
            directory: config.directory.clone(),
            pattern,
            interval: config.poll_interval(),
            stability_window: config.stability_window(),
            algorithm: config.checksum,
            state,
            emitted: HashSet::new(),
            reported_changes: HashMap::new(),
            verified: HashMap::new(),
        })
    }

    /// Matching regular files, oldest first.
    fn candidates(&self) -> Result<Vec<Candidate>> {
        let entries = std::fs::read_dir(&self.directory)
            .map_err(|e| MooringError::harvester(&self.directory, e))?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MooringError::harvester(&self.directory, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.pattern.matches(&name) {
                continue;
            }

            let path = entry.path();
            let metadata = entry.metadata().map_err(|e| MooringError::harvester(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(|e| MooringError::harvester(&path, e))?;

            candidates.push(Candidate {
                name,
                path,
                size: metadata.len(),
                modified,
            });
        }

        candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(candidates)
    }

    fn snapshot(&self, candidate: &Candidate) -> Result<FileRecord> {
        let checksum = compute_file_checksum(&candidate.path, self.algorithm).map_err(|e| match e {
            MooringError::Io(io) => MooringError::harvester(&candidate.path, io),
            other => other,
        })?;
        Ok(FileRecord::discovered(
            &candidate.name,
            candidate.size,
            DateTime::<Utc>::from(candidate.modified),
            checksum,
        ))
    }

    fn examine(&mut self, candidate: &Candidate) -> Result<Option<HarvestEvent>> {
        let known = read_state(&self.state).file(&self.key, &candidate.name).cloned();

        match known {
            None => {
                // queued already, not parsed far enough to be persisted
                if self.emitted.contains(&candidate.name) {
                    return Ok(None);
                }
                let record = self.snapshot(candidate)?;
                info!(key = %self.key, file = %record.name, size = record.size, "new file detected");
                self.emitted.insert(candidate.name.clone());
                Ok(Some(HarvestEvent::NewFile(record)))
            }
            Some(record) if !record.ingested => {
                if !self.emitted.insert(candidate.name.clone()) {
                    return Ok(None);
                }
                info!(key = %self.key, file = %record.name, "resuming partially ingested file");
                Ok(Some(HarvestEvent::NewFile(record)))
            }
            Some(record) => {
                let mod_time = DateTime::<Utc>::from(candidate.modified);
                if record.size == candidate.size && record.mod_time == mod_time {
                    return Ok(None);
                }
                let metadata = (candidate.size, candidate.modified);
                if self.verified.get(&candidate.name) == Some(&metadata) {
                    return Ok(None);
                }

                let current = self.snapshot(candidate)?;
                self.verified.insert(candidate.name.clone(), metadata);
                if current.checksum == record.checksum {
                    debug!(key = %self.key, file = %current.name, "metadata changed, content did not");
                    return Ok(None);
                }
                let already_reported = self.reported_changes.get(&current.name) == Some(&current.checksum)
                    || record
                        .modified_state
                        .as_ref()
                        .is_some_and(|m| m.checksum == current.checksum);
                if already_reported {
                    return Ok(None);
                }

                self.reported_changes
                    .insert(current.name.clone(), current.checksum.clone());
                Ok(Some(HarvestEvent::FileChanged(current)))
            }
        }
    }
}

impl Harvester for DirectoryHarvester {
    fn poll(&mut self) -> Vec<HarvestEvent> {
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(e) => return vec![HarvestEvent::Error(e)],
        };

        let mut events = Vec::new();
        for candidate in candidates {
            if !is_stable(candidate.modified, self.stability_window) {
                debug!(key = %self.key, file = %candidate.name, "file still being written");
                continue;
            }
            match self.examine(&candidate) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    events.push(HarvestEvent::Error(e));
                    break;
                }
            }
        }
        events
    }

    fn poll_interval(&self) -> Duration {
        self.interval
    }
}
