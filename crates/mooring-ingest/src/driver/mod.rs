//! Dataset driver
//!
//! One [`DatasetDriver`] owns every configured data source. For each key it
//! runs a harvester task, which discovers files, and a publisher loop, which
//! drains them through a parser at a paced rate:
//!
//! ```text
//! harvester ──NewFile/FileChanged──▶ SourceContext ──▶ publisher ──▶ parser
//!                                                          │
//!                                   on_data / on_state_change / on_event
//! ```
//!
//! State is committed only after `on_data` has returned for a batch, so a
//! restart from the last memento never loses a delivered sample and at most
//! repeats the batch that was in flight.

pub mod callbacks;
pub mod context;
pub(crate) mod publisher;
pub mod resource;

use crate::config::DriverConfig;
use crate::harvester::{
    read_state, spawn_harvester, ConfiguredHarvesterFactory, HarvesterFactory, SharedState,
};
use crate::parser::{ConfiguredParserFactory, ParserFactory};
use futures::future::join_all;
use mooring_common::types::DriverState;
use mooring_common::{MooringError, Result};
use publisher::Publisher;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use callbacks::{DriverCallbacks, DriverEvent, DriverException};
pub use context::SourceContext;
pub use resource::{capabilities, DriverCommand, ResourceParams, ResourceQuery};

struct Sampling {
    cancel: CancellationToken,
    contexts: BTreeMap<String, Arc<SourceContext>>,
    harvesters: Vec<JoinHandle<()>>,
    publishers: Vec<JoinHandle<()>>,
}

pub struct DatasetDriver {
    config: DriverConfig,
    state: SharedState,
    callbacks: Arc<dyn DriverCallbacks>,
    harvesters: Arc<dyn HarvesterFactory>,
    parsers: Arc<dyn ParserFactory>,
    resource: Arc<RwLock<ResourceParams>>,
    sampling: Option<Sampling>,
}

impl DatasetDriver {
    /// Build a driver from configuration, resuming from `memento` if given.
    ///
    /// The configuration is validated here; nothing runs until
    /// [`start_sampling`](Self::start_sampling).
    pub fn new(
        config: DriverConfig,
        memento: Option<DriverState>,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Result<Self> {
        let harvesters = Arc::new(ConfiguredHarvesterFactory::new(config.harvester.clone()));
        let parsers = Arc::new(ConfiguredParserFactory::from_config(&config));
        Self::with_factories(config, memento, callbacks, harvesters, parsers)
    }

    /// Like [`new`](Self::new), with custom harvester and parser factories.
    pub fn with_factories(
        config: DriverConfig,
        memento: Option<DriverState>,
        callbacks: Arc<dyn DriverCallbacks>,
        harvesters: Arc<dyn HarvesterFactory>,
        parsers: Arc<dyn ParserFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let mut state = memento.unwrap_or_default();
        for key in config.keys() {
            state.ensure_source(key);
        }
        let resource = Arc::new(RwLock::new(config.resource));

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(state)),
            callbacks,
            harvesters,
            parsers,
            resource,
            sampling: None,
        })
    }

    /// Start one harvester and one publisher loop per data source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sampling(&mut self) -> Result<()> {
        if self.sampling.is_some() {
            return Err(MooringError::InvalidState("sampling already started".to_string()));
        }

        // build every harvester first so a failure leaves nothing running
        let mut built = Vec::new();
        for (key, config) in &self.config.harvester {
            let harvester = self.harvesters.create(key, self.state.clone())?;
            built.push((key.clone(), config.topology, config.directory.clone(), harvester));
        }

        let cancel = CancellationToken::new();
        let mut sampling = Sampling {
            cancel: cancel.clone(),
            contexts: BTreeMap::new(),
            harvesters: Vec::new(),
            publishers: Vec::new(),
        };

        for (key, topology, directory, harvester) in built {
            let context = Arc::new(SourceContext::new(
                key.clone(),
                topology,
                self.state.clone(),
                self.callbacks.clone(),
            ));

            sampling.harvesters.push(spawn_harvester(
                key.clone(),
                harvester,
                context.clone(),
                cancel.child_token(),
            ));
            sampling.publishers.push(
                Publisher::new(
                    context.clone(),
                    self.parsers.clone(),
                    self.resource.clone(),
                    directory,
                    cancel.child_token(),
                )
                .spawn(),
            );
            sampling.contexts.insert(key, context);
        }

        info!(sources = sampling.contexts.len(), "sampling started");
        self.sampling = Some(sampling);
        Ok(())
    }

    /// Stop every task. State stays exactly as last committed.
    pub async fn stop_sampling(&mut self) -> Result<()> {
        let Some(sampling) = self.sampling.take() else {
            return Err(MooringError::InvalidState("sampling is not started".to_string()));
        };

        sampling.cancel.cancel();
        for harvester in &sampling.harvesters {
            harvester.abort();
        }
        for result in join_all(sampling.harvesters).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!(error = %e, "harvester task failed");
                }
            }
        }
        for result in join_all(sampling.publishers).await {
            result.map_err(|e| MooringError::TaskJoin(e.to_string()))?;
        }

        info!("sampling stopped");
        Ok(())
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    /// Snapshot of the current memento.
    pub fn state(&self) -> DriverState {
        read_state(&self.state).clone()
    }

    /// Per-source context while sampling.
    pub fn context(&self, key: &str) -> Option<Arc<SourceContext>> {
        self.sampling
            .as_ref()
            .and_then(|s| s.contexts.get(key).cloned())
    }

    /// Commands valid right now.
    pub fn capabilities(&self) -> Vec<DriverCommand> {
        capabilities(self.is_sampling())
    }

    /// Update pacing parameters. Either all of `params` is applied or none.
    /// Running publishers pick the change up from their next batch.
    pub fn set_resource(&self, params: &Map<String, Value>) -> Result<()> {
        let mut resource = self.resource.write().unwrap_or_else(PoisonError::into_inner);
        resource.apply(params)?;
        info!(resource = ?*resource, "resource updated");
        Ok(())
    }

    pub fn get_resource(&self, query: &ResourceQuery) -> Result<Map<String, Value>> {
        self.resource
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .query(query)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl Drop for DatasetDriver {
    fn drop(&mut self) {
        if let Some(sampling) = self.sampling.take() {
            sampling.cancel.cancel();
            for task in sampling.harvesters.iter().chain(&sampling.publishers) {
                task.abort();
            }
        }
    }
}
