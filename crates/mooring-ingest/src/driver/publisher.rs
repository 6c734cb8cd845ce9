//! Paced publisher loop: one per data source.

use super::callbacks::{DriverEvent, DriverException};
use super::context::SourceContext;
use super::resource::ResourceParams;
use crate::harvester::{read_state, write_state};
use crate::parser::{Parser, ParserFactory, Stream};
use mooring_common::types::{CursorState, FileRecord};
use mooring_common::MooringError;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

pub(crate) struct Publisher {
    context: Arc<SourceContext>,
    parsers: Arc<dyn ParserFactory>,
    resource: Arc<RwLock<ResourceParams>>,
    directory: PathBuf,
    cancel: CancellationToken,
    /// Earliest time the next batch may be handed off
    next_allowed: Option<Instant>,
}

struct Opened {
    parser: Box<dyn Parser>,
    /// File length when it was opened
    size: u64,
    /// The resume cursor pointed past that length and was dropped
    truncated: bool,
}

/// Whether `cursor` points past the end of a file of `size` bytes.
pub(crate) fn is_truncated(cursor: &CursorState, size: u64) -> bool {
    match cursor {
        CursorState::ByteOffset { position } => *position > size,
        // unescaped lengths never exceed the raw size
        CursorState::RangeSet(state) => state.stream_length > size,
    }
}

impl Publisher {
    pub(crate) fn new(
        context: Arc<SourceContext>,
        parsers: Arc<dyn ParserFactory>,
        resource: Arc<RwLock<ResourceParams>>,
        directory: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context,
            parsers,
            resource,
            directory,
            cancel,
            next_allowed: None,
        }
    }

    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        let span = tracing::info_span!("publisher", key = %self.context.key);
        tokio::spawn(self.run().instrument(span))
    }

    fn resource(&self) -> ResourceParams {
        *self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(mut self) {
        info!("publisher started");

        while !self.cancel.is_cancelled() {
            if let Some(record) = self.context.take_next() {
                self.drain(record).await;
                self.context.finish();
                continue;
            }

            let interval = self.resource().poll_interval();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        debug!("publisher stopped");
    }

    fn exception(&self, error: MooringError) {
        self.context
            .callbacks
            .on_exception(DriverException::for_source(&self.context.key, error));
    }

    fn event(&self, event: DriverEvent) {
        self.context.callbacks.on_event(event);
    }

    /// Wait until the next batch may go out. `false` if cancelled meanwhile.
    async fn pace(&mut self) -> bool {
        if let Some(at) = self.next_allowed {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = tokio::time::sleep_until(at) => {}
            }
        }
        self.next_allowed = Some(Instant::now() + self.resource().delay());
        true
    }

    /// Cursor to resume `snapshot` from, raising a growth event when the
    /// harvester saw the file grow since the last commit. The persisted
    /// cursor wins over the one carried by the snapshot.
    fn resume_cursor(&self, snapshot: &FileRecord) -> Option<CursorState> {
        let key = &self.context.key;
        let persisted = read_state(&self.context.state)
            .file(key, &snapshot.name)
            .cloned();

        if let Some(previous) = &persisted {
            if snapshot.size > previous.size {
                self.event(DriverEvent::FileGrowth {
                    key: key.clone(),
                    file: snapshot.name.clone(),
                    previous_size: previous.size,
                    size: snapshot.size,
                });
            }
        }

        persisted
            .and_then(|r| r.parser_state)
            .or_else(|| snapshot.parser_state.clone())
    }

    /// Open the file and build its parser. A cursor past the end of the file
    /// as it is now is dropped and the file parsed from the start.
    async fn open(&self, snapshot: &FileRecord, cursor: Option<CursorState>) -> Option<Opened> {
        let path = self.directory.join(&snapshot.name);
        let parsers = self.parsers.clone();
        let key = self.context.key.clone();
        let name = snapshot.name.clone();

        let created = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path).map_err(|e| MooringError::harvester(&path, e))?;
            let size = file.metadata().map_err(|e| MooringError::harvester(&path, e))?.len();
            let truncated = cursor.as_ref().is_some_and(|c| is_truncated(c, size));
            let cursor = cursor.filter(|_| !truncated);
            let stream: Stream = Box::new(file);
            let parser = parsers.create(&key, cursor, stream, &name)?;
            Ok::<_, MooringError>(Opened {
                parser,
                size,
                truncated,
            })
        })
        .await;

        match created {
            Ok(Ok(opened)) => Some(opened),
            Ok(Err(e)) => {
                self.exception(e);
                None
            }
            Err(e) => {
                self.exception(MooringError::TaskJoin(e.to_string()));
                None
            }
        }
    }

    /// Drain one file through its parser, committing state after every batch.
    async fn drain(&mut self, snapshot: FileRecord) {
        let key = self.context.key.clone();
        let cursor = self.resume_cursor(&snapshot);
        let Some(Opened {
            mut parser,
            size,
            truncated,
        }) = self.open(&snapshot, cursor.clone()).await
        else {
            return;
        };

        if truncated {
            warn!(file = %snapshot.name, size, "file truncated, restarting from the beginning");
            self.event(DriverEvent::FileTruncated {
                key: key.clone(),
                file: snapshot.name.clone(),
                size,
            });
        }
        // commits describe the file as it was opened, not as first seen
        let mut snapshot = snapshot;
        snapshot.size = size;
        info!(file = %snapshot.name, resumed = cursor.is_some() && !truncated, "draining file");

        let mut delivered = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let batch_size = self.resource().batch_size;
            let polled = tokio::task::spawn_blocking(move || {
                let result = parser.get_records(batch_size);
                (parser, result)
            })
            .await;

            let batch = match polled {
                Ok((returned, Ok(batch))) => {
                    parser = returned;
                    batch
                }
                Ok((_, Err(e))) => {
                    warn!(file = %snapshot.name, error = %e, "stream failed");
                    self.exception(e);
                    return;
                }
                Err(e) => {
                    self.exception(MooringError::TaskJoin(e.to_string()));
                    return;
                }
            };

            for error in &batch.errors {
                warn!(file = %snapshot.name, position = error.position, error = %error.message, "sample decode failed");
                self.event(DriverEvent::SampleDecodeError {
                    key: key.clone(),
                    file: snapshot.name.clone(),
                    position: error.position,
                    message: error.message.clone(),
                });
            }
            for &(start, end) in &batch.unexpected {
                warn!(file = %snapshot.name, start, end, "unexpected data skipped");
                self.event(DriverEvent::UnexpectedData {
                    key: key.clone(),
                    file: snapshot.name.clone(),
                    start,
                    end,
                });
            }

            if !batch.samples.is_empty() {
                if !self.pace().await {
                    // not handed off, so not committed either
                    break;
                }
                delivered += batch.samples.len();
                self.context.callbacks.on_data(&key, batch.samples);
            }

            self.commit(&snapshot, &batch.cursor, batch.exhausted);

            if batch.exhausted {
                info!(file = %snapshot.name, delivered, "file drained");
                break;
            }
        }
    }

    fn commit(&self, snapshot: &FileRecord, cursor: &CursorState, exhausted: bool) {
        let key = &self.context.key;
        let mut record = snapshot.clone();
        record.parser_state = Some(cursor.clone());
        record.ingested = exhausted;

        if let Err(e) = self.context.update_location(cursor.clone(), &snapshot.name) {
            warn!(error = %e, "location update rejected");
        }

        // held through the callback so mementos go out in commit order
        let mut state = write_state(&self.context.state);
        if let Some(existing) = state.file(key, &record.name) {
            record.modified_state = existing.modified_state.clone();
        }
        state.upsert(key, record);
        self.context.callbacks.on_state_change(&state);
    }
}
