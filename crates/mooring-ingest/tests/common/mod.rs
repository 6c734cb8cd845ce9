//! Shared helpers for driver integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use mooring_common::types::{DriverState, Sample};
use mooring_ingest::chunker::sieve::{BLOCK_END, SioHeader};
use mooring_ingest::driver::{DriverCallbacks, DriverEvent, DriverException};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Records every callback for later assertions.
#[derive(Default)]
pub struct Recorder {
    pub samples: Mutex<Vec<(String, Sample)>>,
    pub batches: Mutex<Vec<Instant>>,
    pub states: Mutex<Vec<DriverState>>,
    pub events: Mutex<Vec<DriverEvent>>,
    pub exceptions: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.source_offset)
            .collect()
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_events(&self, matches: impl Fn(&DriverEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().unwrap().clone()
    }
}

impl DriverCallbacks for Recorder {
    fn on_data(&self, key: &str, samples: Vec<Sample>) {
        self.batches.lock().unwrap().push(Instant::now());
        let mut recorded = self.samples.lock().unwrap();
        recorded.extend(samples.into_iter().map(|s| (key.to_string(), s)));
    }

    fn on_state_change(&self, state: &DriverState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_event(&self, event: DriverEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn on_exception(&self, exception: DriverException) {
        self.exceptions.lock().unwrap().push(exception.to_string());
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether `file` of source `key` has been fully ingested in `state`.
pub fn ingested(state: &DriverState, key: &str, file: &str) -> bool {
    state.file(key, file).is_some_and(|r| r.ingested)
}

/// `count` CSV lines with an ISO timestamp and a temperature column.
pub fn csv_lines(count: usize) -> String {
    (0..count)
        .map(|i| format!("2014-04-12T01:{:02}:00Z,{}.5\n", i % 60, 10 + i))
        .collect()
}

/// One SIO block with a correct checksum.
pub fn sio_block(id: &str, number: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
    let checksum = payload.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    let header = SioHeader {
        instrument_id: id.to_string(),
        controller_id: "1237601".to_string(),
        length: payload.len(),
        flag: 'u',
        timestamp,
        block_number: number,
        checksum,
    };
    let mut out = header.encode();
    out.extend_from_slice(payload);
    out.push(BLOCK_END);
    out
}

/// A delimited directory source, fast enough for tests.
pub fn directory_config(dir: &std::path::Path, batch_size: usize, records_per_second: f64) -> String {
    format!(
        r##"
[harvester.ctdbp]
directory = "{}"
pattern = "*.log"
frequency_secs = 0.05
file_mod_wait_time_secs = 0

[parser.ctdbp]
decoder = "delimited"
stream = "ctdbp_cd_dcl_instrument"
fields = ["time", "temperature"]
timestamp_column = "time"
comment_prefix = "#"

[resource]
records_per_second = {records_per_second}
batch_size = {batch_size}
publisher_polling_interval = 0.05
"##,
        dir.display()
    )
}

/// A multiplexed single-file source reading the `DO` instrument.
pub fn single_file_config(dir: &std::path::Path) -> String {
    format!(
        r#"
[harvester.dosta]
topology = "single_file"
directory = "{}"
pattern = "node59p1.dat"
frequency_secs = 0.05
file_mod_wait_time_secs = 0

[parser.dosta]
decoder = "sio"
stream = "dosta_abcdjm_sio"
instrument_id = "DO"
record_size = 4

[resource]
records_per_second = 1000
batch_size = 4
publisher_polling_interval = 0.05
"#,
        dir.display()
    )
}
