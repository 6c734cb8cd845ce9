//! Driver configuration
//!
//! A configuration has two required sections keyed by data-source key,
//! `harvester` and `parser`, plus an optional `resource` section with the
//! pacing parameters:
//!
//! ```toml
//! [harvester.ctdbp]
//! directory = "/data/ctdbp"
//! pattern = "*.log"
//! frequency_secs = 5
//! file_mod_wait_time_secs = 30
//!
//! [parser.ctdbp]
//! decoder = "delimited"
//! stream = "ctdbp_cd_dcl_instrument"
//! fields = ["time", "temperature", "conductivity", "pressure"]
//! timestamp_column = "time"
//! comment_prefix = "#"
//!
//! [resource]
//! records_per_second = 60
//! batch_size = 10
//! ```
//!
//! Any value can be overridden from the environment with `MOORING__`
//! variables, e.g. `MOORING__HARVESTER__CTDBP__FREQUENCY_SECS=1`.

use crate::driver::resource::ResourceParams;
use mooring_common::types::ChecksumAlgorithm;
use mooring_common::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keys that would collide with top-level fields of the persisted state.
pub const RESERVED_KEYS: [&str; 1] = ["version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Many files matching a glob under one directory
    #[default]
    SingleDirectory,
    /// One fixed file whose growth is followed
    SingleFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    #[serde(default)]
    pub topology: Topology,
    /// Watched directory
    pub directory: PathBuf,
    /// Glob for single-directory sources, exact file name for single-file ones
    pub pattern: String,
    /// Seconds between polls
    #[serde(default = "default_frequency")]
    pub frequency_secs: f64,
    /// Files modified more recently than this are left for a later poll
    #[serde(default)]
    pub file_mod_wait_time_secs: f64,
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,
}

fn default_frequency() -> f64 {
    1.0
}

impl HarvesterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.frequency_secs).unwrap_or(Duration::ZERO)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.file_mod_wait_time_secs).unwrap_or(Duration::ZERO)
    }

    /// What this source watches: the directory joined with the pattern.
    pub fn target(&self) -> PathBuf {
        self.directory.join(&self.pattern)
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if !(self.frequency_secs.is_finite() && self.frequency_secs > 0.0) {
            return Err(ConfigError::invalid(key, "frequency_secs", "must be greater than 0"));
        }
        if !(self.file_mod_wait_time_secs.is_finite() && self.file_mod_wait_time_secs >= 0.0) {
            return Err(ConfigError::invalid(
                key,
                "file_mod_wait_time_secs",
                "must be 0 or greater",
            ));
        }
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::invalid(key, "directory", "must not be empty"));
        }
        if self.pattern.is_empty() {
            return Err(ConfigError::invalid(key, "pattern", "must not be empty"));
        }

        match self.topology {
            Topology::SingleDirectory => {
                glob::Pattern::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
                    key: key.to_string(),
                    pattern: self.pattern.clone(),
                    reason: e.to_string(),
                })?;
            }
            Topology::SingleFile => {
                if self.pattern.contains(['*', '?', '[', ']']) || self.pattern.contains('/') {
                    return Err(ConfigError::InvalidPattern {
                        key: key.to_string(),
                        pattern: self.pattern.clone(),
                        reason: "a single-file source needs a plain file name".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedConfig {
    pub stream: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    pub fields: Vec<String>,
    /// Field parsed as an RFC 3339 timestamp instead of a number
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub comment_prefix: Option<String>,
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SioConfig {
    pub stream: String,
    /// Two-letter id of the instrument this parser keeps; other blocks are skipped
    pub instrument_id: String,
    /// Bytes per record inside a block payload
    pub record_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decoder", rename_all = "snake_case")]
pub enum DecoderConfig {
    Delimited(DelimitedConfig),
    Sio(SioConfig),
}

impl DecoderConfig {
    pub fn stream(&self) -> &str {
        match self {
            DecoderConfig::Delimited(c) => &c.stream,
            DecoderConfig::Sio(c) => &c.stream,
        }
    }

    fn instrument_id(&self) -> Option<&str> {
        match self {
            DecoderConfig::Sio(c) => Some(&c.instrument_id),
            DecoderConfig::Delimited(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(flatten)]
    pub decoder: DecoderConfig,
    /// Bytes read from the file per buffer fill
    #[serde(default = "default_read_size")]
    pub read_size: usize,
}

fn default_read_size() -> usize {
    8192
}

impl ParserConfig {
    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.decoder.stream().trim().is_empty() {
            return Err(ConfigError::invalid(key, "stream", "must not be empty"));
        }
        if self.read_size == 0 {
            return Err(ConfigError::invalid(key, "read_size", "must be greater than 0"));
        }

        match &self.decoder {
            DecoderConfig::Delimited(c) => {
                if c.delimiter.chars().count() != 1 {
                    return Err(ConfigError::invalid(key, "delimiter", "must be exactly one character"));
                }
                if c.fields.is_empty() {
                    return Err(ConfigError::invalid(key, "fields", "must name at least one field"));
                }
                if let Some(column) = &c.timestamp_column {
                    if !c.fields.contains(column) {
                        return Err(ConfigError::invalid(
                            key,
                            "timestamp_column",
                            format!("'{column}' is not one of the configured fields"),
                        ));
                    }
                }
            }
            DecoderConfig::Sio(c) => {
                if c.instrument_id.len() != 2 || !c.instrument_id.chars().all(|ch| ch.is_ascii_uppercase()) {
                    return Err(ConfigError::invalid(
                        key,
                        "instrument_id",
                        "must be two upper-case letters",
                    ));
                }
                if c.record_size == 0 {
                    return Err(ConfigError::invalid(key, "record_size", "must be greater than 0"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DriverConfig {
    #[serde(default)]
    pub harvester: BTreeMap<String, HarvesterConfig>,
    #[serde(default)]
    pub parser: BTreeMap<String, ParserConfig>,
    #[serde(default)]
    pub resource: ResourceParams,
}

impl DriverConfig {
    /// Load from a file (format from its extension) layered with `MOORING__`
    /// environment overrides. A `.env` file is read first when present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Parse TOML text, without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .and_then(|settings| settings.try_deserialize::<Self>())
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Data-source keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.harvester.keys().map(String::as_str)
    }

    /// Check the whole configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harvester.is_empty() {
            return Err(ConfigError::MissingSection("harvester"));
        }
        if self.parser.is_empty() {
            return Err(ConfigError::MissingSection("parser"));
        }

        for key in self.harvester.keys().chain(self.parser.keys()) {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::ReservedKey(key.clone()));
            }
        }

        if let Some(key) = self.harvester.keys().find(|k| !self.parser.contains_key(*k)) {
            return Err(ConfigError::UnmatchedSourceKey {
                key: key.clone(),
                present_in: "harvester",
                missing_from: "parser",
            });
        }
        if let Some(key) = self.parser.keys().find(|k| !self.harvester.contains_key(*k)) {
            return Err(ConfigError::UnmatchedSourceKey {
                key: key.clone(),
                present_in: "parser",
                missing_from: "harvester",
            });
        }

        for (key, harvester) in &self.harvester {
            harvester.validate(key)?;
        }
        for (key, parser) in &self.parser {
            parser.validate(key)?;
        }

        self.check_duplicate_targets()?;

        if let Some((field, reason)) = self.resource.invalid_param() {
            return Err(ConfigError::invalid("resource", field, reason));
        }
        Ok(())
    }

    /// Two keys may share a target only when both pull distinct instruments
    /// out of the same multiplexed stream.
    fn check_duplicate_targets(&self) -> Result<(), ConfigError> {
        let keys: Vec<&String> = self.harvester.keys().collect();
        for (i, first) in keys.iter().enumerate() {
            for second in &keys[i + 1..] {
                if self.harvester[*first].target() != self.harvester[*second].target() {
                    continue;
                }
                let first_id = self.parser.get(*first).and_then(|p| p.decoder.instrument_id());
                let second_id = self.parser.get(*second).and_then(|p| p.decoder.instrument_id());
                match (first_id, second_id) {
                    (Some(a), Some(b)) if a != b => {}
                    _ => {
                        return Err(ConfigError::DuplicateTarget {
                            first: (*first).clone(),
                            second: (*second).clone(),
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("MOORING")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[harvester.ctdbp]
directory = "/data/ctdbp"
pattern = "*.log"
frequency_secs = 5
file_mod_wait_time_secs = 30

[parser.ctdbp]
decoder = "delimited"
stream = "ctdbp_cd_dcl_instrument"
fields = ["time", "temperature"]
timestamp_column = "time"

[harvester.dosta]
topology = "single_file"
directory = "/data/sio"
pattern = "node59p1.dat"

[parser.dosta]
decoder = "sio"
stream = "dosta_abcdjm_sio"
instrument_id = "DO"
record_size = 4

[resource]
batch_size = 20
"#;

    fn valid() -> DriverConfig {
        DriverConfig::from_toml_str(VALID).unwrap()
    }

    #[test]
    fn test_parse_and_validate() {
        let config = valid();
        config.validate().unwrap();

        let ctdbp = &config.harvester["ctdbp"];
        assert_eq!(ctdbp.topology, Topology::SingleDirectory);
        assert_eq!(ctdbp.poll_interval(), Duration::from_secs(5));
        assert_eq!(ctdbp.checksum, ChecksumAlgorithm::Sha256);
        assert_eq!(config.harvester["dosta"].topology, Topology::SingleFile);

        match &config.parser["ctdbp"].decoder {
            DecoderConfig::Delimited(c) => assert_eq!(c.delimiter, ","),
            other => panic!("unexpected decoder {other:?}"),
        }
        assert_eq!(config.parser["dosta"].read_size, 8192);
        assert_eq!(config.resource.batch_size, 20);
        assert_eq!(config.resource.records_per_second, 60.0);
    }

    #[test]
    fn test_missing_sections() {
        let mut config = valid();
        config.parser.clear();
        assert_eq!(config.validate(), Err(ConfigError::MissingSection("parser")));

        config.harvester.clear();
        assert_eq!(config.validate(), Err(ConfigError::MissingSection("harvester")));
    }

    #[test]
    fn test_unmatched_keys() {
        let mut config = valid();
        config.parser.remove("dosta");
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnmatchedSourceKey {
                key: "dosta".to_string(),
                present_in: "harvester",
                missing_from: "parser",
            })
        );
    }

    #[test]
    fn test_reserved_key() {
        let mut config = valid();
        let harvester = config.harvester.remove("ctdbp").unwrap();
        let parser = config.parser.remove("ctdbp").unwrap();
        config.harvester.insert("version".to_string(), harvester);
        config.parser.insert("version".to_string(), parser);
        assert_eq!(config.validate(), Err(ConfigError::ReservedKey("version".to_string())));
    }

    #[test]
    fn test_named_field_errors() {
        let mut config = valid();
        config.harvester.get_mut("ctdbp").unwrap().frequency_secs = 0.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::invalid("ctdbp", "frequency_secs", "must be greater than 0"))
        );

        let mut config = valid();
        config.harvester.get_mut("ctdbp").unwrap().pattern = "[*.log".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern { ref key, .. }) if key == "ctdbp"));

        let mut config = valid();
        config.harvester.get_mut("dosta").unwrap().pattern = "*.dat".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern { ref key, .. }) if key == "dosta"));

        let mut config = valid();
        if let DecoderConfig::Sio(c) = &mut config.parser.get_mut("dosta").unwrap().decoder {
            c.record_size = 0;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "record_size", .. })
        ));

        let mut config = valid();
        config.resource.records_per_second = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "records_per_second", .. })
        ));
    }

    #[test]
    fn test_duplicate_targets() {
        let mut config = valid();
        let harvester = config.harvester["ctdbp"].clone();
        let parser = config.parser["ctdbp"].clone();
        config.harvester.insert("ctdbp_copy".to_string(), harvester);
        config.parser.insert("ctdbp_copy".to_string(), parser);
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateTarget {
                first: "ctdbp".to_string(),
                second: "ctdbp_copy".to_string(),
            })
        );
    }

    #[test]
    fn test_multiplexed_sources_may_share_a_file() {
        let mut config = valid();
        let harvester = config.harvester["dosta"].clone();
        let mut parser = config.parser["dosta"].clone();
        if let DecoderConfig::Sio(c) = &mut parser.decoder {
            c.instrument_id = "FL".to_string();
            c.stream = "flort_dj_sio".to_string();
        }
        config.harvester.insert("flort".to_string(), harvester);
        config.parser.insert("flort".to_string(), parser.clone());
        config.validate().unwrap();

        if let DecoderConfig::Sio(c) = &mut parser.decoder {
            c.instrument_id = "DO".to_string();
        }
        config.parser.insert("flort".to_string(), parser);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateTarget { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        std::fs::write(&path, VALID).unwrap();

        let config = DriverConfig::load(&path).unwrap();
        assert_eq!(config.harvester.len(), 2);
        config.validate().unwrap();

        assert!(matches!(
            DriverConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Load(_))
        ));
    }
}
