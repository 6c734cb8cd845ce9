//! Delimited text lines: one sample per line, one column per field.

use super::{DecodeInput, DecodeResult, Decoder};
use crate::config::DelimitedConfig;
use chrono::{DateTime, Utc};
use mooring_common::types::Sample;
use mooring_common::SampleDecodeError;
use serde_json::{Number, Value};

#[derive(Debug, Clone)]
pub struct DelimitedDecoder {
    stream: String,
    delimiter: char,
    fields: Vec<String>,
    timestamp_column: Option<String>,
    comment_prefix: Option<String>,
}

impl DelimitedDecoder {
    pub fn new(config: &DelimitedConfig) -> Self {
        Self {
            stream: config.stream.clone(),
            delimiter: config.delimiter.chars().next().unwrap_or(','),
            fields: config.fields.clone(),
            timestamp_column: config.timestamp_column.clone(),
            comment_prefix: config.comment_prefix.clone().filter(|p| !p.is_empty()),
        }
    }

    fn is_skippable(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match &self.comment_prefix {
            Some(prefix) => line.trim_start().starts_with(prefix.as_str()),
            None => false,
        }
    }
}

impl Decoder for DelimitedDecoder {
    fn decode(&self, input: &DecodeInput<'_>) -> DecodeResult {
        let offset = input.offset;
        let text = std::str::from_utf8(input.bytes)
            .map_err(|e| SampleDecodeError::new(offset, format!("line is not valid UTF-8: {e}")))?;
        let line = text.trim_end_matches(['\r', '\n']);

        if self.is_skippable(line) {
            return Ok(Vec::new());
        }

        let columns: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();
        if columns.len() != self.fields.len() {
            return Err(SampleDecodeError::new(
                offset,
                format!("expected {} columns, found {}", self.fields.len(), columns.len()),
            ));
        }

        let mut sample = Sample::new(&self.stream, offset);
        for (field, raw) in self.fields.iter().zip(columns) {
            if self.timestamp_column.as_deref() == Some(field.as_str()) {
                let time = DateTime::parse_from_rfc3339(raw).map_err(|e| {
                    SampleDecodeError::new(offset, format!("field '{field}': invalid timestamp '{raw}': {e}"))
                })?;
                sample = sample.with_timestamp(time.with_timezone(&Utc));
                continue;
            }

            let number = raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| SampleDecodeError::new(offset, format!("field '{field}': '{raw}' is not numeric")))?;
            sample = sample.with_value(field.as_str(), Value::Number(number));
        }

        Ok(vec![sample])
    }

    fn stream(&self) -> &str {
        &self.stream
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn decoder() -> DelimitedDecoder {
        DelimitedDecoder::new(&DelimitedConfig {
            stream: "ctdbp".to_string(),
            delimiter: ",".to_string(),
            fields: vec!["time".into(), "temperature".into(), "conductivity".into()],
            timestamp_column: Some("time".to_string()),
            comment_prefix: Some("#".to_string()),
        })
    }

    #[test]
    fn test_decode_line() {
        let samples = decoder()
            .decode(&DecodeInput::line(b"2014-04-12T01:00:00Z, 12.5, 3.1\r\n", 40))
            .unwrap();
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.stream, "ctdbp");
        assert_eq!(sample.source_offset, 40);
        assert_eq!(sample.value("temperature"), Some(&serde_json::json!(12.5)));
        assert_eq!(
            sample.internal_timestamp.unwrap().to_rfc3339(),
            "2014-04-12T01:00:00+00:00"
        );
    }

    #[test]
    fn test_comments_and_blank_lines_yield_nothing() {
        assert!(decoder().decode(&DecodeInput::line(b"# header\n", 0)).unwrap().is_empty());
        assert!(decoder().decode(&DecodeInput::line(b"  \n", 0)).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines() {
        let err = decoder().decode(&DecodeInput::line(b"2014-04-12T01:00:00Z,1\n", 7)).unwrap_err();
        assert_eq!(err.position, 7);
        assert!(err.message.contains("expected 3 columns"));

        let err = decoder()
            .decode(&DecodeInput::line(b"2014-04-12T01:00:00Z,abc,1\n", 0))
            .unwrap_err();
        assert!(err.message.contains("'temperature'"));

        let err = decoder().decode(&DecodeInput::line(b"yesterday,1,2\n", 0)).unwrap_err();
        assert!(err.message.contains("invalid timestamp"));

        assert!(decoder().decode(&DecodeInput::line(&[0xff, 0xfe, b'\n'], 0)).is_err());
    }
}
