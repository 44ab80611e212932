//! proctor.input.v1 parsing
//!
//! Reads input records from NDJSON or a JSON array and validates batches.

use super::record::{InputRecord, ValidationError};
use crate::error::ProctorError;

/// Parser for input records
pub struct InputAdapter;

impl InputAdapter {
    /// Parse a JSON array of records
    pub fn parse_array(json: &str) -> Result<Vec<InputRecord>, ProctorError> {
        let records: Vec<InputRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse newline-delimited records, skipping blank lines
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<InputRecord>, ProctorError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            records.push(Self::parse_line(trimmed, line_num + 1)?);
        }
        Ok(records)
    }

    /// Parse one line; `line_num` is 1-based and only used in errors
    pub fn parse_line(line: &str, line_num: usize) -> Result<InputRecord, ProctorError> {
        serde_json::from_str::<InputRecord>(line).map_err(|e| {
            ProctorError::ParseError(format!("Failed to parse line {line_num}: {e}"))
        })
    }

    /// Validate a batch, returning only the failures
    pub fn validate_records(records: &[InputRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.validate().err().map(|error| ValidationResult {
                    index,
                    kind: record.kind(),
                    error,
                })
            })
            .collect()
    }

    /// Whether records arrive in non-decreasing timestamp order
    pub fn is_ordered(records: &[InputRecord]) -> bool {
        records
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp())
    }
}

/// A record that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub index: usize,
    pub kind: &'static str,
    pub error: ValidationError,
}
