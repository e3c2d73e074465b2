//! Newline-delimited JSON encoding of queued records.

use std::io;

use crate::record::LogRecord;

/// Serialise `record` as one JSON object followed by `\n`.
///
/// Records whose encoded form exceeds `max_size` bytes are rejected with
/// [`io::ErrorKind::InvalidData`]; retrying them could never succeed.
pub fn serialise_record(record: &LogRecord, max_size: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128);
    serde_json::to_writer(&mut buf, record).map_err(io::Error::other)?;
    buf.push(b'\n');
    if buf.len() > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record of {} bytes exceeds limit of {max_size}", buf.len()),
        ));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::{Value, json};

    #[rstest]
    fn encodes_single_line_with_delimiter() {
        let record = LogRecord::new()
            .with("message", "multi\nline")
            .with("line", 12);
        let bytes = serialise_record(&record, 1024).expect("serialise record");
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
        let decoded: Value = serde_json::from_slice(&bytes).expect("decode line");
        assert_eq!(decoded, json!({"message": "multi\nline", "line": 12}));
    }

    #[rstest]
    fn oversized_records_are_rejected() {
        let record = LogRecord::new().with("message", "x".repeat(64));
        let err = serialise_record(&record, 16).expect_err("limit enforced");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
