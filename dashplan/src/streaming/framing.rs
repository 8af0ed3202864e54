//! Newline-delimited JSON framing for [`StreamEvent`]s.
//!
//! One event per line, no embedded newlines (serde_json escapes them), so a
//! transport can forward lines as they arrive.

use std::io::{BufRead, Write};

use crate::types::StreamEvent;

pub fn encode_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_event(line: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Write one framed event and flush, so consumers see it immediately.
pub fn write_event<W: Write>(writer: &mut W, event: &StreamEvent) -> std::io::Result<()> {
    let line = encode_event(event)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()
}

/// Read every event from an NDJSON source, skipping blank lines.
pub fn read_events<R: BufRead>(reader: R) -> std::io::Result<Vec<StreamEvent>> {
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(decode_event(&line)?);
    }
    Ok(events)
}
