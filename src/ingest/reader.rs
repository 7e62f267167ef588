// src/ingest/reader.rs
//! JSONL input: one `RawItem` per line. Malformed lines are skipped and counted.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use metrics::counter;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::ingest::types::RawItem;

#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub items: Vec<RawItem>,
    /// One `PipelineError::Input` per skipped line.
    pub skipped: Vec<PipelineError>,
}

pub fn read_items_path(path: &Path) -> Result<ReadOutcome> {
    let f = File::open(path)?;
    read_items(BufReader::new(f))
}

/// Parse items line by line. Blank lines are ignored; lines that are not UTF-8,
/// fail to parse, lack an `id`, or repeat an earlier `id` are skipped with an
/// input error. Only a failing reader aborts.
pub fn read_items<R: BufRead>(reader: R) -> Result<ReadOutcome> {
    super::ensure_metrics_described();
    let mut out = ReadOutcome::default();
    let mut seen_ids = HashSet::new();

    for (idx, raw) in reader.split(b'\n').enumerate() {
        let line_no = idx + 1;
        let raw = raw?;
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                out.skipped
                    .push(PipelineError::input(line_no, format!("line is not valid UTF-8: {e}")));
                continue;
            }
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line, line_no) {
            Ok(item) if !seen_ids.insert(item.id.clone()) => {
                out.skipped
                    .push(PipelineError::input(line_no, format!("duplicate id '{}'", item.id)));
            }
            Ok(item) => out.items.push(item),
            Err(e) => out.skipped.push(e),
        }
    }

    for e in &out.skipped {
        warn!(target: "ingest", error = %e, "skipping input line");
    }
    counter!("ingest_items_read_total").increment(out.items.len() as u64);
    counter!("ingest_items_skipped_total").increment(out.skipped.len() as u64);
    Ok(out)
}

fn parse_line(line: &str, line_no: usize) -> Result<RawItem> {
    let item: RawItem =
        serde_json::from_str(line).map_err(|e| PipelineError::input(line_no, e.to_string()))?;
    if item.id.trim().is_empty() {
        return Err(PipelineError::input(line_no, "missing id"));
    }
    if item.title.trim().is_empty() && item.url.trim().is_empty() {
        return Err(PipelineError::input(line_no, "item has neither title nor url"));
    }
    Ok(item)
}
