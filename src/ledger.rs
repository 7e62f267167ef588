//! ledger.rs: append-only JSONL record of each run, used for replay.
//!
//! `scored.jsonl` holds one line per scored item (fingerprint, relevance,
//! score breakdown) tagged with the run's `as_of`; `stories.jsonl` holds the
//! annotated stories that were emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyze::AnnotatedStory;
use crate::error::{PipelineError, Result};
use crate::scoring::ScoredItem;

pub const SCORED_FILE: &str = "scored.jsonl";
pub const STORIES_FILE: &str = "stories.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct ScoredLine {
    as_of: DateTime<Utc>,
    #[serde(flatten)]
    scored: ScoredItem,
}

#[derive(Debug, Serialize)]
struct StoryLine<'a> {
    as_of: DateTime<Utc>,
    #[serde(flatten)]
    story: &'a AnnotatedStory,
}

#[derive(Debug, Default)]
pub struct ReplayInput {
    pub as_of: Option<DateTime<Utc>>,
    pub items: Vec<ScoredItem>,
    pub skipped: Vec<PipelineError>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append_lines<T: Serialize>(&self, file: &str, lines: impl Iterator<Item = T>) -> Result<usize> {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        let mut w = BufWriter::new(f);
        let mut n = 0;
        for line in lines {
            let json = serde_json::to_string(&line)?;
            writeln!(w, "{json}")?;
            n += 1;
        }
        w.flush()?;
        Ok(n)
    }

    pub fn append_scored(&self, as_of: DateTime<Utc>, items: &[ScoredItem]) -> Result<usize> {
        self.append_lines(
            SCORED_FILE,
            items.iter().map(|s| ScoredLine {
                as_of,
                scored: s.clone(),
            }),
        )
    }

    pub fn append_stories(&self, as_of: DateTime<Utc>, stories: &[AnnotatedStory]) -> Result<usize> {
        self.append_lines(
            STORIES_FILE,
            stories.iter().map(|story| StoryLine { as_of, story }),
        )
    }

    /// Scored items for one run. `as_of = None` picks the latest run in the ledger.
    /// Within a run the last line per item id wins. Unreadable lines are skipped.
    pub fn read_scored(&self, as_of: Option<DateTime<Utc>>) -> Result<ReplayInput> {
        let path = self.dir.join(SCORED_FILE);
        let reader = BufReader::new(File::open(&path)?);

        let mut runs: BTreeMap<DateTime<Utc>, BTreeMap<String, ScoredItem>> = BTreeMap::new();
        let mut skipped = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ScoredLine>(&line) {
                Ok(l) => {
                    runs.entry(l.as_of)
                        .or_default()
                        .insert(l.scored.item.id.clone(), l.scored);
                }
                Err(e) => skipped.push(PipelineError::input(idx + 1, e.to_string())),
            }
        }
        for e in &skipped {
            warn!(target: "pipeline", error = %e, "skipping ledger line");
        }

        let picked = match as_of {
            Some(t) => runs.remove_entry(&t),
            None => runs.pop_last(),
        };
        let (as_of, items) = match picked {
            Some((t, by_id)) => (Some(t), by_id.into_values().collect::<Vec<_>>()),
            None => (as_of, Vec::new()),
        };
        info!(target: "pipeline", items = items.len(), skipped = skipped.len(), "ledger loaded for replay");
        Ok(ReplayInput {
            as_of,
            items,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::test_support::mk_item;
    use chrono::TimeZone;

    #[test]
    fn replay_reads_latest_run_and_last_line_per_item() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(tmp.path()).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();

        let a = mk_item("a", "https://e.com/a", "Alpha", 9, 0.7);
        let mut a2 = a.clone();
        a2.score.quality_score = 77.0;
        ledger.append_scored(t1, &[a.clone()]).unwrap();
        ledger.append_scored(t2, &[a, mk_item("b", "https://e.com/b", "Beta", 9, 0.7)]).unwrap();
        ledger.append_scored(t2, &[a2]).unwrap();

        let mut f = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(SCORED_FILE))
            .unwrap();
        writeln!(f, "{{not json").unwrap();

        let latest = ledger.read_scored(None).unwrap();
        assert_eq!(latest.as_of, Some(t2));
        assert_eq!(latest.items.len(), 2);
        assert_eq!(latest.items[0].score.quality_score, 77.0);
        assert_eq!(latest.skipped.len(), 1);

        let first = ledger.read_scored(Some(t1)).unwrap();
        assert_eq!(first.items.len(), 1);
    }
}
