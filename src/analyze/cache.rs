// src/analyze/cache.rs
//! Analysis cache: keyed read/write of generated analyses.
//!
//! Two implementations: an in-memory map and a day-partitioned JSONL store
//! (`items-YYYYMMDD.jsonl`, append-only, last matching line wins).

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::TokenUsage;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub item_key: String,
    pub story_id: Option<String>,
    pub url_norm: String,
    pub summary: String,
    pub impact: String,
    pub action: String,
    /// Model the tier policy asked for.
    pub model: String,
    /// Model that actually produced the text.
    pub used_model: String,
    pub fallback_from: Option<String>,
    pub prompt_version: String,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Keys a record can be found under: the item key, the bare URL key and the story id.
    pub fn alias_keys(&self) -> Vec<String> {
        let mut keys = vec![self.item_key.clone(), self.url_norm.clone()];
        if let Some(sid) = &self.story_id {
            keys.push(format!("{sid}|{}", self.url_norm));
        }
        keys.sort();
        keys.dedup();
        keys
    }
}

#[async_trait]
pub trait AnalysisCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>>;
    /// Last write wins per key.
    async fn put(&self, record: &AnalysisRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<HashMap<String, AnalysisRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let g = self.inner.read().await;
        let mut uniq: Vec<&str> = g.values().map(|r| r.item_key.as_str()).collect();
        uniq.sort_unstable();
        uniq.dedup();
        uniq.len()
    }
}

#[async_trait]
impl AnalysisCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, record: &AnalysisRecord) -> Result<()> {
        let mut g = self.inner.write().await;
        for k in record.alias_keys() {
            g.insert(k, record.clone());
        }
        Ok(())
    }
}

/// One JSONL line: the record plus the keys it answers to.
#[derive(Debug, Serialize, Deserialize)]
struct CacheLine {
    keys: Vec<String>,
    #[serde(flatten)]
    record: AnalysisRecord,
}

#[derive(Debug)]
pub struct JsonlCache {
    dir: PathBuf,
    retention_days: u32,
    write_lock: Mutex<()>,
}

const FILE_PREFIX: &str = "items-";
const FILE_SUFFIX: &str = ".jsonl";

fn day_file_name(day: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", day.format("%Y%m%d"))
}

fn parse_day_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y%m%d").ok()
}

impl JsonlCache {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention_days,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Day files inside the retention window ending at `today`, newest first.
    async fn files_in_window(&self, today: NaiveDate) -> Result<Vec<PathBuf>> {
        let oldest = today - Duration::days(self.retention_days as i64);
        let mut out: Vec<(NaiveDate, PathBuf)> = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let Some(day) = name.to_str().and_then(parse_day_file_name) else {
                continue;
            };
            if day >= oldest && day <= today {
                out.push((day, entry.path()));
            }
        }
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out.into_iter().map(|(_, p)| p).collect())
    }

    async fn get_as_of(&self, key: &str, today: NaiveDate) -> Result<Option<AnalysisRecord>> {
        for path in self.files_in_window(today).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            let mut hit = None;
            for (n, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CacheLine>(line) {
                    Ok(l) if l.keys.iter().any(|k| k == key) => hit = Some(l.record),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "analysis", file = %path.display(), line = n + 1, error = %e, "unreadable cache line")
                    }
                }
            }
            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(None)
    }

    /// Delete day files older than `keep_days` before `today`. Returns how many were removed.
    pub async fn sweep(&self, keep_days: u32, today: NaiveDate) -> Result<usize> {
        let cutoff = today - Duration::days(keep_days as i64);
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        let mut rd = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let Some(day) = name.to_str().and_then(parse_day_file_name) else {
                continue;
            };
            if day < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                debug!(target: "analysis", file = ?name, "swept cache partition");
                removed += 1;
            }
        }
        info!(target: "analysis", removed, keep_days, "cache retention sweep");
        Ok(removed)
    }
}

#[async_trait]
impl AnalysisCache for JsonlCache {
    async fn get(&self, key: &str) -> Result<Option<AnalysisRecord>> {
        self.get_as_of(key, Utc::now().date_naive()).await
    }

    async fn put(&self, record: &AnalysisRecord) -> Result<()> {
        let line = CacheLine {
            keys: record.alias_keys(),
            record: record.clone(),
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');
        let path = self.dir.join(day_file_name(record.generated_at.date_naive()));

        let _guard = self.write_lock.lock().await;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        f.write_all(json.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rec(story: Option<&str>, url: &str, summary: &str, at: DateTime<Utc>) -> AnalysisRecord {
        let item_key = match story {
            Some(s) => format!("{s}|{url}"),
            None => url.to_string(),
        };
        AnalysisRecord {
            item_key,
            story_id: story.map(str::to_string),
            url_norm: url.into(),
            summary: summary.into(),
            impact: "i".into(),
            action: "a".into(),
            model: "m".into(),
            used_model: "m".into(),
            fallback_from: None,
            prompt_version: "v1".into(),
            degraded: false,
            degraded_reason: None,
            token_usage: TokenUsage::default(),
            generated_at: at,
        }
    }

    #[tokio::test]
    async fn memory_cache_answers_alias_keys() {
        let c = MemoryCache::new();
        let r = rec(Some("s1"), "e.com/a", "x", Utc::now());
        c.put(&r).await.unwrap();
        assert!(c.get("s1|e.com/a").await.unwrap().is_some());
        assert!(c.get("e.com/a").await.unwrap().is_some());
        assert!(c.get("e.com/b").await.unwrap().is_none());
        assert_eq!(c.len().await, 1);
    }

    #[tokio::test]
    async fn jsonl_last_write_wins_and_newest_partition_first() {
        let tmp = tempfile::tempdir().unwrap();
        let c = JsonlCache::new(tmp.path(), 30).unwrap();
        let d1 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        c.put(&rec(Some("s"), "e.com/a", "old", d1)).await.unwrap();
        c.put(&rec(Some("s"), "e.com/a", "older-day-rewrite", d1)).await.unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 4).unwrap();
        let hit = c.get_as_of("s|e.com/a", today).await.unwrap().unwrap();
        assert_eq!(hit.summary, "older-day-rewrite");

        c.put(&rec(Some("s"), "e.com/a", "new", d2)).await.unwrap();
        let hit = c.get_as_of("e.com/a", today).await.unwrap().unwrap();
        assert_eq!(hit.summary, "new");

        assert!(tmp.path().join("items-20240601.jsonl").exists());
        assert!(tmp.path().join("items-20240603.jsonl").exists());
    }

    #[tokio::test]
    async fn jsonl_respects_retention_and_sweeps() {
        let tmp = tempfile::tempdir().unwrap();
        let c = JsonlCache::new(tmp.path(), 30).unwrap();
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        c.put(&rec(None, "e.com/z", "ancient", old)).await.unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(c.get_as_of("e.com/z", today).await.unwrap().is_none());

        let removed = c.sweep(30, today).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!tmp.path().join("items-20240101.jsonl").exists());
        assert!(tmp.path().join("notes.txt").exists());
    }
}
