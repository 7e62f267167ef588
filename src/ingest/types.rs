// src/ingest/types.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One ingested article as delivered by the collectors (one JSONL line).
///
/// Read-only to the pipeline apart from `normalized_text`, which the
/// normalizer fills before classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub id: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "de_lenient_ts")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_lenient_ts")]
    pub collected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub normalized_text: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub original_source_url: Option<String>,
    /// Upstream signal strength on the 0..=6 bonus scale.
    #[serde(default)]
    pub signal_strength: Option<i64>,
    #[serde(default)]
    pub source: SourceMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMeta {
    #[serde(default)]
    pub name: String,
    /// Free-form tag: regulatory, journal, company, media, aggregator, ...
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_trust_tier")]
    pub trust_tier: String,
    /// Collector that produced the item, e.g. `google_news`.
    #[serde(default)]
    pub fetcher: Option<String>,
    #[serde(default)]
    pub source_group: Option<String>,
}

impl Default for SourceMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            category: String::new(),
            trust_tier: default_trust_tier(),
            fetcher: None,
            source_group: None,
        }
    }
}

fn default_trust_tier() -> String {
    "B".to_string()
}

impl RawItem {
    /// `collected_at`, falling back to `published_at`. Used for arrival ordering.
    pub fn arrival_ts(&self) -> Option<DateTime<Utc>> {
        self.collected_at.or(self.published_at)
    }

    /// Best available body text: normalized text, then raw text, then summary.
    pub fn body(&self) -> &str {
        [&self.normalized_text, &self.raw_text, &self.summary]
            .into_iter()
            .find(|s| !s.trim().is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), `YYYY-MM-DD` or unix seconds.
/// Anything else becomes `None`, which scoring treats as "no date".
fn de_lenient_ts<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(i64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(Raw::Secs(s)) => Utc.timestamp_opt(s, 0).single(),
        Some(Raw::Text(s)) => parse_ts(&s),
    })
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
