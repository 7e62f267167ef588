// src/ingest/fingerprint.rs
//! Stable identity keys for raw items: URL canonicalization and title hashing.
//!
//! Everything here is a pure function of the item fields and the normalizer
//! config, so the same item always yields the same fingerprint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::NormalizerConfig;
use crate::ingest::types::RawItem;

/// Clustering probe kinds, in probe priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVariant {
    CanonicalUrl,
    HostPath,
    TitleHash,
}

impl KeyVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyVariant::CanonicalUrl => "canonical_url",
            KeyVariant::HostPath => "host_path",
            KeyVariant::TitleHash => "title_hash",
        }
    }
}

impl fmt::Display for KeyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub canonical_url_norm: Option<String>,
    /// `url_norm` of the item URL: host + path, plus an identity query if present.
    pub host_path_norm: Option<String>,
    pub title_fingerprint: String,
    /// Token string that went into `title_fingerprint`.
    pub title_norm: String,
    /// Title normalized to nothing; the title hash is not used as a probe.
    pub low_confidence: bool,
}

impl Fingerprint {
    pub fn compute(item: &RawItem, cfg: &NormalizerConfig) -> Self {
        let canonical_url_norm = item
            .canonical_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .and_then(|u| url_norm(u, cfg));
        let host_path_norm = url_norm(&item.url, cfg);

        let title_norm = normalize_title(&item.title, cfg);
        let domain = url_host(&item.url)
            .or_else(|| item.canonical_url.as_deref().and_then(url_host))
            .unwrap_or_default();
        let day = item
            .published_at
            .or(item.collected_at)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "undated".to_string());
        let title_fingerprint = hex_sha256(&format!("{title_norm}|{domain}|{day}"), 8);

        Self {
            canonical_url_norm,
            host_path_norm,
            low_confidence: title_norm.is_empty(),
            title_fingerprint,
            title_norm,
        }
    }

    /// Probe keys in priority order. The title hash is skipped when low confidence.
    pub fn probes(&self) -> Vec<(KeyVariant, String)> {
        let mut out = Vec::with_capacity(3);
        if let Some(c) = &self.canonical_url_norm {
            out.push((KeyVariant::CanonicalUrl, c.clone()));
        }
        if let Some(h) = &self.host_path_norm {
            out.push((KeyVariant::HostPath, h.clone()));
        }
        if !self.low_confidence {
            out.push((KeyVariant::TitleHash, self.title_fingerprint.clone()));
        }
        out
    }

    /// Normalized URL used in cache keys; falls back to the title hash for URL-less items.
    pub fn url_key(&self) -> String {
        self.canonical_url_norm
            .clone()
            .or_else(|| self.host_path_norm.clone())
            .unwrap_or_else(|| format!("title:{}", self.title_fingerprint))
    }
}

/// `host[:port]/path[?identity-query]`, lowercase host, no fragment, no trailing `/`.
///
/// The query survives only if it carries one of the identity parameters; in
/// that case tracking parameters are removed and the rest sorted.
pub fn url_norm(raw: &str, cfg: &NormalizerConfig) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    let mut out = host;
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    let has_identity = pairs
        .iter()
        .any(|(k, _)| cfg.identity_query_params.iter().any(|p| p == k));
    if has_identity {
        let mut kept: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(k, _)| !is_tracking_param(k, &cfg.tracking_params))
            .collect();
        kept.sort();
        let query = kept
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
    }
    Some(out)
}

/// Lowercased host of a URL, without a leading `www.`.
pub fn url_host(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

fn is_tracking_param(key: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == p,
    })
}

/// Sorted, deduplicated bag of title stems, space separated.
pub fn normalize_title(title: &str, cfg: &NormalizerConfig) -> String {
    let mut t = title.trim().to_lowercase();
    let mut changed = true;
    while changed {
        changed = false;
        for p in &cfg.noise_prefixes {
            if !p.is_empty() && t.starts_with(p.as_str()) {
                t = t[p.len()..].trim_start().to_string();
                changed = true;
            }
        }
    }

    let cleaned: String = t
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let tokens: BTreeSet<String> = cleaned
        .split_whitespace()
        .filter(|w| !cfg.noise_words.iter().any(|n| n == w))
        .filter(|w| !cfg.stop_words.iter().any(|s| s == w))
        .map(|w| {
            if cfg.stem_len > 0 {
                w.chars().take(cfg.stem_len).collect()
            } else {
                w.to_string()
            }
        })
        .collect();

    tokens.into_iter().collect::<Vec<_>>().join(" ")
}

/// Hex of the first `bytes` bytes of SHA-256(text).
pub(crate) fn hex_sha256(text: &str, bytes: usize) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(bytes * 2);
    for b in digest.iter().take(bytes) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cfg() -> NormalizerConfig {
        NormalizerConfig::default()
    }

    fn item(url: &str, title: &str) -> RawItem {
        RawItem {
            id: "i".into(),
            source_id: "s".into(),
            url: url.into(),
            canonical_url: None,
            title: title.into(),
            summary: String::new(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()),
            collected_at: None,
            raw_text: String::new(),
            normalized_text: String::new(),
            region: None,
            original_source_url: None,
            signal_strength: None,
            source: Default::default(),
        }
    }

    #[test]
    fn url_norm_drops_plain_queries_and_fragments() {
        let c = cfg();
        assert_eq!(
            url_norm("https://News.Example.com/a/b/?utm_source=x#top", &c).as_deref(),
            Some("news.example.com/a/b")
        );
        assert_eq!(
            url_norm("https://example.com/read?utm_medium=rss&id=42&lang=en", &c).as_deref(),
            Some("example.com/read?id=42&lang=en")
        );
        assert_eq!(url_norm("not a url", &c), None);
        assert_eq!(url_norm("", &c), None);
    }

    #[test]
    fn title_bag_ignores_noise_order_and_inflection() {
        let c = cfg();
        let a = normalize_title("FDA clears XYZ test", &c);
        let b = normalize_title("FDA Clears XYZ Test (update)", &c);
        let d = normalize_title("XYZ test gets FDA clearance", &c);
        assert_eq!(a, "clear fda test xyz");
        assert_eq!(a, b);
        assert_eq!(a, d);
        assert_eq!(normalize_title("Breaking: the update", &c), "");
    }

    #[test]
    fn compute_is_pure_and_flags_empty_titles() {
        let c = cfg();
        let it = item("https://example.com/x", "FDA clears XYZ test");
        assert_eq!(Fingerprint::compute(&it, &c), Fingerprint::compute(&it, &c));

        let blank = item("https://example.com/y", "  !! ");
        let fp = Fingerprint::compute(&blank, &c);
        assert!(fp.low_confidence);
        assert!(fp
            .probes()
            .iter()
            .all(|(v, _)| *v != KeyVariant::TitleHash));
    }

    #[test]
    fn invalid_url_keeps_title_hash_only() {
        let fp = Fingerprint::compute(&item("::::", "Assay launch"), &cfg());
        assert!(fp.canonical_url_norm.is_none());
        assert!(fp.host_path_norm.is_none());
        assert_eq!(fp.probes().len(), 1);
        assert!(fp.url_key().starts_with("title:"));
    }
}
