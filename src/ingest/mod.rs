// src/ingest/mod.rs
pub mod fingerprint;
pub mod reader;
pub mod types;

use crate::config::NormalizerConfig;
use crate::ingest::fingerprint::Fingerprint;
use crate::ingest::types::RawItem;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tracing::debug;

pub const DEFAULT_TEXT_MAX_CHARS: usize = 1500;

/// One-time metrics registration (so series show up in the exported textfile).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_read_total", "Raw items parsed from input.");
        describe_counter!(
            "ingest_items_skipped_total",
            "Input lines skipped as malformed."
        );
        describe_counter!(
            "ingest_low_confidence_total",
            "Items whose title normalized to nothing."
        );
    });
}

/// An item after text normalization, with its identity keys.
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub item: RawItem,
    pub fingerprint: Fingerprint,
}

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    normalize_text_capped(s, DEFAULT_TEXT_MAX_CHARS)
}

pub fn normalize_text_capped(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

/// Fill `normalized_text` and compute the fingerprint for every item.
pub fn normalize_items(items: Vec<RawItem>, cfg: &NormalizerConfig) -> Vec<NormalizedItem> {
    ensure_metrics_described();
    let mut low_confidence = 0u64;
    let out: Vec<NormalizedItem> = items
        .into_iter()
        .map(|mut item| {
            let source_text = if item.raw_text.trim().is_empty() {
                &item.summary
            } else {
                &item.raw_text
            };
            item.normalized_text = normalize_text_capped(source_text, cfg.text_max_chars);
            let fingerprint = Fingerprint::compute(&item, cfg);
            if fingerprint.low_confidence {
                low_confidence += 1;
                debug!(target: "ingest", id = %item.id, "title normalized to nothing; low-confidence fingerprint");
            }
            NormalizedItem { item, fingerprint }
        })
        .collect();
    counter!("ingest_low_confidence_total").increment(low_confidence);
    out
}
