//! Markdown report rendering.
//!
//! [`render_report`] is pure: the same records, config and timestamp always
//! produce the same text. Records are sorted at render time (newest first,
//! undated last, then by URL), so input order does not matter.

use crate::config::NewsConfig;
use crate::models::EnrichedRecord;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

const NONE: &str = "none";

/// Rendering options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// First line(s) of the report, usually a level-1 heading.
    pub header: String,
    /// Appended to key-person search queries, e.g. a topic keyword.
    pub person_search_suffix: Option<String>,
}

impl From<&NewsConfig> for RenderConfig {
    fn from(config: &NewsConfig) -> Self {
        Self {
            header: config.report_header.clone(),
            person_search_suffix: config.person_search_suffix.clone(),
        }
    }
}

fn by_date_then_url(a: &EnrichedRecord, b: &EnrichedRecord) -> Ordering {
    let by_date = match (a.date, b.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.url.cmp(&b.url))
}

/// Web search link for a key person.
pub fn person_search_url(name: &str, suffix: Option<&str>) -> String {
    let mut url = format!(
        "https://www.google.com/search?q={}",
        urlencoding::encode(name.trim())
    );
    if let Some(suffix) = suffix.map(str::trim).filter(|s| !s.is_empty()) {
        url.push('+');
        url.push_str(&urlencoding::encode(suffix));
    }
    url
}

fn render_record(index: usize, record: &EnrichedRecord, config: &RenderConfig) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("\n## {}. {}\n", index, record.localized_title));

    if !record.original_title.is_empty() && record.original_title != record.localized_title {
        lines.push(format!("**Original title:** {}\n", record.original_title));
    }
    if let Some(date) = record.date {
        lines.push(format!("**Date:** {date}\n"));
    }
    lines.push(format!("**Link:** {}\n", record.url));
    if let Some(event_date) = record.event_date.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("**Event date:** {event_date}\n"));
    }

    match (&record.location_name, &record.location_context) {
        (Some(name), Some(context)) => lines.push(format!("**Location:** {name}. {context}\n")),
        (Some(name), None) => lines.push(format!("**Location:** {name}\n")),
        (None, _) => lines.push(format!("**Location:** {NONE}\n")),
    }

    if record.key_persons.is_empty() {
        lines.push(format!("**Key persons:** {NONE}\n"));
    } else {
        lines.push("**Key persons:**\n".to_string());
        let suffix = config.person_search_suffix.as_deref();
        for (j, name) in record.key_persons.iter().enumerate() {
            let link = person_search_url(name, suffix);
            match record.key_person_bios.get(j).filter(|b| !b.trim().is_empty()) {
                Some(bio) => lines.push(format!("- [{name}]({link}): {bio}\n")),
                None => lines.push(format!("- [{name}]({link})\n")),
            }
        }
        lines.push("\n".to_string());
    }

    if record.curated_angles.is_empty() {
        lines.push(format!("**Curated angles:** {NONE}\n"));
    } else {
        lines.push("**Curated angles:**\n".to_string());
        for angle in &record.curated_angles {
            lines.push(format!("  - {angle}\n"));
        }
    }

    lines.push(format!("\n**Summary:** {}\n", record.summary));
    lines.push("\n---\n".to_string());
    lines.concat()
}

/// Render the report. Empty input renders to an empty string.
pub fn render_report(
    records: &[EnrichedRecord],
    config: &RenderConfig,
    generated_at: DateTime<Utc>,
) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&EnrichedRecord> = records.iter().collect();
    sorted.sort_by(|a, b| by_date_then_url(a, b));

    let mut out = String::new();
    out.push_str(config.header.trim_end());
    out.push_str("\n\n");
    out.push_str(&format!(
        "Generated: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("Articles: {}\n", sorted.len()));

    let sites: Vec<&str> = sorted
        .iter()
        .map(|r| r.site.as_str())
        .filter(|s| !s.is_empty())
        .unique()
        .collect();
    if !sites.is_empty() {
        out.push_str("\n## Sources\n\n");
        for site in sites {
            out.push_str(&format!("- {site}\n"));
        }
        out.push_str("\n---\n");
    }

    for (i, record) in sorted.iter().enumerate() {
        out.push_str(&render_record(i + 1, record, config));
    }
    out
}

/// Decode records saved as untyped JSON, skipping entries that are not
/// records.
pub fn decode_records(values: Vec<Value>) -> Vec<EnrichedRecord> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index = i, error = %e, "Skipping entry that is not an enriched record");
                None
            }
        })
        .collect()
}
