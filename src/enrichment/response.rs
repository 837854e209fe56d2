//! Typed parse step for analysis responses.
//!
//! Kept apart from the network call: a response that arrived but cannot be
//! read is a [`Malformed`] value, not a transport failure.

use crate::error::Malformed;
use crate::utils::looks_truncated;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Field names that mark an object as an analysis item rather than an
/// envelope around the item array.
const ITEM_KEYS: &[&str] = &[
    "localizedTitle",
    "localized_title",
    "chinese_title",
    "summary",
    "keyPersons",
    "key_persons",
    "keyPersonBios",
    "key_person_bios",
    "locationName",
    "location_name",
    "locationContext",
    "location_context",
    "eventDate",
    "event_date",
    "curatedAngles",
    "curated_angles",
];

/// One analysis result as returned by the service. Every field may be
/// missing; the batcher fills the gaps from the article itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisItem {
    #[serde(alias = "localized_title", alias = "chinese_title")]
    pub localized_title: Option<String>,
    pub summary: Option<String>,
    #[serde(alias = "key_persons", deserialize_with = "null_as_empty")]
    pub key_persons: Vec<String>,
    #[serde(alias = "key_person_bios", deserialize_with = "null_as_empty")]
    pub key_person_bios: Vec<String>,
    #[serde(alias = "location_name")]
    pub location_name: Option<String>,
    #[serde(alias = "location_context")]
    pub location_context: Option<String>,
    #[serde(alias = "event_date")]
    pub event_date: Option<String>,
    #[serde(alias = "curated_angles", deserialize_with = "null_as_empty")]
    pub curated_angles: Vec<String>,
}

/// JSON-mode models send `null` for empty lists.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// An object without item fields whose only array value holds the items,
/// e.g. `{"articles": [...]}`. The array must contain objects only.
fn unwrap_envelope(map: Map<String, Value>) -> Vec<Value> {
    let is_item = ITEM_KEYS.iter().any(|key| map.contains_key(*key));
    let arrays: Vec<&Vec<Value>> = map.values().filter_map(Value::as_array).collect();
    let holds_items = matches!(arrays.as_slice(), [items] if items.iter().all(Value::is_object));
    if is_item || !holds_items {
        return vec![Value::Object(map)];
    }
    map.into_iter()
        .find_map(|(_, v)| match v {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default()
}

/// Parse a raw completion into positional items.
///
/// An array is taken as is, a single object is wrapped. Elements that are
/// not objects, or objects whose fields have the wrong types, come back as
/// `None` and are treated as uncovered.
pub fn parse_analysis_response(text: &str) -> Result<Vec<Option<AnalysisItem>>, Malformed> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| {
        if looks_truncated(&e) {
            Malformed::Truncated(e.to_string())
        } else {
            Malformed::Invalid(e.to_string())
        }
    })?;

    let elements = match value {
        Value::Array(items) => items,
        Value::Object(map) => unwrap_envelope(map),
        _ => return Err(Malformed::UnexpectedShape),
    };

    Ok(elements
        .into_iter()
        .map(|element| match element {
            Value::Object(_) => serde_json::from_value(element).ok(),
            _ => None,
        })
        .collect())
}
