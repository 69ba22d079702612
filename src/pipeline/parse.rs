//! Tolerant response parser: model free text → [`PrescriptionRecord`].
//!
//! The model is asked for a fenced JSON block but does not always comply.
//! Parsing runs four passes, each a pure function:
//!
//! 1. [`extract_candidate`]: pick the fenced block, or the whole text
//! 2. [`normalise_quotes`]: rewrite `'` to `"` when no `"` is present
//! 3. decode as a JSON object
//! 4. [`backfill`]: insert defaults for absent schema keys
//!
//! The decoded map is then coerced leniently into the typed record. Only
//! step 3 can fail, and the failure carries the untouched raw text.

use crate::error::ParseFailure;
use crate::output::{MedicationEntry, PrescriptionRecord, MEDICATIONS_FIELD, MISSING_FIELD, SCALAR_FIELDS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::{debug, warn};

const FENCE: &str = "```";
const JSON_FENCE: &str = "```json";

/// Parse a model response into a record.
pub fn parse_response(raw: &str) -> Result<PrescriptionRecord, ParseFailure> {
    let candidate = normalise_quotes(extract_candidate(raw));
    let failure = |reason: String| ParseFailure {
        raw: raw.to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(&candidate).map_err(|e| failure(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(failure("expected a JSON object".into()));
    };

    backfill(&mut map);
    Ok(into_record(map))
}

// ── Pass 1: fenced block ─────────────────────────────────────────────────────

static RE_LANGUAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*[A-Za-z][\w+.-]*[ \t]*\r?\n").unwrap());

/// Select the text to decode.
///
/// A block opened with ```` ```json ```` wins; otherwise the first fenced
/// block of any kind; otherwise the whole text. An unterminated fence runs
/// to the end of the text. The result is trimmed.
pub fn extract_candidate(raw: &str) -> &str {
    let raw = raw.trim_start_matches('\u{FEFF}');

    if let Some((_, after)) = raw.split_once(JSON_FENCE) {
        return up_to_fence(after).trim();
    }

    if let Some((_, after)) = raw.split_once(FENCE) {
        let body = up_to_fence(after);
        let body = match RE_LANGUAGE_TAG.find(body) {
            Some(tag) => &body[tag.end()..],
            None => body,
        };
        return body.trim();
    }

    raw.trim()
}

fn up_to_fence(s: &str) -> &str {
    s.split_once(FENCE).map_or(s, |(body, _)| body)
}

// ── Pass 2: quote style ──────────────────────────────────────────────────────

/// Rewrite every `'` to `"`, but only when the text holds no `"` at all.
pub fn normalise_quotes(candidate: &str) -> Cow<'_, str> {
    if candidate.contains('\'') && !candidate.contains('"') {
        debug!("Response uses single quotes only; rewriting to double quotes");
        Cow::Owned(candidate.replace('\'', "\""))
    } else {
        Cow::Borrowed(candidate)
    }
}

// ── Pass 4: back-fill ────────────────────────────────────────────────────────

/// Insert `"N/A"` for each absent scalar key and `[]` for absent medications.
///
/// Keys that are present keep their value, including `null` and `""`.
pub fn backfill(map: &mut Map<String, Value>) {
    for key in SCALAR_FIELDS {
        map.entry(key)
            .or_insert_with(|| Value::String(MISSING_FIELD.to_string()));
    }
    map.entry(MEDICATIONS_FIELD)
        .or_insert_with(|| Value::Array(Vec::new()));
}

// ── Typed coercion ───────────────────────────────────────────────────────────

fn into_record(mut map: Map<String, Value>) -> PrescriptionRecord {
    let mut record = PrescriptionRecord::default();
    for key in SCALAR_FIELDS {
        if let (Some(value), Some(slot)) = (map.remove(key), record.field_mut(key)) {
            *slot = coerce_text(value);
        }
    }
    record.medications = map
        .remove(MEDICATIONS_FIELD)
        .map(coerce_medications)
        .unwrap_or_default();
    record.extra = map;
    record
}

/// Render any JSON value as text. `null` becomes the empty string.
fn coerce_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn coerce_medications(value: Value) -> Vec<MedicationEntry> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(obj) => Some(medication_from_object(obj)),
                Value::String(name) => Some(MedicationEntry {
                    name: Some(name),
                    ..Default::default()
                }),
                other => {
                    debug!("Skipping medication entry that is not an object: {}", other);
                    None
                }
            })
            .collect(),
        other => {
            warn!("'medications' is not a list ({}); treating as empty", other);
            Vec::new()
        }
    }
}

fn medication_from_object(mut obj: Map<String, Value>) -> MedicationEntry {
    let mut take = |key: &str| match obj.remove(key) {
        None | Some(Value::Null) => None,
        Some(v) => Some(coerce_text(v)),
    };
    MedicationEntry {
        name: take("name"),
        dosage: take("dosage"),
        frequency: take("frequency"),
        duration: take("duration"),
        extra: obj,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_fence_is_preferred() {
        let raw = "intro\n```\nnot this\n```\n```json\n{\"a\": 1}\n```\n";
        // The tagged block wins even when an untagged one comes first.
        assert_eq!(extract_candidate(raw), "{\"a\": 1}");
    }

    #[test]
    fn prose_around_fence_is_ignored() {
        let raw = "Here is the result:\n```json\n{\"patient_name\":\"X\"}\n```\nThanks!";
        assert_eq!(extract_candidate(raw), "{\"patient_name\":\"X\"}");
        let record = parse_response(raw).unwrap();
        assert_eq!(record.patient_name, "X");
        assert_eq!(record.date, "N/A");
    }

    #[test]
    fn untagged_fence_drops_language_line() {
        assert_eq!(extract_candidate("```JSON\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_candidate("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_candidate("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        assert_eq!(extract_candidate("```json\n{\"a\": 2}\n"), "{\"a\": 2}");
    }

    #[test]
    fn bare_text_is_trimmed() {
        assert_eq!(extract_candidate("  \n{\"a\": 3}\n "), "{\"a\": 3}");
        assert_eq!(extract_candidate("\u{FEFF}{}"), "{}");
    }

    #[test]
    fn single_quotes_rewritten_when_no_double_quotes() {
        assert_eq!(normalise_quotes("{'a': 'b'}"), "{\"a\": \"b\"}");
        let record = parse_response("{'a': 'b'}").unwrap();
        assert_eq!(record.extra.get("a"), Some(&json!("b")));
    }

    #[test]
    fn apostrophe_kept_when_double_quotes_present() {
        let text = r#"{"a": "it's fine"}"#;
        assert!(matches!(normalise_quotes(text), Cow::Borrowed(_)));
        let record = parse_response(text).unwrap();
        assert_eq!(record.extra.get("a"), Some(&json!("it's fine")));
    }

    #[test]
    fn absent_fields_are_backfilled() {
        let record = parse_response(r#"{"patient_name": "Jane Doe"}"#).unwrap();
        assert_eq!(record.patient_name, "Jane Doe");
        assert!(record.medications.is_empty());
        for key in SCALAR_FIELDS.iter().filter(|k| **k != "patient_name") {
            assert_eq!(record.field(key), Some("N/A"), "field {key}");
        }
    }

    #[test]
    fn present_but_empty_or_null_is_not_backfilled() {
        let record = parse_response(r#"{"date": "", "remarks": null, "medications": null}"#).unwrap();
        assert_eq!(record.date, "");
        assert_eq!(record.remarks, "");
        assert!(record.medications.is_empty());
        assert_eq!(record.address, "N/A");
    }

    #[test]
    fn backfill_only_touches_absent_keys() {
        let mut map = json!({"date": null, "medications": "x"})
            .as_object()
            .cloned()
            .unwrap();
        backfill(&mut map);
        assert_eq!(map["date"], Value::Null);
        assert_eq!(map["medications"], json!("x"));
        assert_eq!(map["refill"], json!("N/A"));
        assert_eq!(map.len(), SCALAR_FIELDS.len() + 1);
    }

    #[test]
    fn garbage_is_a_parse_failure_with_raw_text() {
        let err = parse_response("not json at all {{{").unwrap_err();
        assert_eq!(err.raw, "not json at all {{{");
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn failure_keeps_original_raw_not_candidate() {
        let raw = "```json\n{\"a\": \n```";
        let err = parse_response(raw).unwrap_err();
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn non_object_json_is_rejected() {
        let err = parse_response("[1, 2, 3]").unwrap_err();
        assert_eq!(err.reason, "expected a JSON object");
        assert!(parse_response("\"just a string\"").is_err());
    }

    #[test]
    fn scalar_values_are_coerced_to_text() {
        let record = parse_response(r#"{"refill": 2, "date": true, "remarks": ["a", "b"]}"#).unwrap();
        assert_eq!(record.refill, "2");
        assert_eq!(record.date, "true");
        assert_eq!(record.remarks, r#"["a","b"]"#);
    }

    #[test]
    fn medications_are_read_leniently() {
        let raw = r#"{"medications": [
            {"name": "Amoxicillin", "dosage": "500mg", "frequency": "TID", "duration": "7 days"},
            "Paracetamol",
            42,
            {"name": "Cetirizine", "dosage": null, "route": "oral"}
        ]}"#;
        let meds = parse_response(raw).unwrap().medications;
        assert_eq!(meds.len(), 3);
        assert_eq!(meds[0].duration.as_deref(), Some("7 days"));
        assert_eq!(meds[1].name.as_deref(), Some("Paracetamol"));
        assert_eq!(meds[1].dosage, None);
        assert_eq!(meds[2].dosage, None);
        assert_eq!(meds[2].extra.get("route"), Some(&json!("oral")));
    }

    #[test]
    fn medications_of_wrong_type_become_empty() {
        let record = parse_response(r#"{"medications": "see attached"}"#).unwrap();
        assert!(record.medications.is_empty());
    }

    #[test]
    fn unknown_keys_survive_into_extra() {
        let record = parse_response(r#"{"clinic": "Northside", "patient_name": "A"}"#).unwrap();
        assert_eq!(record.extra.len(), 1);
        assert!(record.to_json_pretty().unwrap().contains("Northside"));
    }
}
