//! JSON-lines batch parser.
//!
//! One record per non-blank line:
//!
//! ```json
//! {"external_id": "1000", "payload": {"title": "...", "author": ["A", "B"]}, "citations": ["2000"]}
//! ```
//!
//! Payload values may be a single string or a list of strings. A line that
//! is not a valid record becomes a `RecordDefect`; the rest of the batch is
//! unaffected.

use crate::{Payload, RawItem, RawRecord, RecordDefect};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct JsonLine {
    #[serde(alias = "pmid")]
    external_id: String,
    #[serde(default)]
    payload: BTreeMap<String, FieldValue>,
    #[serde(default, alias = "citation_target_ids")]
    citations: Vec<String>,
}

impl From<JsonLine> for RawRecord {
    fn from(line: JsonLine) -> Self {
        let mut payload = Payload::new();
        for (field, value) in line.payload {
            match value {
                FieldValue::One(v) => payload.push(field, v),
                FieldValue::Many(vs) => {
                    for v in vs {
                        payload.push(field.clone(), v);
                    }
                }
            }
        }
        RawRecord {
            external_id: line.external_id,
            payload,
            citation_target_ids: line.citations,
        }
    }
}

/// Best effort id for defect reports on lines that failed to deserialize.
fn salvage_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    ["external_id", "pmid"]
        .iter()
        .find_map(|key| value.get(*key))
        .and_then(|id| match id {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Parse a JSON-lines batch. Never fails as a whole.
pub fn parse_jsonl(text: &str) -> Vec<RawItem> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(position, line)| match serde_json::from_str::<JsonLine>(line) {
            Ok(parsed) => RawItem::Parsed(parsed.into()),
            Err(err) => RawItem::Defect(RecordDefect {
                position,
                external_id: salvage_id(line),
                reason: format!("invalid JSON record: {err}"),
            }),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_payload_shapes() {
        let text = r#"{"external_id": "1", "payload": {"title": "T", "author": ["A", "B"]}, "citations": ["2", "3"]}

{"pmid": "2"}
"#;
        let items = parse_jsonl(text);
        assert_eq!(items.len(), 2);

        let RawItem::Parsed(first) = &items[0] else {
            panic!("first line should parse");
        };
        assert_eq!(first.external_id, "1");
        assert_eq!(first.payload.get("author"), ["A", "B"]);
        assert_eq!(first.payload.first("title"), Some("T"));
        assert_eq!(first.citation_target_ids, vec!["2", "3"]);

        let RawItem::Parsed(second) = &items[1] else {
            panic!("second line should parse");
        };
        assert!(second.payload.is_empty());
        assert!(second.citation_target_ids.is_empty());
    }

    #[test]
    fn bad_line_is_isolated() {
        let text = concat!(
            "{\"external_id\": \"1\"}\n",
            "{\"external_id\": 2, \"citations\": \"not a list\"}\n",
            "{\"external_id\": \"3\"}\n",
        );
        let items = parse_jsonl(text);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], RawItem::Parsed(_)));
        assert!(matches!(items[2], RawItem::Parsed(_)));

        let RawItem::Defect(defect) = &items[1] else {
            panic!("second line should be a defect");
        };
        assert_eq!(defect.position, 1);
        assert_eq!(defect.external_id.as_deref(), Some("2"));
    }

    #[test]
    fn garbage_line_has_no_id() {
        let items = parse_jsonl("not json at all\n");
        let RawItem::Defect(defect) = &items[0] else {
            panic!("garbage should be a defect");
        };
        assert!(defect.external_id.is_none());
    }
}
