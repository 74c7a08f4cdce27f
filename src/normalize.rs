//! Turns whatever the vision model sent back into an [`AnnotationRecord`].
//!
//! The response may be a parsed object, free text (possibly with a JSON
//! object buried in it), a list of content fragments, or nothing at all.
//! [`normalize`] accepts all of them and always returns a record: fields it
//! cannot make sense of fall back to their defaults.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::geometry::GridSpec;
use crate::schema::{AnnotationRecord, BBox, FrameRecord, VisionFields};

pub(crate) const EXTRA_RAW_RESULT: &str = "raw_vision_result";
pub(crate) const EXTRA_GRID_INFO: &str = "grid_info";
pub(crate) const EXTRA_WARNINGS: &str = "normalize_warnings";

/// An object counts as an annotation only if it has at least one of these.
const ANNOTATION_KEYS: [&str; 7] = [
    "caption",
    "tags",
    "scores",
    "has_child",
    "num_children",
    "main_subject",
    "bbox",
];

/// Builds the annotation for `frame` from a raw vision response.
pub(crate) fn normalize(frame: &FrameRecord, raw: &Value, grid: &GridSpec) -> AnnotationRecord {
    let mut warnings = Vec::new();

    let (fields, raw_result) = match as_object(raw) {
        Some(obj) => {
            let fields = fields_from_object(&obj, &mut warnings);
            (fields, Value::Object(obj))
        }
        None => {
            let fields = VisionFields {
                caption: response_text(raw).trim().to_owned(),
                ..Default::default()
            };
            (fields, raw.clone())
        }
    };

    for warning in &warnings {
        warn!(frame = %frame.frame_path, "{warning}");
    }

    let mut extra = BTreeMap::new();
    extra.insert(EXTRA_RAW_RESULT.to_owned(), raw_result);
    if !warnings.is_empty() {
        extra.insert(EXTRA_WARNINGS.to_owned(), json!(warnings));
    }

    let mut record = AnnotationRecord::new(frame, fields, grid, extra);
    let grid_info = match &record.placement {
        Some(p) => json!({
            "bbox": p.bbox,
            "grid_row": p.grid_row,
            "grid_col": p.grid_col,
            "grid_label": p.grid_label,
        }),
        None => json!({
            "bbox": null,
            "grid_row": null,
            "grid_col": null,
            "grid_label": null,
        }),
    };
    record.extra.insert(EXTRA_GRID_INFO.to_owned(), grid_info);
    record
}

/// The annotation object carried by `raw`, if there is one.
fn as_object(raw: &Value) -> Option<Map<String, Value>> {
    let obj = match raw {
        Value::Object(obj) => Some(obj.clone()),
        Value::String(text) => extract_object(text),
        Value::Array(_) => extract_object(&response_text(raw)),
        _ => None,
    };
    obj.filter(|obj| ANNOTATION_KEYS.iter().any(|key| obj.contains_key(*key)))
}

/// Flattens a response to text. Fragment lists keep their text parts only.
fn response_text(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                    obj.get("text").and_then(Value::as_str)
                }
                _ => None,
            })
            .collect(),
        other => other.to_string(),
    }
}

/// Finds a JSON object in model output: the whole text, a fenced code block,
/// or the outermost `{...}` span.
fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim();
    let parse = |s: &str| match serde_json::from_str::<Value>(s.trim()) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    };

    if let Some(obj) = parse(text) {
        return Some(obj);
    }
    if let Some(inner) = fenced_block(text) {
        if let Some(obj) = parse(inner) {
            return Some(obj);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| parse(&text[start..=end])).flatten()
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let body = &text[open + 3..];
    // Skip an info string such as `json`.
    let body = &body[body.find('\n')? + 1..];
    let close = body.find("```")?;
    Some(&body[..close])
}

fn fields_from_object(obj: &Map<String, Value>, warnings: &mut Vec<String>) -> VisionFields {
    VisionFields {
        caption: obj.get("caption").map(to_text).unwrap_or_default(),
        tags: obj.get("tags").map(to_tags).unwrap_or_default(),
        scores: obj.get("scores").map(to_scores).unwrap_or_default(),
        has_child: obj.get("has_child").is_some_and(truthy),
        num_children: obj.get("num_children").map(to_count).unwrap_or(0),
        main_subject: obj.get("main_subject").map(to_text).unwrap_or_default(),
        bbox: match obj.get("bbox") {
            None | Some(Value::Null) => None,
            Some(value) => match to_bbox(value) {
                Ok(bbox) => Some(bbox),
                Err(reason) => {
                    warnings.push(format!("discarding bbox {value}: {reason}"));
                    None
                }
            },
        },
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(to_text)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

/// Numeric entries only, clamped into `[0, 1]`.
fn to_scores(value: &Value) -> BTreeMap<String, f64> {
    let Value::Object(obj) = value else {
        return BTreeMap::new();
    };
    obj.iter()
        .filter_map(|(name, v)| to_number(v).map(|n| (name.clone(), n.clamp(0.0, 1.0))))
        .collect()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "no" | "0" => false,
            _ => true,
        },
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

fn to_count(value: &Value) -> u32 {
    to_number(value)
        .map(|n| n.trunc().clamp(0.0, u32::MAX as f64) as u32)
        .unwrap_or(0)
}

/// First four numbers of an array; extra elements are ignored.
fn to_bbox(value: &Value) -> Result<BBox, String> {
    let Value::Array(items) = value else {
        return Err("not an array".to_owned());
    };
    if items.len() < 4 {
        return Err(format!("expected 4 coordinates, got {}", items.len()));
    }
    let mut coords = [0.0; 4];
    for (slot, item) in coords.iter_mut().zip(items) {
        *slot = to_number(item).ok_or_else(|| format!("{item} is not a number"))?;
    }
    BBox::new(coords).map_err(|e| e.to_string())
}
