//
// report.rs
// Tricorder-rs
//
// Parses the EvaluateSegmentation XML report into a nested JSON-like value and flattens its metrics.
//

use std::collections::BTreeMap;
use std::path::Path;

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use crate::error::EvaluationError;

/// Read and parse the report written by the evaluation tool.
pub fn read_report(path: &Path) -> Result<Value, EvaluationError> {
    let malformed = |reason: String| EvaluationError::MalformedReport {
        path: path.to_path_buf(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    parse_report(&text).map_err(|e| malformed(e.to_string()))
}

/// Parse an XML document into a value keyed by the root element name.
///
/// Attributes become `@name` keys, text content becomes `#text`, repeated
/// children are collected into arrays and attribute-less leaves collapse to
/// their text (or `null` when empty).
pub fn parse_report(text: &str) -> Result<Value, roxmltree::Error> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    let mut map = Map::new();
    map.insert(root.tag_name().name().to_string(), element_to_value(root));
    Ok(Value::Object(map))
}

fn element_to_value(node: Node<'_, '_>) -> Value {
    let mut map = Map::new();
    for attr in node.attributes() {
        map.insert(format!("@{}", attr.name()), Value::String(attr.value().to_string()));
    }

    let mut text = String::new();
    for child in node.children() {
        if child.is_element() {
            let name = child.tag_name().name().to_string();
            let value = element_to_value(child);
            match map.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(name, value);
                }
            }
        } else if child.is_text() {
            text.push_str(child.text().unwrap_or_default());
        }
    }

    let text = text.trim();
    if map.is_empty() {
        return if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
    }
    if !text.is_empty() {
        map.insert("#text".to_string(), Value::String(text.to_string()));
    }
    Value::Object(map)
}

/// Flatten `measurement.metrics` into metric name → score.
pub fn flatten_metrics(report: &Value) -> Result<BTreeMap<String, f64>, EvaluationError> {
    let metrics = report
        .get("measurement")
        .and_then(|m| m.get("metrics"))
        .and_then(Value::as_object)
        .ok_or(EvaluationError::MissingMetrics)?;

    let mut scores = BTreeMap::new();
    for (name, entry) in metrics {
        let score = entry
            .get("@value")
            .and_then(Value::as_str)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .ok_or_else(|| EvaluationError::InvalidScore {
                metric: name.clone(),
            })?;
        scores.insert(name.clone(), score);
    }
    Ok(scores)
}
