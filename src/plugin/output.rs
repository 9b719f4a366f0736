//! Classification of plugin results.
//!
//! Plugins return arbitrary JSON-shaped values. Before a host can render
//! them they are sorted into one of a few kinds: HTML pages, structured data
//! that fits a table, plain text, or an error string.

use serde::Serialize;
use serde_json::Value;

use super::{PluginError, PluginResult, OUTPUT_TYPE_KEY};

/// A plugin result after classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ClassifiedResult {
    /// HTML to render as a page.
    Html(String),
    /// A mapping or a sequence, suitable for tabular rendering.
    Structured(Value),
    /// Anything else, stringified.
    Text(String),
    /// The plugin failed, or its output could not be used.
    Error(String),
}

/// Rows and columns derived from structured output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Column headers.
    pub columns: Vec<String>,
    /// Cell text, one inner vector per row.
    pub rows: Vec<Vec<String>>,
}

/// Classify a raw plugin result.
///
/// `name` is only used to build the error for HTML output whose content is
/// not a string.
pub fn classify(name: &str, value: Value) -> PluginResult<ClassifiedResult> {
    if let Value::Object(map) = &value {
        let is_html = map.get(OUTPUT_TYPE_KEY).and_then(Value::as_str) == Some("html");
        if is_html {
            return match map.get("content") {
                Some(Value::String(content)) => Ok(ClassifiedResult::Html(content.clone())),
                Some(other) => Err(PluginError::OutputTypeMismatch {
                    name: name.to_string(),
                    found: json_type_name(other).to_string(),
                }),
                None => Err(PluginError::OutputTypeMismatch {
                    name: name.to_string(),
                    found: "nothing".to_string(),
                }),
            };
        }
    }

    Ok(match value {
        Value::Object(_) | Value::Array(_) => ClassifiedResult::Structured(value),
        other => ClassifiedResult::Text(stringify(&other)),
    })
}

/// Classify the output of a static HTML plugin, which must be a string.
pub fn classify_static(name: &str, value: Value) -> ClassifiedResult {
    match value {
        Value::String(html) => ClassifiedResult::Html(html),
        other => ClassifiedResult::Error(format!(
            "Static HTML plugin '{}' did not return a string (got {}).",
            name,
            json_type_name(&other)
        )),
    }
}

impl ClassifiedResult {
    /// Short label of the kind, as used in tab titles.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Html(_) => "HTML",
            Self::Structured(_) => "JSON",
            Self::Text(_) => "Text",
            Self::Error(_) => "Error",
        }
    }

    /// Whether the plugin run failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Table view of structured output.
    ///
    /// Returns `None` for non-structured results and for sequences that are
    /// not made only of mappings.
    pub fn table(&self) -> Option<Table> {
        match self {
            Self::Structured(Value::Array(items)) => {
                let objects: Option<Vec<_>> = items.iter().map(Value::as_object).collect();
                let objects = objects?;

                let mut columns: Vec<String> =
                    objects.iter().flat_map(|o| o.keys().cloned()).collect();
                columns.sort();
                columns.dedup();

                let rows: Vec<Vec<String>> = objects
                    .iter()
                    .map(|o| {
                        columns
                            .iter()
                            .map(|key| o.get(key).map(stringify).unwrap_or_default())
                            .collect::<Vec<_>>()
                    })
                    .collect();

                Some(Table { columns, rows })
            }
            Self::Structured(Value::Object(map)) => Some(Table {
                columns: vec!["Key".to_string(), "Value".to_string()],
                rows: map.iter().map(|(k, v)| vec![k.clone(), stringify(v)]).collect(),
            }),
            _ => None,
        }
    }

    /// Plain-text rendering, used by non-graphical hosts.
    pub fn render_text(&self) -> String {
        match self {
            Self::Html(html) => html.clone(),
            Self::Text(text) | Self::Error(text) => text.clone(),
            Self::Structured(value) => match self.table() {
                Some(table) => table.render(),
                None => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            },
        }
    }
}

impl Table {
    /// Render as aligned plain-text columns.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let format_row = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(widths.iter().copied())
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut output = format_row(&self.columns);
        output.push('\n');
        output.push_str(
            &widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "),
        );
        for row in &self.rows {
            output.push('\n');
            output.push_str(&format_row(row));
        }
        output
    }
}

/// Stringify a JSON value the way a text view would show it.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_html_output() {
        let value = json!({"infoscava_output_type": "html", "content": "<b>x</b>"});
        assert_eq!(classify("p", value).unwrap(), ClassifiedResult::Html("<b>x</b>".to_string()));
    }

    #[test]
    fn test_html_with_non_string_content_is_mismatch() {
        let value = json!({"infoscava_output_type": "html", "content": 42});
        let err = classify("p", value).unwrap_err();
        assert!(matches!(err, PluginError::OutputTypeMismatch { ref found, .. } if found == "number"));
    }

    #[test]
    fn test_other_output_type_is_structured() {
        let value = json!({"infoscava_output_type": "markdown", "content": "x"});
        assert!(matches!(classify("p", value).unwrap(), ClassifiedResult::Structured(_)));
    }

    #[test]
    fn test_list_of_dicts_is_table() {
        let result = classify("p", json!([{"a": 1}, {"a": 2, "b": "x"}])).unwrap();
        let table = result.table().unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows, vec![vec!["1", ""], vec!["2", "x"]]);
    }

    #[test]
    fn test_single_dict_is_key_value() {
        let result = classify("p", json!({"size": 10, "kind": "elf"})).unwrap();
        let table = result.table().unwrap();
        assert_eq!(table.columns, vec!["Key", "Value"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_single_dict_rows_follow_plugin_order() {
        let value: Value =
            serde_json::from_str(r#"{"size": 10, "kind": "elf", "arch": "x86"}"#).unwrap();
        let table = classify("p", value).unwrap().table().unwrap();
        assert_eq!(
            table.rows,
            vec![vec!["size", "10"], vec!["kind", "elf"], vec!["arch", "x86"]]
        );
    }

    #[test]
    fn test_list_of_scalars_has_no_table() {
        let result = classify("p", json!([1, 2, 3])).unwrap();
        assert!(matches!(result, ClassifiedResult::Structured(_)));
        assert!(result.table().is_none());
        assert!(result.render_text().contains('2'));
    }

    #[test]
    fn test_scalars_are_text() {
        assert_eq!(classify("p", json!("plain")).unwrap(), ClassifiedResult::Text("plain".into()));
        assert_eq!(classify("p", json!(7)).unwrap(), ClassifiedResult::Text("7".into()));
        assert_eq!(classify("p", Value::Null).unwrap(), ClassifiedResult::Text("None".into()));
    }

    #[test]
    fn test_static_output_must_be_string() {
        assert_eq!(classify_static("s", json!("<p>hi</p>")), ClassifiedResult::Html("<p>hi</p>".into()));
        assert!(classify_static("s", json!({"a": 1})).is_error());
    }

    #[test]
    fn test_table_render_aligns_columns() {
        let table = Table {
            columns: vec!["name".to_string(), "v".to_string()],
            rows: vec![vec!["a".to_string(), "1".to_string()]],
        };
        assert_eq!(table.render(), "name  v\n----  -\na     1");
    }
}
