//! Parsing of loosely-quoted list cells such as `['foo', 'bar']`.
//!
//! Two shapes occur in practice: a bracketed, usually single-quoted list, and a
//! single bare call such as `foo(a, b)`. Bare cells are never split on commas.

use serde_json::Value;

/// How a cell was interpreted. Every branch is observable so callers and tests
/// can tell a clean decode from the manual-split fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCell {
    /// Null, blank, or the literal `[]`.
    Empty,
    /// A bracketed cell that decoded as a JSON array after quote normalisation.
    Decoded(Vec<String>),
    /// A bracketed cell that decoded as a JSON scalar.
    ScalarWrapped(String),
    /// A bracketed cell that failed to decode and was split on commas.
    ManualSplit(Vec<String>),
    /// No brackets: the whole trimmed cell is one name.
    Bare(String),
}

impl ListCell {
    pub fn into_names(self) -> Vec<String> {
        match self {
            ListCell::Empty => Vec::new(),
            ListCell::Decoded(names) | ListCell::ManualSplit(names) => names,
            ListCell::ScalarWrapped(name) | ListCell::Bare(name) => vec![name],
        }
    }
}

pub fn classify(cell: Option<&str>) -> ListCell {
    let raw = match cell {
        None => return ListCell::Empty,
        Some(raw) => raw,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return ListCell::Empty;
    }

    if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
        return ListCell::Bare(trimmed.to_string());
    }

    match serde_json::from_str::<Value>(&trimmed.replace('\'', "\"")) {
        Ok(Value::Array(items)) => ListCell::Decoded(items.into_iter().filter_map(value_to_name).collect()),
        Ok(scalar) => match value_to_name(scalar) {
            Some(name) => ListCell::ScalarWrapped(name),
            None => ListCell::Empty,
        },
        Err(_) => ListCell::ManualSplit(manual_split(trimmed)),
    }
}

/// Parses a cell into its names, preserving order and duplicates.
/// Never fails; unparseable input degrades to the comma split.
pub fn parse(cell: Option<&str>) -> Vec<String> {
    classify(cell).into_names()
}

/// True when the cell carries anything besides blank text or `[]`.
pub fn has_entries(cell: Option<&str>) -> bool {
    match cell {
        None => false,
        Some(raw) => {
            let trimmed = raw.trim();
            !trimmed.is_empty() && trimmed != "[]"
        }
    }
}

fn value_to_name(value: Value) -> Option<String> {
    let name = match value {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn manual_split(text: &str) -> Vec<String> {
    text.trim_matches(|c: char| c == '[' || c == ']')
        .replace(['\'', '"'], "")
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_shapes_yield_nothing() {
        assert!(parse(None).is_empty());
        assert!(parse(Some("")).is_empty());
        assert!(parse(Some("[]")).is_empty());
        assert!(parse(Some("   ")).is_empty());
        assert_eq!(classify(Some(" [] ")), ListCell::Empty);
    }

    #[test]
    fn single_quoted_list_decodes() {
        assert_eq!(
            classify(Some("['foo','bar']")),
            ListCell::Decoded(vec!["foo".to_string(), "bar".to_string()])
        );
    }

    #[test]
    fn double_quoted_list_decodes() {
        assert_eq!(parse(Some(r#"["TO_CHAR", "NVL2"]"#)), vec!["TO_CHAR", "NVL2"]);
    }

    #[test]
    fn duplicates_are_preserved() {
        assert_eq!(parse(Some("['nvl', 'nvl']")), vec!["nvl", "nvl"]);
    }

    #[test]
    fn bare_name_is_one_entry() {
        assert_eq!(classify(Some("single_func")), ListCell::Bare("single_func".to_string()));
    }

    #[test]
    fn bare_call_with_comma_is_not_split() {
        assert_eq!(parse(Some("foo(a, b)")), vec!["foo(a, b)"]);
    }

    #[test]
    fn unquoted_list_falls_back_to_split() {
        assert_eq!(
            classify(Some("[foo, bar , ,baz]")),
            ListCell::ManualSplit(vec!["foo".to_string(), "bar".to_string(), "baz".to_string()])
        );
    }

    #[test]
    fn embedded_apostrophe_falls_back_to_split() {
        // normalising quotes breaks the JSON, so the cell is split by hand
        assert_eq!(
            classify(Some("['it's', 'fine']")),
            ListCell::ManualSplit(vec!["its".to_string(), "fine".to_string()])
        );
    }

    #[test]
    fn non_string_items_are_rendered_and_nulls_dropped() {
        assert_eq!(parse(Some("[1, null, 'x', '']")), vec!["1", "x"]);
    }

    #[test]
    fn has_entries_matches_partition_rule() {
        assert!(!has_entries(None));
        assert!(!has_entries(Some(" [] ")));
        assert!(!has_entries(Some("")));
        assert!(has_entries(Some("['x']")));
        assert!(has_entries(Some("x")));
    }
}
