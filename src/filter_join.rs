//! Narrow a source chunk to finished PowerBI SELECTs and join the surviving
//! keys against the chunk's companion table.

use crate::config::{FilterSpec, CLIENT_APPLICATION_MATCH, EXECUTION_STATUS_MATCH, STATEMENT_TYPE_MATCH};
use crate::error::SchemaError;
use crate::table::Table;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

pub const ORIGINAL_QUERY_COLUMN: &str = "original_query";
pub const EXTRACTED_KEY_COLUMN: &str = "extracted_hash";

lazy_static! {
    // Lowercase hex only: an uppercase token never matches.
    static ref JOIN_KEY_RE: Regex = Regex::new(r"inmobi::([a-f0-9]{64})").unwrap();
}

/// Expected, non-fatal reasons a chunk produces no joined rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NoFilterMatch,
    CompanionNotFound,
    NoJoinMatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoFilterMatch => "no rows matched filter",
            SkipReason::CompanionNotFound => "companion not found",
            SkipReason::NoJoinMatch => "no matching records",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterJoinOutput {
    /// Deduplicated join keys of the filtered rows, one column named after the key.
    pub unique_keys: Table,
    /// Matching companion rows with the extracted key appended.
    pub joined: Table,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterJoinOutcome {
    Joined(FilterJoinOutput),
    Skipped(SkipReason),
}

/// Returns the 64-character key following `inmobi::` in a query, if any.
pub fn extract_join_key(query: &str) -> Option<&str> {
    JOIN_KEY_RE
        .captures(query)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Applies the three equality filters and returns the distinct non-null join
/// keys in first-seen order, or `None` when no row passes.
pub fn filter_unique_keys(chunk_rows: &Table, spec: &FilterSpec) -> Result<Option<Vec<String>>, SchemaError> {
    chunk_rows.require_columns("source chunk", &spec.columns())?;
    let column = |name: &str| chunk_rows.column_index(name).unwrap_or_default();
    let stmt_idx = column(spec.statement_type.as_str());
    let app_idx = column(spec.client_application.as_str());
    let status_idx = column(spec.execution_status.as_str());
    let key_idx = column(spec.join_key.as_str());

    let mut matched_any = false;
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in chunk_rows.rows() {
        let matches = row[stmt_idx].as_deref() == Some(STATEMENT_TYPE_MATCH)
            && row[app_idx].as_deref() == Some(CLIENT_APPLICATION_MATCH)
            && row[status_idx].as_deref() == Some(EXECUTION_STATUS_MATCH);
        if !matches {
            continue;
        }
        matched_any = true;
        if let Some(key) = row[key_idx].as_deref() {
            if seen.insert(key) {
                keys.push(key.to_string());
            }
        }
    }

    Ok(matched_any.then_some(keys))
}

/// Filters the chunk, then joins the surviving keys against the companion.
pub fn run(
    chunk_rows: &Table,
    companion_lookup: Option<&Table>,
    filter_spec: &FilterSpec,
) -> Result<FilterJoinOutcome, SchemaError> {
    match filter_unique_keys(chunk_rows, filter_spec)? {
        Some(keys) => join(keys, companion_lookup, &filter_spec.join_key),
        None => Ok(FilterJoinOutcome::Skipped(SkipReason::NoFilterMatch)),
    }
}

/// Keeps the companion rows whose `original_query` carries one of `keys`,
/// appending the extracted key as [`EXTRACTED_KEY_COLUMN`].
pub fn join(
    keys: Vec<String>,
    companion_lookup: Option<&Table>,
    join_key_column: &str,
) -> Result<FilterJoinOutcome, SchemaError> {
    let companion = match companion_lookup {
        Some(table) => table,
        None => return Ok(FilterJoinOutcome::Skipped(SkipReason::CompanionNotFound)),
    };
    companion.require_columns("companion table", &[ORIGINAL_QUERY_COLUMN])?;
    let query_idx = companion.column_index(ORIGINAL_QUERY_COLUMN).unwrap_or_default();

    let extracted: Vec<Option<String>> = companion
        .rows()
        .iter()
        .map(|row| {
            row[query_idx]
                .as_deref()
                .and_then(extract_join_key)
                .map(str::to_string)
        })
        .collect();

    let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let key_idx = companion.columns().len();
    let joined = companion
        .with_column(EXTRACTED_KEY_COLUMN, extracted)
        .filter_rows(|row| row[key_idx].as_deref().is_some_and(|k| key_set.contains(k)));

    if joined.is_empty() {
        return Ok(FilterJoinOutcome::Skipped(SkipReason::NoJoinMatch));
    }

    let unique_keys = Table::new(
        vec![join_key_column.to_string()],
        keys.into_iter().map(|k| vec![Some(k)]).collect(),
    );
    Ok(FilterJoinOutcome::Joined(FilterJoinOutput { unique_keys, joined }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn source(rows: Vec<[Option<String>; 4]>) -> Table {
        Table::new(
            FilterSpec::default().columns().iter().map(|c| c.to_string()).collect(),
            rows.into_iter().map(|r| r.to_vec()).collect(),
        )
    }

    fn passing(key: &str) -> [Option<String>; 4] {
        [cell("SELECT"), cell("PowerBI"), cell("FINISHED"), cell(key)]
    }

    fn companion(queries: &[&str]) -> Table {
        Table::new(
            vec!["original_query".to_string(), "udf_list".to_string()],
            queries.iter().map(|q| vec![cell(q), cell("[]")]).collect(),
        )
    }

    #[test]
    fn filter_keeps_only_matching_rows() {
        let table = source(vec![
            passing("H1"),
            [cell("SELECT"), cell("PowerBI"), cell("RUNNING"), cell("H2")],
        ]);
        let keys = filter_unique_keys(&table, &FilterSpec::default()).unwrap();
        assert_eq!(keys, Some(vec!["H1".to_string()]));
    }

    #[test]
    fn keys_are_deduplicated_and_nulls_dropped() {
        let table = source(vec![
            passing("H1"),
            passing("H1"),
            [cell("SELECT"), cell("PowerBI"), cell("FINISHED"), None],
            passing("H2"),
        ]);
        let keys = filter_unique_keys(&table, &FilterSpec::default()).unwrap();
        assert_eq!(keys, Some(vec!["H1".to_string(), "H2".to_string()]));
    }

    #[test]
    fn missing_columns_are_a_schema_error() {
        let table = Table::new(vec!["statement_type".to_string()], vec![]);
        let err = run(&table, None, &FilterSpec::default()).unwrap_err();
        assert_eq!(
            err.columns,
            vec!["client_application", "execution_status", "query_Hash"]
        );
    }

    #[test]
    fn no_filter_match_skips_before_companion_check() {
        let table = source(vec![[cell("INSERT"), cell("PowerBI"), cell("FINISHED"), cell("H1")]]);
        let outcome = run(&table, None, &FilterSpec::default()).unwrap();
        assert_eq!(outcome, FilterJoinOutcome::Skipped(SkipReason::NoFilterMatch));
    }

    #[test]
    fn absent_companion_skips() {
        let table = source(vec![passing("H1")]);
        let outcome = run(&table, None, &FilterSpec::default()).unwrap();
        assert_eq!(outcome, FilterJoinOutcome::Skipped(SkipReason::CompanionNotFound));
    }

    #[test]
    fn companion_without_original_query_is_a_schema_error() {
        let table = source(vec![passing("H1")]);
        let other = Table::new(vec!["query".to_string()], vec![vec![cell("x")]]);
        let err = run(&table, Some(&other), &FilterSpec::default()).unwrap_err();
        assert_eq!(err.columns, vec!["original_query"]);
    }

    #[test]
    fn lowercase_key_joins_and_uppercase_does_not() {
        let key = "a".repeat(64);
        let table = source(vec![passing(&key)]);
        let lower = format!("select 1 -- inmobi::{} trailing", key);
        let upper = format!("select 2 -- inmobi::{}", key.to_uppercase());
        let companion = companion(&[lower.as_str(), upper.as_str(), "select 3"]);

        let outcome = run(&table, Some(&companion), &FilterSpec::default()).unwrap();
        let output = match outcome {
            FilterJoinOutcome::Joined(output) => output,
            other => panic!("expected a join, got {:?}", other),
        };
        assert_eq!(output.joined.len(), 1);
        assert_eq!(output.joined.value(0, 0), Some(lower.as_str()));
        assert_eq!(output.joined.columns().last().map(String::as_str), Some(EXTRACTED_KEY_COLUMN));
        assert_eq!(output.joined.value(0, 2), Some(key.as_str()));
        assert_eq!(output.unique_keys.columns(), ["query_Hash".to_string()]);
        assert_eq!(output.unique_keys.len(), 1);
    }

    #[test]
    fn unmatched_companion_skips() {
        let table = source(vec![passing(&"b".repeat(64))]);
        let query = format!("inmobi::{}", "c".repeat(64));
        let outcome = run(&table, Some(&companion(&[query.as_str()])), &FilterSpec::default()).unwrap();
        assert_eq!(outcome, FilterJoinOutcome::Skipped(SkipReason::NoJoinMatch));
    }

    #[test]
    fn join_with_no_keys_matches_nothing() {
        let query = format!("inmobi::{}", "d".repeat(64));
        let outcome = join(Vec::new(), Some(&companion(&[query.as_str()])), "query_Hash").unwrap();
        assert_eq!(outcome, FilterJoinOutcome::Skipped(SkipReason::NoJoinMatch));
    }

    #[test]
    fn extract_requires_the_marker() {
        let key = "0123456789abcdef".repeat(4);
        assert_eq!(extract_join_key(&format!("x inmobi::{} y", key)), Some(key.as_str()));
        assert_eq!(extract_join_key(&key), None);
        assert_eq!(extract_join_key("inmobi::abc"), None);
    }
}
