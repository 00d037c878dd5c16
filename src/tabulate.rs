use crate::config::ListFieldNames;
use crate::error::SchemaError;
use crate::ledger::ChunkTally;
use crate::list_field;
use crate::table::Table;

/// Per-chunk tallies for both list fields, plus the rows that fed each one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabulationResult {
    pub unsupported: ChunkTally,
    pub udf: ChunkTally,
    /// Rows whose unsupported-functions field is non-empty.
    pub unsupported_rows: Table,
    /// Rows whose UDF field is non-empty.
    pub udf_rows: Table,
}

impl TabulationResult {
    pub fn unsupported_records(&self) -> usize {
        self.unsupported_rows.len()
    }

    pub fn udf_records(&self) -> usize {
        self.udf_rows.len()
    }
}

/// Counts every name in the two list fields of `joined_rows`. A row can land
/// in both subsets, one, or neither.
pub fn run(
    joined_rows: &Table,
    list_field_names: &ListFieldNames,
    chunk_id: u32,
) -> Result<TabulationResult, SchemaError> {
    joined_rows.require_columns(
        "joined table",
        &[list_field_names.unsupported.as_str(), list_field_names.udf.as_str()],
    )?;

    let (unsupported_rows, unsupported) = tabulate_field(joined_rows, &list_field_names.unsupported, chunk_id);
    let (udf_rows, udf) = tabulate_field(joined_rows, &list_field_names.udf, chunk_id);

    Ok(TabulationResult {
        unsupported,
        udf,
        unsupported_rows,
        udf_rows,
    })
}

fn tabulate_field(table: &Table, column: &str, chunk_id: u32) -> (Table, ChunkTally) {
    let idx = table.column_index(column).unwrap_or_default();
    let subset = table.filter_rows(|row| list_field::has_entries(row[idx].as_deref()));

    let mut tally = ChunkTally::new(chunk_id);
    for row in subset.rows() {
        for name in list_field::parse(row[idx].as_deref()) {
            tally.record(&name);
        }
    }
    (subset, tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn joined(rows: Vec<(Option<String>, Option<String>)>) -> Table {
        Table::new(
            vec![
                "original_query".to_string(),
                "unsupported_functions".to_string(),
                "udf_list".to_string(),
            ],
            rows.into_iter()
                .map(|(unsupported, udf)| vec![cell("q"), unsupported, udf])
                .collect(),
        )
    }

    #[test]
    fn partitions_rows_non_exclusively() {
        let table = joined(vec![
            (cell("['nvl']"), cell("['my_udf']")),
            (cell("[]"), cell("['my_udf']")),
            (None, cell(" [] ")),
            (cell("decode"), None),
        ]);
        let result = run(&table, &ListFieldNames::default(), 3).unwrap();
        assert_eq!(result.unsupported_records(), 2);
        assert_eq!(result.udf_records(), 2);
        assert_eq!(result.udf.get("my_udf"), Some(2));
        assert_eq!(result.unsupported.get("nvl"), Some(1));
        assert_eq!(result.unsupported.get("decode"), Some(1));
        assert_eq!(result.unsupported.chunk_id, 3);
    }

    #[test]
    fn repeated_names_in_one_cell_count_each_occurrence() {
        let table = joined(vec![(cell("['nvl', 'nvl', 'decode']"), None)]);
        let result = run(&table, &ListFieldNames::default(), 1).unwrap();
        assert_eq!(result.unsupported.get("nvl"), Some(2));
        assert!(result.udf.is_empty());
        assert!(result.udf_rows.is_empty());
    }

    #[test]
    fn bare_call_is_counted_unsplit() {
        let table = joined(vec![(cell("foo(a, b)"), None)]);
        let result = run(&table, &ListFieldNames::default(), 1).unwrap();
        let counts: Vec<(&str, u64)> = result
            .unsupported
            .counts()
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        assert_eq!(counts, vec![("foo(a, b)", 1)]);
    }

    #[test]
    fn missing_list_field_is_a_schema_error() {
        let table = Table::new(vec!["udf_list".to_string()], vec![]);
        let err = run(&table, &ListFieldNames::default(), 1).unwrap_err();
        assert_eq!(err.columns, vec!["unsupported_functions"]);
    }
}
