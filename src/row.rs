//! Rows and assembled query results.
use std::{collections::HashMap, sync::Arc};

use crate::{protocol::FieldDescription, types::PgValue};

/// One decoded result row.
#[derive(Debug, Clone)]
pub struct Row {
    fields: Arc<[FieldDescription]>,
    columns: Vec<PgValue>,
}

impl Row {
    pub(crate) fn new(fields: Arc<[FieldDescription]>, columns: Vec<PgValue>) -> Self {
        Self { fields, columns }
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn columns(&self) -> &[PgValue] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column by position.
    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.columns.get(index)
    }

    /// Column by field name; the first match wins when names collide.
    pub fn get_named(&self, name: &str) -> Option<&PgValue> {
        let at = self.fields.iter().position(|f| f.name == name)?;
        self.columns.get(at)
    }

    /// The object-shaped view of the row.
    pub fn into_map(self) -> HashMap<String, PgValue> {
        self.fields
            .iter()
            .map(|f| f.name.clone())
            .zip(self.columns)
            .collect()
    }
}

impl std::ops::Index<usize> for Row {
    type Output = PgValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.columns[index]
    }
}

/// The assembled outcome of one query.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub(crate) fields: Vec<FieldDescription>,
    pub(crate) rows: Vec<Row>,
    pub(crate) row_count: u64,
    pub(crate) command_tag: Option<String>,
    pub(crate) suspended: bool,
}

impl QueryResult {
    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Number of `DataRow` messages delivered to this query.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// The command tag from `CommandComplete`, e.g. `SELECT 1`.
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// Rows affected according to the command tag.
    pub fn rows_affected(&self) -> u64 {
        self.command_tag.as_deref().map_or(0, tag_rows)
    }

    /// Whether the portal was suspended by the `Execute` row limit rather
    /// than run to completion. The caller decides whether to execute the
    /// portal again for more rows.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

/// Extract the affected row count from a command tag.
pub(crate) fn tag_rows(tag: &str) -> u64 {
    let mut parts = tag.split_whitespace();
    let Some(command) = parts.next() else {
        return 0;
    };
    let Some(rows) = parts.next() else {
        return 0;
    };
    match command {
        // INSERT is `INSERT oid rows`; the oid is always 0 nowadays
        "INSERT" => parts.next().unwrap_or_default(),
        "SELECT" => rows,
        "UPDATE" => rows,
        "DELETE" => rows,
        "MERGE" => rows,
        "FETCH" => rows,
        "MOVE" => rows,
        "COPY" => rows,
        _ => return 0,
    }
    .parse()
    .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_row_counts() {
        assert_eq!(tag_rows("SELECT 3"), 3);
        assert_eq!(tag_rows("INSERT 0 1"), 1);
        assert_eq!(tag_rows("UPDATE 12"), 12);
        assert_eq!(tag_rows("CREATE TABLE"), 0);
        assert_eq!(tag_rows("BEGIN"), 0);
    }

    #[test]
    fn row_lookup_by_name_and_index() {
        use crate::protocol::Format;

        let fields: Arc<[FieldDescription]> = Arc::from(vec![FieldDescription {
            name: "id".into(),
            table_oid: 0,
            column_id: 0,
            type_oid: crate::protocol::oid::INT4,
            type_size: 4,
            type_modifier: -1,
            format: Format::Text,
        }]);
        let row = Row::new(fields, vec![PgValue::Int4(9)]);

        assert_eq!(row.get(0), Some(&PgValue::Int4(9)));
        assert_eq!(row.get_named("id"), Some(&PgValue::Int4(9)));
        assert_eq!(row.get_named("missing"), None);
        assert_eq!(row.into_map().remove("id"), Some(PgValue::Int4(9)));
    }
}
