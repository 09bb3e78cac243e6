use std::{fmt, sync::Arc};

use crate::meta::{col_type::TableColumn, col_value::ColValue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowType::Insert => write!(f, "insert"),
            RowType::Update => write!(f, "update"),
            RowType::Delete => write!(f, "delete"),
        }
    }
}

/// One row modification delivered by an extractor.
///
/// For updates, `rows` holds flattened image pairs: even indexes are
/// before-images, odd indexes the matching after-images.
#[derive(Clone, Debug)]
pub struct RowData {
    pub row_type: RowType,
    pub schema: String,
    pub tb: String,
    pub columns: Arc<Vec<TableColumn>>,
    pub rows: Vec<Vec<ColValue>>,
}

impl RowData {
    pub fn new(
        row_type: RowType,
        schema: &str,
        tb: &str,
        columns: Arc<Vec<TableColumn>>,
        rows: Vec<Vec<ColValue>>,
    ) -> Self {
        Self {
            row_type,
            schema: schema.to_string(),
            tb: tb.to_string(),
            columns,
            rows,
        }
    }
}
