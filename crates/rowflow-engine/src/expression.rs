//! Per-row evaluation state handed to a pluggable expression compiler.
//!
//! The engine does not ship an expression language. Embedders register an
//! [`ExpressionCompiler`] on the pipeline [`Context`](crate::context::Context);
//! compiled [`Expression`]s read cells through a [`RowState`].

use std::collections::HashMap;
use std::sync::Arc;

use rowflow_types::{PipelineError, TableHeader, Value};

static NULL: Value = Value::Null;

/// A compiled expression evaluated once per row.
pub trait Expression: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if evaluation fails, e.g. on an unknown column.
    fn evaluate(&self, state: &RowState<'_>) -> Result<Value, PipelineError>;
}

impl<F> Expression for F
where
    F: Fn(&RowState<'_>) -> Result<Value, PipelineError> + Send + Sync,
{
    fn evaluate(&self, state: &RowState<'_>) -> Result<Value, PipelineError> {
        self(state)
    }
}

/// Turns expression source text into an [`Expression`].
pub trait ExpressionCompiler: Send + Sync {
    /// # Errors
    ///
    /// Returns a `Config` error when the source does not compile.
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>, PipelineError>;
}

impl<F> ExpressionCompiler for F
where
    F: Fn(&str) -> Result<Arc<dyn Expression>, PipelineError> + Send + Sync,
{
    fn compile(&self, source: &str) -> Result<Arc<dyn Expression>, PipelineError> {
        self(source)
    }
}

/// Name to physical positions for one header. Duplicate names keep every
/// position in public column order.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    header: TableHeader,
    positions: HashMap<String, Vec<usize>>,
}

impl ColumnIndex {
    #[must_use]
    pub fn new(header: &TableHeader) -> Self {
        let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
        for col in header.live() {
            positions
                .entry(col.name.clone())
                .or_default()
                .push(col.position);
        }
        Self {
            header: header.clone(),
            positions,
        }
    }

    /// All positions for `name`.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error when the name does not resolve.
    pub fn positions(&self, name: &str) -> Result<&[usize], PipelineError> {
        self.positions
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                PipelineError::header(
                    "COLUMN_NOT_FOUND",
                    format!("column not found: {name}"),
                    self.header.columns(),
                )
            })
    }

    #[must_use]
    pub fn header(&self) -> &TableHeader {
        &self.header
    }
}

/// The row under evaluation plus, for column-bound transforms, the active
/// column occurrence.
#[derive(Debug, Clone, Copy)]
pub struct RowState<'a> {
    index: &'a ColumnIndex,
    row: &'a [Value],
    row_number: u64,
    column: Option<(&'a str, usize)>,
}

impl<'a> RowState<'a> {
    #[must_use]
    pub fn new(index: &'a ColumnIndex, row: &'a [Value], row_number: u64) -> Self {
        Self {
            index,
            row,
            row_number,
            column: None,
        }
    }

    /// Bind the state to occurrence `occurrence` of column `name`.
    #[must_use]
    pub fn with_column(mut self, name: &'a str, occurrence: usize) -> Self {
        self.column = Some((name, occurrence));
        self
    }

    fn cell(&self, position: usize) -> &'a Value {
        self.row.get(position).unwrap_or(&NULL)
    }

    /// Value of `name`. For the bound column this is the active occurrence;
    /// otherwise the first one.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error on an unknown column.
    pub fn value(&self, name: &str) -> Result<&'a Value, PipelineError> {
        let positions = self.index.positions(name)?;
        let occurrence = match self.column {
            Some((bound, occ)) if bound == name => occ,
            _ => 0,
        };
        let position = positions.get(occurrence).or(positions.first()).copied();
        Ok(position.map_or(&NULL, |p| self.cell(p)))
    }

    /// Value of the bound column at the active occurrence.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when the state is not bound to a column.
    pub fn current(&self) -> Result<&'a Value, PipelineError> {
        let (name, _) = self.column.ok_or_else(|| {
            PipelineError::config(
                "NO_CURRENT_COLUMN",
                "expression is not bound to a column",
            )
        })?;
        self.value(name)
    }

    /// Every occurrence of `name`, in column order.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error on an unknown column.
    pub fn values(&self, name: &str) -> Result<Vec<&'a Value>, PipelineError> {
        Ok(self
            .index
            .positions(name)?
            .iter()
            .map(|&p| self.cell(p))
            .collect())
    }

    /// Running 1-based row number across the stream.
    #[must_use]
    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    #[must_use]
    pub fn column_name(&self) -> Option<&'a str> {
        self.column.map(|(name, _)| name)
    }

    /// Active occurrence index of the bound column (0 when unbound).
    #[must_use]
    pub fn occurrence(&self) -> usize {
        self.column.map_or(0, |(_, occ)| occ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::row;

    fn dup_header() -> TableHeader {
        TableHeader::from_names(&["id", "tag", "tag"])
    }

    #[test]
    fn duplicate_names_keep_all_positions() {
        let index = ColumnIndex::new(&dup_header());
        assert_eq!(index.positions("tag").unwrap(), &[1, 2]);
        assert_eq!(index.positions("missing").unwrap_err().code(), "COLUMN_NOT_FOUND");
    }

    #[test]
    fn deleted_columns_do_not_resolve() {
        let header = dup_header().remove("id", None).unwrap();
        let index = ColumnIndex::new(&header);
        assert!(index.positions("id").is_err());
    }

    #[test]
    fn bound_column_reads_active_occurrence() {
        let index = ColumnIndex::new(&dup_header());
        let row = row![1, "a", "b"];
        let state = RowState::new(&index, &row, 4).with_column("tag", 1);
        assert_eq!(state.current().unwrap(), &Value::from("b"));
        assert_eq!(state.value("tag").unwrap(), &Value::from("b"));
        assert_eq!(state.value("id").unwrap(), &Value::Int(1));
        assert_eq!(state.values("tag").unwrap().len(), 2);
        assert_eq!(state.row_number(), 4);
        assert_eq!(state.column_name(), Some("tag"));
        assert_eq!(state.occurrence(), 1);
    }

    #[test]
    fn unbound_state_has_no_current() {
        let index = ColumnIndex::new(&dup_header());
        let row = row![1, "a", "b"];
        let state = RowState::new(&index, &row, 1);
        assert!(state.current().is_err());
        assert_eq!(state.value("tag").unwrap(), &Value::from("a"));
    }

    #[test]
    fn short_rows_read_null() {
        let index = ColumnIndex::new(&dup_header());
        let row = row![1];
        let state = RowState::new(&index, &row, 1);
        assert!(state.value("tag").unwrap().is_null());
    }

    #[test]
    fn closures_compile_and_evaluate() {
        let compiler = |src: &str| -> Result<Arc<dyn Expression>, PipelineError> {
            let column = src.to_string();
            Ok(Arc::new(move |state: &RowState<'_>| {
                state.value(&column).cloned()
            }))
        };
        let expr = compiler.compile("id").unwrap();
        let index = ColumnIndex::new(&dup_header());
        let row = row![7, "a", "b"];
        assert_eq!(
            expr.evaluate(&RowState::new(&index, &row, 1)).unwrap(),
            Value::Int(7)
        );
    }
}
