//! Transformers driven by expressions compiled through the context's
//! [`ExpressionCompiler`](crate::expression::ExpressionCompiler).

use std::sync::Arc;

use rowflow_types::{PipelineError, RowError};

use super::{ensure_width, row_failure};
use crate::context::Context;
use crate::expression::{ColumnIndex, Expression, RowState};
use crate::source::{Source, Transformer};

fn compile(context: &Context, source: &str) -> Result<Arc<dyn Expression>, PipelineError> {
    let compiler = context.compiler().ok_or_else(|| {
        PipelineError::config(
            "NO_EXPRESSION_COMPILER",
            "no expression compiler registered on the pipeline context",
        )
    })?;
    compiler.compile(source)
}

/// Set every occurrence of `column` from an expression, adding the column
/// when the upstream header lacks it.
#[derive(Debug, Clone)]
pub struct ComputeColumn {
    column: String,
    expression: String,
}

impl ComputeColumn {
    #[must_use]
    pub fn new(column: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            expression: expression.into(),
        }
    }
}

impl Transformer for ComputeColumn {
    fn name(&self) -> &str {
        "compute"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let expr = compile(source.context(), &self.expression)?;
        let header = if source.header().find(&self.column).is_some() {
            source.header().clone()
        } else {
            source.header().add(&self.column).0
        };
        let index = ColumnIndex::new(&header);
        let positions = index.positions(&self.column)?.to_vec();
        let width = header.physical_width();
        let column = self.column.clone();
        let mut row_number = 0u64;

        Ok(source.map_batches(header, move |mut batch| {
            for i in 0..batch.len() {
                row_number += 1;
                ensure_width(&mut batch.rows_mut()[i], width);
                for (occurrence, &position) in positions.iter().enumerate() {
                    let state = RowState::new(&index, &batch.rows()[i], row_number)
                        .with_column(&column, occurrence);
                    match expr.evaluate(&state) {
                        Ok(value) => batch.rows_mut()[i][position] = value,
                        Err(err) => {
                            return Err(row_failure(err, batch, i, Some(position), row_number))
                        }
                    }
                }
            }
            Ok(batch)
        }))
    }
}

/// Fail the stream on the first row for which the expression is falsy.
#[derive(Debug, Clone)]
pub struct AssertRows {
    expression: String,
    column: Option<String>,
    message: Option<String>,
}

impl AssertRows {
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            column: None,
            message: None,
        }
    }

    /// Bind the expression to the first occurrence of `column`.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Transformer for AssertRows {
    fn name(&self) -> &str {
        "assert"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let expr = compile(source.context(), &self.expression)?;
        let index = ColumnIndex::new(source.header());
        let bound = match &self.column {
            Some(name) => Some((name.clone(), index.positions(name)?[0])),
            None => None,
        };
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("assertion failed: {}", self.expression));
        let header = source.shared_header();
        let mut row_number = 0u64;

        Ok(source.map_batches(header, move |batch| {
            for (i, row) in batch.rows().iter().enumerate() {
                row_number += 1;
                let mut state = RowState::new(&index, row, row_number);
                if let Some((name, _)) = &bound {
                    state = state.with_column(name, 0);
                }
                let column_index = bound.as_ref().map(|(_, position)| *position);
                let verdict = match expr.evaluate(&state) {
                    Ok(value) => value,
                    Err(err) => {
                        return Err(row_failure(err, batch.clone(), i, column_index, row_number))
                    }
                };
                if !verdict.is_truthy() {
                    return Err(RowError {
                        code: "ASSERTION_FAILED".to_string(),
                        message: message.clone(),
                        batch: batch.clone(),
                        row_index: i,
                        column_index,
                        row_number,
                    }
                    .into());
                }
            }
            Ok(batch)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::ExpressionCompiler;
    use rowflow_types::{row, RowBatch, TableHeader, Value};

    /// Test compiler: `col:<name>` reads a column, `gt0:<name>` checks an
    /// integer column is positive, `occurrence` returns the occurrence index.
    fn compiler() -> Arc<dyn ExpressionCompiler> {
        Arc::new(|src: &str| -> Result<Arc<dyn Expression>, PipelineError> {
            if let Some(name) = src.strip_prefix("col:") {
                let name = name.to_string();
                return Ok(Arc::new(move |s: &RowState<'_>| s.value(&name).cloned()));
            }
            if let Some(name) = src.strip_prefix("gt0:") {
                let name = name.to_string();
                return Ok(Arc::new(move |s: &RowState<'_>| -> Result<Value, PipelineError> {
                    Ok(Value::Bool(matches!(s.value(&name)?, Value::Int(n) if *n > 0)))
                }));
            }
            if src == "occurrence" {
                return Ok(Arc::new(|s: &RowState<'_>| -> Result<Value, PipelineError> {
                    Ok(Value::Int(i64::try_from(s.occurrence()).unwrap_or(-1)))
                }));
            }
            Err(PipelineError::config("PARSE", format!("cannot compile {src}")))
        })
    }

    fn source(rows: Vec<rowflow_types::Row>) -> Source {
        let context = Context::root();
        context.set_compiler(compiler());
        Source::from_batches(
            TableHeader::from_names(&["id", "amount", "tag", "tag"]),
            context,
            vec![RowBatch::new(rows)],
        )
    }

    #[tokio::test]
    async fn compute_adds_missing_column() {
        let out = ComputeColumn::new("copy", "col:id")
            .apply(source(vec![row![1, 5, "a", "b"]]))
            .unwrap();
        assert_eq!(out.header().names(), vec!["id", "amount", "tag", "tag", "copy"]);
        assert_eq!(out.collect_rows().await.unwrap(), vec![row![1, 5, "a", "b", 1]]);
    }

    #[tokio::test]
    async fn compute_sets_every_duplicate_occurrence() {
        let out = ComputeColumn::new("tag", "occurrence")
            .apply(source(vec![row![1, 5, "a", "b"]]))
            .unwrap();
        assert_eq!(out.collect_rows().await.unwrap(), vec![row![1, 5, 0, 1]]);
    }

    #[test]
    fn compute_without_compiler_is_config_error() {
        let plain = Source::empty(TableHeader::from_names(&["id"]), Context::root());
        let err = ComputeColumn::new("x", "col:id").apply(plain).unwrap_err();
        assert_eq!(err.code(), "NO_EXPRESSION_COMPILER");
        assert!(!err.is_reroutable());
    }

    #[tokio::test]
    async fn unknown_column_surfaces_as_header_error() {
        let out = ComputeColumn::new("x", "col:missing")
            .apply(source(vec![row![1, 5, "a", "b"]]))
            .unwrap();
        let err = out.collect_rows().await.unwrap_err();
        assert_eq!(err.code(), "COLUMN_NOT_FOUND");
    }

    #[tokio::test]
    async fn assert_reports_row_coordinates() {
        let out = AssertRows::new("gt0:amount")
            .column("amount")
            .apply(source(vec![row![1, 5, "a", "b"], row![2, -3, "c", "d"]]))
            .unwrap();
        let err = out.collect_rows().await.unwrap_err();
        let row_err = err.as_row_error().unwrap();
        assert_eq!(row_err.code, "ASSERTION_FAILED");
        assert_eq!(row_err.row_index, 1);
        assert_eq!(row_err.row_number, 2);
        assert_eq!(row_err.column_index, Some(1));
        assert_eq!(row_err.batch.len(), 2);
    }

    #[tokio::test]
    async fn assert_passes_truthy_rows() {
        let out = AssertRows::new("gt0:amount")
            .apply(source(vec![row![1, 5, "a", "b"]]))
            .unwrap();
        assert_eq!(out.collect_rows().await.unwrap().len(), 1);
    }
}
