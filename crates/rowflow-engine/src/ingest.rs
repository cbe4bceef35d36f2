//! Ingestion of raw external row batches into a [`Source`].
//!
//! The first non-empty batch is peeked to fix the header before any
//! downstream stage is composed. Every row is then padded with nulls or
//! truncated to the header width.

use futures_util::stream::{self, Stream, StreamExt};
use rowflow_types::{address, header::fit_row, PipelineError, Row, RowBatch, TableHeader};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::source::Source;

/// Maximum number of synthesized Excel-style column names.
pub const MAX_EXCEL_COLUMNS: usize = 1000;

/// How the header of an ingested stream is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputHeaderMode {
    /// The first row holds the column names, optionally trimmed.
    FirstRow {
        #[serde(default)]
        trim: bool,
    },
    /// Synthetic `Col1..ColN`.
    ColumnNum,
    /// Synthetic `A..ZZZ`.
    ExcelStyle,
}

impl Default for InputHeaderMode {
    fn default() -> Self {
        Self::FirstRow { trim: false }
    }
}

/// Ingestion parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub header: InputHeaderMode,
    /// Pad or truncate the physical column count to exactly this width.
    #[serde(default)]
    pub force_columns_count: Option<usize>,
}

/// Names `Col1..ColN`.
#[must_use]
pub fn column_num_names(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("Col{i}")).collect()
}

/// Names `A..` for `width` columns.
///
/// # Errors
///
/// Returns a `Config` error above [`MAX_EXCEL_COLUMNS`].
pub fn excel_names(width: usize) -> Result<Vec<String>, PipelineError> {
    if width > MAX_EXCEL_COLUMNS {
        return Err(PipelineError::config(
            "TOO_MANY_COLUMNS",
            format!("excel-style headers support at most {MAX_EXCEL_COLUMNS} columns, got {width}"),
        ));
    }
    (0..width).map(address::column_letters).collect()
}

/// Derive the header from the first raw row. Consumes that row when the
/// mode reads names from it.
fn derive_header(
    options: &IngestOptions,
    first: Option<&mut Vec<Row>>,
) -> Result<TableHeader, PipelineError> {
    let first_len = first
        .as_ref()
        .and_then(|rows| rows.first())
        .map_or(0, Vec::len);
    let width = options.force_columns_count.unwrap_or(first_len);

    let names = match options.header {
        InputHeaderMode::FirstRow { trim } => {
            let Some(rows) = first else {
                return Ok(TableHeader::default());
            };
            let header_row = if rows.is_empty() {
                Vec::new()
            } else {
                rows.remove(0)
            };
            let mut names: Vec<String> = header_row
                .iter()
                .map(|cell| {
                    let name = if cell.is_null() {
                        String::new()
                    } else {
                        cell.to_string()
                    };
                    if trim {
                        name.trim().to_string()
                    } else {
                        name
                    }
                })
                .collect();
            names.truncate(width);
            let present = names.len();
            names.extend(column_num_names(width).into_iter().skip(present));
            names
        }
        InputHeaderMode::ColumnNum => column_num_names(width),
        InputHeaderMode::ExcelStyle => excel_names(width)?,
    };
    Ok(TableHeader::from_names(&names))
}

/// Build a source from a stream of raw batches.
///
/// # Errors
///
/// Returns a `Config` error if the header cannot be derived, or the first
/// upstream error hit while peeking.
pub async fn ingest<S>(raw: S, options: &IngestOptions, context: Context) -> Result<Source, PipelineError>
where
    S: Stream<Item = Result<RowBatch, PipelineError>> + Send + 'static,
{
    let mut raw = raw.boxed();
    let mut first = None;
    while let Some(batch) = raw.next().await {
        let batch = batch?;
        if !batch.is_empty() {
            first = Some(batch.into_rows());
            break;
        }
    }

    let header = derive_header(options, first.as_mut())?;
    let width = header.physical_width();
    tracing::debug!(
        columns = width,
        mode = ?options.header,
        context = %context.path(),
        "Ingestion header derived"
    );

    let head = stream::iter(first.map(|rows| Ok(RowBatch::new(rows))));
    let batches = head
        .chain(raw)
        .map(move |batch| {
            batch.map(|batch| {
                let mut rows = batch.into_rows();
                for row in &mut rows {
                    fit_row(row, width);
                }
                RowBatch::new(rows)
            })
        })
        .filter(|batch| std::future::ready(!matches!(batch, Ok(b) if b.is_empty())))
        .boxed();

    Ok(Source::new(header, context, batches))
}

/// Build a source from in-memory raw batches.
///
/// # Errors
///
/// See [`ingest`].
pub async fn ingest_batches(
    raw: Vec<RowBatch>,
    options: &IngestOptions,
    context: Context,
) -> Result<Source, PipelineError> {
    ingest(stream::iter(raw.into_iter().map(Ok)), options, context).await
}
