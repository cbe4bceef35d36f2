//! Column header model with soft deletion.
//!
//! A [`TableHeader`] is an ordered sequence of [`ColumnHeader`]s. Each entry
//! points at a physical slot in every row. Removing a column only flips its
//! `deleted` flag, so surviving columns keep their positions and no row is
//! rewritten. [`TableHeader::normalize`] is the only operation that compacts
//! the header and touches row contents.
//!
//! Every operation returns a new header; a header handed to sibling branches
//! is never mutated in place.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::value::{Row, RowBatch, Value};

/// One column: public name, physical row position, soft-delete flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnHeader {
    pub name: String,
    pub position: usize,
    #[serde(default)]
    pub deleted: bool,
}

impl ColumnHeader {
    #[must_use]
    pub fn new(name: impl Into<String>, position: usize) -> Self {
        Self {
            name: name.into(),
            position,
            deleted: false,
        }
    }
}

/// Result of [`TableHeader::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub header: TableHeader,
    /// Physical positions synthesized for requested names that were missing.
    /// Rows must be extended with nulls at these positions.
    pub added_positions: Vec<usize>,
}

/// Ordered sequence of column headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableHeader {
    columns: Vec<ColumnHeader>,
}

impl TableHeader {
    /// Build a compact header from names: position `i` for the `i`-th name.
    #[must_use]
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            columns: names
                .iter()
                .enumerate()
                .map(|(i, name)| ColumnHeader::new(name.as_ref(), i))
                .collect(),
        }
    }

    /// Build a header from raw entries.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if two live entries share a position.
    pub fn from_columns(columns: Vec<ColumnHeader>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for col in columns.iter().filter(|c| !c.deleted) {
            if !seen.insert(col.position) {
                return Err(PipelineError::config(
                    "DUPLICATE_POSITION",
                    format!(
                        "column '{}' reuses live position {}",
                        col.name, col.position
                    ),
                ));
            }
        }
        Ok(Self { columns })
    }

    /// All entries, deleted ones included.
    #[must_use]
    pub fn columns(&self) -> &[ColumnHeader] {
        &self.columns
    }

    /// Live entries in public column order.
    pub fn live(&self) -> impl Iterator<Item = &ColumnHeader> + '_ {
        self.columns.iter().filter(|c| !c.deleted)
    }

    /// Number of live columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    /// Live column names in public order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.live().map(|c| c.name.clone()).collect()
    }

    /// Physical positions of live columns in public order.
    #[must_use]
    pub fn positions(&self) -> Vec<usize> {
        self.live().map(|c| c.position).collect()
    }

    /// First live column with the given name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ColumnHeader> {
        self.live().find(|c| c.name == name)
    }

    /// Physical position of the first live column with the given name.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error when no live column matches.
    pub fn position_of(&self, name: &str) -> Result<usize, PipelineError> {
        self.find(name)
            .map(|c| c.position)
            .ok_or_else(|| self.not_found(&[name]))
    }

    /// Number of physical slots rows must provide: one past the highest
    /// position referenced by any entry, deleted or not.
    #[must_use]
    pub fn physical_width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0)
    }

    /// No deleted entries and every position equals its index.
    #[must_use]
    pub fn is_normalized(&self) -> bool {
        self.columns
            .iter()
            .enumerate()
            .all(|(i, c)| !c.deleted && c.position == i)
    }

    /// Append a column, recycling the slot of a deleted column if one exists.
    ///
    /// Returns the new header and the physical position assigned. A recycled
    /// slot still holds the deleted column's stale cells; the caller must
    /// overwrite them.
    #[must_use]
    pub fn add(&self, name: &str) -> (Self, usize) {
        let mut columns = self.columns.clone();
        let live: HashSet<usize> = self.live().map(|c| c.position).collect();
        let position = match columns
            .iter()
            .position(|c| c.deleted && !live.contains(&c.position))
        {
            // The deleted entry is dropped so its slot is reused at most once.
            Some(idx) => columns.remove(idx).position,
            None => self.physical_width(),
        };
        columns.push(ColumnHeader::new(name, position));
        (Self { columns }, position)
    }

    /// Soft-delete live columns named `name`.
    ///
    /// With `occurrence = Some(n)` only the `n`-th (0-based) live match is
    /// removed; otherwise all live matches are.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error if no live entry matches.
    pub fn remove(&self, name: &str, occurrence: Option<usize>) -> Result<Self, PipelineError> {
        let mut columns = self.columns.clone();
        let mut matched = false;
        for (n, col) in columns
            .iter_mut()
            .filter(|c| !c.deleted && c.name == name)
            .enumerate()
        {
            if occurrence.map_or(true, |wanted| wanted == n) {
                col.deleted = true;
                matched = true;
            }
        }
        if matched {
            Ok(Self { columns })
        } else {
            Err(self.not_found(&[name]))
        }
    }

    /// Rename live columns named `from` to `to`, optionally only the `n`-th match.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error if no live entry matches.
    pub fn rename(
        &self,
        from: &str,
        to: &str,
        occurrence: Option<usize>,
    ) -> Result<Self, PipelineError> {
        let mut columns = self.columns.clone();
        let mut matched = false;
        for (n, col) in columns
            .iter_mut()
            .filter(|c| !c.deleted && c.name == from)
            .enumerate()
        {
            if occurrence.map_or(true, |wanted| wanted == n) {
                col.name = to.to_string();
                matched = true;
            }
        }
        if matched {
            Ok(Self { columns })
        } else {
            Err(self.not_found(&[from]))
        }
    }

    /// Project the header onto `names`.
    ///
    /// Each requested name takes the next unused live occurrence of that name,
    /// so duplicated names can be selected repeatedly. Columns not requested
    /// are soft-deleted. With `reorder` the live columns follow the requested
    /// order; otherwise they keep their current relative order. Positions are
    /// never changed.
    ///
    /// Requested names with no live match are synthesized at fresh positions
    /// past the physical width when `allow_missing` is set.
    ///
    /// # Errors
    ///
    /// Returns a `Header` error listing the missing names otherwise.
    pub fn select<S: AsRef<str>>(
        &self,
        names: &[S],
        reorder: bool,
        allow_missing: bool,
    ) -> Result<Selection, PipelineError> {
        let mut taken = vec![false; self.columns.len()];
        // (requested index, header index or synthesized position)
        let mut picked: Vec<(usize, Result<usize, usize>)> = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        let mut next_free = self.physical_width();

        for (req, name) in names.iter().enumerate() {
            let name = name.as_ref();
            let found = self
                .columns
                .iter()
                .enumerate()
                .find(|(i, c)| !taken[*i] && !c.deleted && c.name == name)
                .map(|(i, _)| i);
            match found {
                Some(i) => {
                    taken[i] = true;
                    picked.push((req, Ok(i)));
                }
                None => {
                    missing.push(name.to_string());
                    picked.push((req, Err(next_free)));
                    next_free += 1;
                }
            }
        }

        if !missing.is_empty() && !allow_missing {
            let refs: Vec<&str> = missing.iter().map(String::as_str).collect();
            return Err(PipelineError::header(
                "COLUMNS_NOT_FOUND",
                format!("columns not found: {}", refs.join(", ")),
                &self.columns,
            ));
        }

        if !reorder {
            // Existing columns keep header order; synthesized ones go last.
            picked.sort_by_key(|(req, slot)| match slot {
                Ok(i) => (0, *i),
                Err(_) => (1, *req),
            });
        }

        let mut columns = Vec::with_capacity(self.columns.len() + missing.len());
        let mut added_positions = Vec::new();
        for (req, slot) in &picked {
            match slot {
                Ok(i) => columns.push(self.columns[*i].clone()),
                Err(position) => {
                    columns.push(ColumnHeader::new(names[*req].as_ref(), *position));
                    added_positions.push(*position);
                }
            }
        }
        for (i, col) in self.columns.iter().enumerate() {
            if !taken[i] {
                let mut dropped = col.clone();
                dropped.deleted = true;
                columns.push(dropped);
            }
        }

        Ok(Selection {
            header: Self { columns },
            added_positions,
        })
    }

    /// Compacted header: deleted entries dropped, positions renumbered.
    #[must_use]
    pub fn normalize(&self) -> Self {
        Self {
            columns: self
                .live()
                .enumerate()
                .map(|(i, c)| ColumnHeader::new(c.name.clone(), i))
                .collect(),
        }
    }

    /// Rewrite one row into normalized layout by gathering live positions.
    /// Slots past the end of a short row read as null.
    #[must_use]
    pub fn normalize_row(&self, row: &Row) -> Row {
        self.live()
            .map(|c| row.get(c.position).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Rewrite a batch into normalized layout. Identity when already normalized.
    #[must_use]
    pub fn normalize_batch(&self, batch: RowBatch) -> RowBatch {
        if self.is_normalized() {
            return batch;
        }
        let positions = self.positions();
        RowBatch::new(
            batch
                .into_iter()
                .map(|row| {
                    positions
                        .iter()
                        .map(|&p| row.get(p).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect(),
        )
    }

    fn not_found(&self, names: &[&str]) -> PipelineError {
        PipelineError::header(
            "COLUMN_NOT_FOUND",
            format!("column not found: {}", names.join(", ")),
            &self.columns,
        )
    }
}

/// Compact `header` and rewrite `rows` to match.
#[must_use]
pub fn normalize(header: &TableHeader, rows: Vec<Row>) -> (TableHeader, Vec<Row>) {
    let normalized = header.normalize();
    let rows = header.normalize_batch(RowBatch::new(rows)).into_rows();
    (normalized, rows)
}

/// Pad with nulls or truncate `row` to exactly `width` cells.
pub fn fit_row(row: &mut Row, width: usize) {
    row.resize(width, Value::Null);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn abc() -> TableHeader {
        TableHeader::from_names(&["A", "B", "C"])
    }

    #[test]
    fn remove_is_soft_and_keeps_positions() {
        let h = abc().remove("B", None).unwrap();
        assert_eq!(h.names(), vec!["A", "C"]);
        assert_eq!(h.positions(), vec![0, 2]);
        assert_eq!(h.physical_width(), 3);
        assert!(!h.is_normalized());
    }

    #[test]
    fn remove_unknown_column_fails() {
        let err = abc().remove("Z", None).unwrap_err();
        assert_eq!(err.code(), "COLUMN_NOT_FOUND");
    }

    #[test]
    fn remove_single_occurrence_of_duplicate() {
        let h = TableHeader::from_names(&["x", "y", "x"]);
        let h = h.remove("x", Some(1)).unwrap();
        assert_eq!(h.names(), vec!["x", "y"]);
        assert_eq!(h.positions(), vec![0, 1]);
        assert!(h.remove("x", Some(1)).is_err());
    }

    #[test]
    fn add_appends_then_recycles_deleted_slot() {
        let (h, pos) = abc().add("D");
        assert_eq!(pos, 3);
        assert_eq!(h.names(), vec!["A", "B", "C", "D"]);

        let h = h.remove("A", None).unwrap();
        let (h, pos) = h.add("E");
        assert_eq!(pos, 0);
        assert_eq!(h.names(), vec!["B", "C", "D", "E"]);
        // The recycled slot is consumed; the next add appends.
        let (_, pos) = h.add("F");
        assert_eq!(pos, 4);
    }

    #[test]
    fn rename_changes_only_name() {
        let h = abc().rename("B", "bee", None).unwrap();
        assert_eq!(h.names(), vec!["A", "bee", "C"]);
        assert_eq!(h.positions(), vec![0, 1, 2]);
        assert!(abc().rename("nope", "x", None).is_err());
    }

    #[test]
    fn select_reorders_and_preserves_positions() {
        let sel = abc().select(&["C", "A"], true, false).unwrap();
        assert_eq!(sel.header.names(), vec!["C", "A"]);
        assert_eq!(sel.header.positions(), vec![2, 0]);
        assert!(sel.added_positions.is_empty());
    }

    #[test]
    fn select_without_reorder_keeps_header_order() {
        let sel = abc().select(&["C", "A"], false, false).unwrap();
        assert_eq!(sel.header.names(), vec!["A", "C"]);
    }

    #[test]
    fn select_missing_fails_unless_allowed() {
        let err = abc().select(&["A", "Q"], true, false).unwrap_err();
        assert_eq!(err.code(), "COLUMNS_NOT_FOUND");

        let sel = abc().select(&["A", "Q"], true, true).unwrap();
        assert_eq!(sel.header.names(), vec!["A", "Q"]);
        assert_eq!(sel.added_positions, vec![3]);
        assert_eq!(sel.header.physical_width(), 4);
    }

    #[test]
    fn normalize_gathers_rows() {
        let h = abc().remove("A", None).unwrap();
        let (h2, rows) = normalize(&h, vec![row![1, 2, 3], row![4, 5]]);
        assert!(h2.is_normalized());
        assert_eq!(h2.names(), vec!["B", "C"]);
        assert_eq!(rows, vec![row![2, 3], row![5, Value::Null]]);
    }

    #[test]
    fn normalize_fast_path_is_identity() {
        let h = abc();
        let batch = RowBatch::new(vec![row![1, 2, 3]]);
        assert_eq!(h.normalize_batch(batch.clone()), batch);
    }

    #[test]
    fn from_columns_rejects_shared_live_positions() {
        let cols = vec![ColumnHeader::new("a", 0), ColumnHeader::new("b", 0)];
        assert!(TableHeader::from_columns(cols).is_err());
        let mut dead = ColumnHeader::new("a", 0);
        dead.deleted = true;
        assert!(TableHeader::from_columns(vec![dead, ColumnHeader::new("b", 0)]).is_ok());
    }

    #[test]
    fn fit_row_pads_and_truncates() {
        let mut r = row![1];
        fit_row(&mut r, 3);
        assert_eq!(r, row![1, Value::Null, Value::Null]);
        fit_row(&mut r, 2);
        assert_eq!(r.len(), 2);
    }
}
