//! Excel-style cell addressing.
//!
//! Column letters run `A..ZZZ` (bijective base-26, at most three letters),
//! addresses look like `C4`, ranges like `A1:C3`, and relative offsets like
//! `R[-1]C[2]`. Internally every index is 0-based.

use std::fmt;

use crate::error::PipelineError;

/// Highest column count addressable with three letters (`ZZZ`).
pub const MAX_COLUMN_LETTERS_INDEX: usize = 26 + 26 * 26 + 26 * 26 * 26 - 1;

/// Convert a 0-based column index to letters (`0 -> A`, `26 -> AA`).
///
/// # Errors
///
/// Returns a `Config` error past `ZZZ`.
pub fn column_letters(index: usize) -> Result<String, PipelineError> {
    if index > MAX_COLUMN_LETTERS_INDEX {
        return Err(PipelineError::config(
            "COLUMN_OUT_OF_RANGE",
            format!("column index {index} is beyond ZZZ"),
        ));
    }
    let mut n = index + 1;
    let mut letters = Vec::with_capacity(3);
    while n > 0 {
        let rem = (n - 1) % 26;
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    Ok(letters.into_iter().rev().collect())
}

/// Convert column letters to a 0-based index (`A -> 0`). Case-insensitive.
///
/// # Errors
///
/// Returns a `Config` error for empty input, non-letters, or more than three letters.
pub fn column_index(letters: &str) -> Result<usize, PipelineError> {
    if letters.is_empty() || letters.len() > 3 {
        return Err(PipelineError::config(
            "INVALID_COLUMN",
            format!("invalid column letters '{letters}'"),
        ));
    }
    let mut n = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(PipelineError::config(
                "INVALID_COLUMN",
                format!("invalid column letters '{letters}'"),
            ));
        }
        n = n * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Ok(n - 1)
}

/// A single cell, e.g. `C4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    /// 0-based row.
    pub row: usize,
    /// 0-based column.
    pub column: usize,
}

impl CellAddress {
    #[must_use]
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Parse `<letters><digits>`; the row number is 1-based in the syntax.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for malformed addresses.
    pub fn parse(input: &str) -> Result<Self, PipelineError> {
        let input = input.trim();
        let split = input
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| invalid_address(input))?;
        let (letters, digits) = input.split_at(split);
        let column = column_index(letters).map_err(|_| invalid_address(input))?;
        let row: usize = digits.parse().map_err(|_| invalid_address(input))?;
        if row == 0 {
            return Err(invalid_address(input));
        }
        Ok(Self {
            row: row - 1,
            column,
        })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = column_letters(self.column).map_err(|_| fmt::Error)?;
        write!(f, "{letters}{}", self.row + 1)
    }
}

fn invalid_address(input: &str) -> PipelineError {
    PipelineError::config("INVALID_ADDRESS", format!("invalid cell address '{input}'"))
}

/// Inclusive rectangular range, e.g. `A1:C3`. A single address is a 1x1 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    /// Parse `<address>[:<address>]`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for malformed or inverted ranges.
    pub fn parse(input: &str) -> Result<Self, PipelineError> {
        let (start, end) = match input.split_once(':') {
            Some((a, b)) => (CellAddress::parse(a)?, CellAddress::parse(b)?),
            None => {
                let a = CellAddress::parse(input)?;
                (a, a)
            }
        };
        if end.row < start.row || end.column < start.column {
            return Err(PipelineError::config(
                "INVERTED_RANGE",
                format!("range '{input}' ends before it starts"),
            ));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn contains(&self, addr: CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.column..=self.end.column).contains(&addr.column)
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.column..=self.end.column).map(move |column| CellAddress { row, column })
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Relative offset `R[<+-int>]C[<+-int>]`; either component may be omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelativeOffset {
    pub rows: i64,
    pub columns: i64,
}

impl RelativeOffset {
    /// # Errors
    ///
    /// Returns a `Config` error for malformed offsets.
    pub fn parse(input: &str) -> Result<Self, PipelineError> {
        let invalid = || {
            PipelineError::config(
                "INVALID_OFFSET",
                format!("invalid relative offset '{input}'"),
            )
        };
        let mut rest = input.trim();
        if rest.is_empty() {
            return Err(invalid());
        }
        let mut offset = Self::default();
        if let Some(after) = rest.strip_prefix(['R', 'r']) {
            let (value, remaining) = bracketed(after).ok_or_else(invalid)?;
            offset.rows = value;
            rest = remaining;
        }
        if let Some(after) = rest.strip_prefix(['C', 'c']) {
            let (value, remaining) = bracketed(after).ok_or_else(invalid)?;
            offset.columns = value;
            rest = remaining;
        }
        if rest.is_empty() {
            Ok(offset)
        } else {
            Err(invalid())
        }
    }

    /// Shift `addr`; `None` if the result falls before row 1 or column A.
    #[must_use]
    pub fn apply(&self, addr: CellAddress) -> Option<CellAddress> {
        let row = i64::try_from(addr.row).ok()?.checked_add(self.rows)?;
        let column = i64::try_from(addr.column).ok()?.checked_add(self.columns)?;
        Some(CellAddress {
            row: usize::try_from(row).ok()?,
            column: usize::try_from(column).ok()?,
        })
    }
}

/// Parse an optional `[<+-int>]` prefix; absent means 0.
fn bracketed(input: &str) -> Option<(i64, &str)> {
    match input.strip_prefix('[') {
        None => Some((0, input)),
        Some(body) => {
            let close = body.find(']')?;
            let value = body[..close].trim().parse::<i64>().ok()?;
            Some((value, &body[close + 1..]))
        }
    }
}
