//! Coarse spreadsheet-style grid placement of a bounding box and the boolean
//! flags derived from it.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::schema::BBox;

/// Central cells of the default 10×10 grid. A fixed list, not computed from
/// the grid size; other grid sizes should configure their own.
pub(crate) const DEFAULT_CENTER_CELLS: [&str; 4] = ["E5", "E6", "F5", "F6"];

pub(crate) const FLAG_CHILD_PRESENT: &str = "child_present";
pub(crate) const FLAG_MULTIPLE_CHILDREN: &str = "multiple_children";
pub(crate) const FLAG_CENTER_POSITION: &str = "center_position";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    pub center_cells: Vec<String>,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 10,
            cols: 10,
            center_cells: DEFAULT_CENTER_CELLS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GridCell {
    pub row: u32,
    pub col: u32,
    pub label: String,
}

/// Maps the center of `bbox` onto a `rows`×`cols` grid.
///
/// The center is clamped into the last row/column so that a box touching the
/// 1.0 edge stays on the grid. Panics if the grid has no rows or columns.
pub(crate) fn map_to_grid(bbox: &BBox, rows: u32, cols: u32) -> GridCell {
    assert!(rows > 0 && cols > 0, "grid must have at least one cell");

    let (cx, cy) = bbox.center();
    let col = ((cx * cols as f64).floor() as u32).min(cols - 1);
    let row = ((cy * rows as f64).floor() as u32).min(rows - 1);

    GridCell {
        row,
        col,
        label: cell_label(row, col),
    }
}

/// `(0, 0) → A1`, `(6, 5) → G6`.
pub(crate) fn cell_label(row: u32, col: u32) -> String {
    format!("{}{}", row_letters(row), col + 1)
}

/// `0 → A`, `25 → Z`, `26 → AA`.
pub(crate) fn row_letters(row: u32) -> String {
    let mut n = row + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

pub(crate) fn build_flags(
    has_child: bool,
    num_children: u32,
    grid_label: Option<&str>,
    center_cells: &[String],
) -> BTreeMap<String, bool> {
    let center = grid_label.is_some_and(|label| center_cells.iter().any(|c| c == label));
    BTreeMap::from([
        (FLAG_CHILD_PRESENT.to_owned(), has_child),
        (FLAG_MULTIPLE_CHILDREN.to_owned(), num_children >= 2),
        (FLAG_CENTER_POSITION.to_owned(), center),
    ])
}
