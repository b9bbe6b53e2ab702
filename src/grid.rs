//! Board geometry: grid dimensions and wrap-aware coordinates.

use crate::direction::Direction;
use anyhow::{Result, bail};
use serde::Serialize;
use std::fmt;

/// Dimensions of the board.
///
/// Passed by value wherever coordinates are built, so boards of different
/// sizes can coexist in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grid {
    rows: u32,
    columns: u32,
}

impl Grid {
    pub fn new(rows: u32, columns: u32) -> Result<Self> {
        if rows == 0 || columns == 0 {
            bail!("grid dimensions must be positive, but are {rows}x{columns}");
        }
        Ok(Self { rows, columns })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn area(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Build a coordinate, reducing it onto the board.
    pub fn coordinate(self, row: i64, column: i64) -> Coordinate {
        Coordinate::new(row, column, self)
    }

    /// Check whether raw (unreduced) indices lie on the board.
    pub fn contains(&self, row: i64, column: i64) -> bool {
        (0..self.rows as i64).contains(&row) && (0..self.columns as i64).contains(&column)
    }

    /// Neighbor on a bounded board, `None` if the step leaves it.
    pub fn checked_neighbor(&self, cell: Coordinate, direction: Direction) -> Option<Coordinate> {
        let (d_row, d_column) = direction.offset();
        let (row, column) = (cell.row + d_row, cell.column + d_column);
        self.contains(row, column)
            .then(|| Coordinate::new(row, column, *self))
    }

    /// Cell at `index` in row-major order, reduced onto the board.
    pub fn cell_at(self, index: usize) -> Coordinate {
        let columns = self.columns as usize;
        Coordinate::new((index / columns) as i64, (index % columns) as i64, self)
    }

    /// All cells in row-major order.
    pub fn cells(self) -> impl Iterator<Item = Coordinate> {
        (0..self.rows as i64)
            .flat_map(move |row| (0..self.columns as i64).map(move |column| (row, column)))
            .map(move |(row, column)| Coordinate::new(row, column, self))
    }
}

/// Position on a toroidal board.
///
/// Fields are stored already reduced with floored modulus, so derived
/// equality, ordering and hashing all act on the canonical form:
/// `(-1, 0)` and `(rows - 1, 0)` are the same coordinate.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Coordinate {
    row: i64,
    column: i64,
    #[serde(skip)]
    grid: Grid,
}

impl Coordinate {
    pub fn new(row: i64, column: i64, grid: Grid) -> Self {
        Self {
            row: row.rem_euclid(grid.rows as i64),
            column: column.rem_euclid(grid.columns as i64),
            grid,
        }
    }

    pub fn row(&self) -> i64 {
        self.row
    }

    pub fn column(&self) -> i64 {
        self.column
    }

    pub fn neighbor(&self, direction: Direction) -> Self {
        let (d_row, d_column) = direction.offset();
        Self::new(self.row + d_row, self.column + d_column, self.grid)
    }

    /// Shortest per-axis separation `(rows, columns)` going around the torus.
    pub fn wrapped_delta(&self, other: &Self) -> (u32, u32) {
        (
            wrapped(self.row, other.row, self.grid.rows),
            wrapped(self.column, other.column, self.grid.columns),
        )
    }

    /// Euclidean length of the shortest path on the torus.
    pub fn distance(&self, other: &Self) -> f64 {
        let (d_row, d_column) = self.wrapped_delta(other);
        f64::from(d_row).hypot(f64::from(d_column))
    }
}

fn wrapped(a: i64, b: i64, size: u32) -> u32 {
    let delta = (a - b).unsigned_abs() as u32;
    delta.min(size - delta)
}

impl fmt::Debug for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coordinate({}, {})", self.row, self.column)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}
