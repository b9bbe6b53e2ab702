//! Contract between the simulation and pluggable movement strategies.

use crate::direction::Direction;
use crate::grid::{Coordinate, Grid};
use anyhow::Result;
use std::collections::{HashSet, VecDeque};

/// Decision function of one agent.
///
/// Called once per tick with a view taken before any agent moves. Returning
/// an error (or panicking) eliminates the agent for the rest of the run.
pub trait Strategy: Send {
    fn decide(&mut self, view: &View<'_>) -> Result<Direction>;
}

/// What an agent is allowed to see when deciding its next move.
pub struct View<'a> {
    body: &'a VecDeque<Coordinate>,
    occupied: &'a HashSet<Coordinate>,
    food: &'a HashSet<Coordinate>,
    grid: Grid,
    vision_range: Option<u32>,
    wraparound: bool,
}

impl<'a> View<'a> {
    /// `body` must be non-empty and head-first.
    pub fn new(
        body: &'a VecDeque<Coordinate>,
        occupied: &'a HashSet<Coordinate>,
        food: &'a HashSet<Coordinate>,
        grid: Grid,
        vision_range: Option<u32>,
        wraparound: bool,
    ) -> Self {
        Self {
            body,
            occupied,
            food,
            grid,
            vision_range,
            wraparound,
        }
    }

    pub fn head(&self) -> Coordinate {
        self.body[0]
    }

    pub fn body(&self) -> &VecDeque<Coordinate> {
        self.body
    }

    /// Whether `cell` falls inside the vision window around the head.
    pub fn is_visible(&self, cell: &Coordinate) -> bool {
        let Some(range) = self.vision_range else {
            return true;
        };
        let head = self.head();
        let (d_row, d_column) = if self.wraparound {
            head.wrapped_delta(cell)
        } else {
            (
                (head.row() - cell.row()).unsigned_abs() as u32,
                (head.column() - cell.column()).unsigned_abs() as u32,
            )
        };
        d_row <= range && d_column <= range
    }

    /// Occupied by any agent body, own body included. Cells outside the
    /// vision window always read as free.
    pub fn is_occupied(&self, cell: &Coordinate) -> bool {
        self.is_visible(cell) && self.occupied.contains(cell)
    }

    pub fn occupied(&self) -> impl Iterator<Item = &Coordinate> + '_ {
        self.occupied.iter().filter(|cell| self.is_visible(cell))
    }

    pub fn food(&self) -> impl Iterator<Item = &Coordinate> + '_ {
        self.food.iter().filter(|cell| self.is_visible(cell))
    }

    /// Distance used by the helpers: around the torus when the board wraps,
    /// planar otherwise.
    pub fn distance(&self, a: &Coordinate, b: &Coordinate) -> f64 {
        if self.wraparound {
            a.distance(b)
        } else {
            ((a.row() - b.row()) as f64).hypot((a.column() - b.column()) as f64)
        }
    }

    /// Nearest visible food to the head; equal distances resolve to the
    /// lowest cell in row-major order.
    pub fn closest_food(&self) -> Option<Coordinate> {
        let head = self.head();
        self.food()
            .min_by(|a, b| {
                self.distance(a, &head)
                    .total_cmp(&self.distance(b, &head))
                    .then(a.cmp(b))
            })
            .copied()
    }

    /// The cell one step away from the head, `None` past a border.
    pub fn step(&self, direction: Direction) -> Option<Coordinate> {
        if self.wraparound {
            Some(self.head().neighbor(direction))
        } else {
            self.grid.checked_neighbor(self.head(), direction)
        }
    }

    /// Count free cells from the head in `direction` before hitting an
    /// occupied cell, the vision limit or the border.
    pub fn look(&self, direction: Direction) -> u32 {
        let axis = match direction {
            Direction::Up | Direction::Down => self.grid.rows(),
            Direction::Left | Direction::Right => self.grid.columns(),
        };
        let limit = match self.vision_range {
            Some(range) => range.min(axis - 1),
            None => axis - 1,
        };

        let mut current = self.head();
        let mut free = 0;
        while free < limit {
            let next = if self.wraparound {
                current.neighbor(direction)
            } else {
                match self.grid.checked_neighbor(current, direction) {
                    Some(next) => next,
                    None => break,
                }
            };
            if self.is_occupied(&next) {
                break;
            }
            free += 1;
            current = next;
        }
        free
    }

    /// Candidate whose next cell is nearest to `destination`. The first
    /// candidate wins ties; `None` only for an empty candidate list.
    pub fn direction_to(
        &self,
        destination: &Coordinate,
        candidates: &[Direction],
    ) -> Option<Direction> {
        let dist = |dir: &Direction| match self.step(*dir) {
            Some(next) => self.distance(&next, destination),
            None => f64::INFINITY,
        };
        candidates
            .iter()
            .copied()
            .min_by(|a, b| dist(a).total_cmp(&dist(b)))
    }

    /// [`View::direction_to`] over [`Direction::ALL`].
    pub fn direction_toward(&self, destination: &Coordinate) -> Direction {
        self.direction_to(destination, &Direction::ALL)
            .unwrap_or(Direction::Up)
    }
}
