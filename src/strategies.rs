//! Built-in strategies selectable from a submission manifest.

use crate::direction::Direction;
use crate::strategy::{Strategy, View};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::cmp::Reverse;

fn parse_params<T: DeserializeOwned>(params: &toml::Table) -> Result<T> {
    toml::Value::Table(params.clone())
        .try_into()
        .context("failed to deserialize strategy params")
}

fn no_params(params: &toml::Table) -> Result<()> {
    if let Some(key) = params.keys().next() {
        bail!("strategy takes no params, but got {key:?}");
    }
    Ok(())
}

/// Always heads the same way.
pub struct Straight {
    direction: Direction,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StraightParams {
    #[serde(default = "default_direction")]
    direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Up
}

impl Straight {
    pub fn build(params: &toml::Table) -> Result<Box<dyn Strategy>> {
        let params: StraightParams = parse_params(params)?;
        Ok(Box::new(Self {
            direction: params.direction,
        }))
    }
}

impl Strategy for Straight {
    fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
        Ok(self.direction)
    }
}

/// Chases the closest food, ignoring obstacles. With no food in sight it
/// backs away from the nearest foreign body cell.
pub struct FoodSeeker;

impl FoodSeeker {
    pub fn build(params: &toml::Table) -> Result<Box<dyn Strategy>> {
        no_params(params)?;
        Ok(Box::new(Self))
    }
}

impl Strategy for FoodSeeker {
    fn decide(&mut self, view: &View<'_>) -> Result<Direction> {
        if let Some(food) = view.closest_food() {
            return Ok(view.direction_toward(&food));
        }

        let head = view.head();
        let threat = view
            .occupied()
            .filter(|cell| !view.body().contains(cell))
            .min_by(|a, b| {
                view.distance(a, &head)
                    .total_cmp(&view.distance(b, &head))
                    .then(a.cmp(b))
            });
        let Some(threat) = threat else {
            return Ok(Direction::Up);
        };

        let dir = Direction::ALL
            .into_iter()
            .filter_map(|dir| view.step(dir).map(|next| (dir, view.distance(&next, threat))))
            .fold(None, |best: Option<(Direction, f64)>, (dir, dist)| match best {
                Some((_, best_dist)) if best_dist >= dist => best,
                _ => Some((dir, dist)),
            })
            .map_or(Direction::Up, |(dir, _)| dir);
        Ok(dir)
    }
}

/// Chases food while the step is free, otherwise takes the most open lane.
pub struct Cautious;

impl Cautious {
    pub fn build(params: &toml::Table) -> Result<Box<dyn Strategy>> {
        no_params(params)?;
        Ok(Box::new(Self))
    }
}

impl Strategy for Cautious {
    fn decide(&mut self, view: &View<'_>) -> Result<Direction> {
        if let Some(food) = view.closest_food() {
            let dir = view.direction_toward(&food);
            if view.step(dir).is_some_and(|next| !view.is_occupied(&next)) {
                return Ok(dir);
            }
        }
        let dir = Direction::ALL
            .into_iter()
            .min_by_key(|&dir| Reverse(view.look(dir)))
            .unwrap_or(Direction::Up);
        Ok(dir)
    }
}

/// Random walk over free neighbors, reproducible from its seed.
pub struct Wanderer {
    rng: ChaCha12Rng,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WandererParams {
    #[serde(default)]
    seed: u64,
}

impl Wanderer {
    pub fn build(params: &toml::Table) -> Result<Box<dyn Strategy>> {
        let params: WandererParams = parse_params(params)?;
        Ok(Box::new(Self {
            rng: ChaCha12Rng::seed_from_u64(params.seed),
        }))
    }
}

impl Strategy for Wanderer {
    fn decide(&mut self, view: &View<'_>) -> Result<Direction> {
        let free: Vec<_> = Direction::ALL
            .into_iter()
            .filter(|&dir| view.step(dir).is_some_and(|next| !view.is_occupied(&next)))
            .collect();
        Ok(free.choose(&mut self.rng).copied().unwrap_or(Direction::Up))
    }
}
