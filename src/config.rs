use crate::grid::Grid;
use crate::simulation::Rules;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs,
    ops::RangeBounds,
    path::{Path, PathBuf},
    time::Duration,
};

/// Tournament configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub board: BoardConfig,
    #[serde(default)]
    pub food: FoodMode,
    pub runs: RunsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    /// Number of rows.
    pub rows: u32,
    /// Number of columns.
    pub columns: u32,
    /// Whether both axes wrap around.
    #[serde(default = "default_true")]
    pub wraparound: bool,
    /// Half-width of the square window agents can see, unlimited if absent.
    #[serde(default)]
    pub vision_range: Option<u32>,
}

/// How food is kept on the board.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FoodMode {
    /// No food and no growth.
    #[default]
    Disabled,
    /// Keep a fixed number of food cells.
    Fixed { count: usize },
    /// Keep one food cell per active agent.
    Dynamic,
}

impl FoodMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, FoodMode::Disabled)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunsConfig {
    /// Number of runs per batch.
    pub runs: usize,
    /// Maximum number of ticks per run.
    pub turn_limit: u32,
    /// Seed of the board generator, OS entropy if absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Submission root, relative to the simulation directory.
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,
    /// Instances per discovered submission.
    #[serde(default = "default_one")]
    pub replicas: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            replicas: default_one(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Gather decisions on the rayon thread pool.
    #[serde(default = "default_true")]
    pub parallel_decisions: bool,
    /// Per-decision time budget in milliseconds.
    #[serde(default)]
    pub decision_budget_ms: Option<u64>,
    /// Number of renderer color slots.
    #[serde(default = "default_palette_size")]
    pub palette_size: usize,
    /// Write one frame per tick for each run.
    #[serde(default)]
    pub record: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_decisions: default_true(),
            decision_budget_ms: None,
            palette_size: default_palette_size(),
            record: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_prefix() -> PathBuf {
    PathBuf::from("submissions")
}

fn default_palette_size() -> usize {
    41
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.board.rows, 1..=10_000).context("invalid number of rows")?;
        check_num(self.board.columns, 1..=10_000).context("invalid number of columns")?;
        if let Some(range) = self.board.vision_range {
            check_num(range, 1..=10_000).context("invalid vision range")?;
        }

        let area = self.board.rows as usize * self.board.columns as usize;
        if let FoodMode::Fixed { count } = self.food {
            check_num(count, 1..area).context("invalid food count")?;
        }

        check_num(self.runs.runs, 1..=1_000_000).context("invalid number of runs")?;
        check_num(self.runs.turn_limit, 1..=10_000_000).context("invalid turn limit")?;

        check_num(self.registry.replicas, 1..=10_000).context("invalid number of replicas")?;

        if let Some(budget) = self.engine.decision_budget_ms {
            check_num(budget, 1..=60_000).context("invalid decision budget")?;
        }
        check_num(self.engine.palette_size, 1..=10_000).context("invalid palette size")?;

        Ok(())
    }

    /// Simulation rules derived from this configuration.
    pub fn rules(&self) -> Result<Rules> {
        let grid = Grid::new(self.board.rows, self.board.columns)?;
        Ok(Rules {
            wraparound: self.board.wraparound,
            vision_range: self.board.vision_range,
            food: self.food,
            decision_budget: self.engine.decision_budget_ms.map(Duration::from_millis),
            parallel_decisions: self.engine.parallel_decisions,
            palette_size: self.engine.palette_size,
            ..Rules::new(grid)
        })
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
