use crate::config::Config;
use crate::grid::Grid;
use crate::registry::{Catalog, Registry};
use crate::score::{AggregateScore, NormalizedScore, aggregate};
use crate::simulation::{Fault, Simulation};
use anyhow::{Context, Result, bail};
use glob::{Pattern, glob};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::encode;
use serde::Serialize;
use std::{
    collections::{HashSet, VecDeque},
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

#[derive(Serialize)]
struct RankedScore<'a> {
    rank: usize,
    total: f64,
    #[serde(flatten)]
    score: &'a NormalizedScore,
}

#[derive(Serialize)]
struct RunRecord<'a> {
    run: usize,
    turns: u32,
    faults: &'a [Fault],
    scores: Vec<RankedScore<'a>>,
}

#[derive(Serialize)]
struct BatchResults<'a> {
    runs: usize,
    leaderboard: &'a [AggregateScore],
}

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Run the configured number of simulations and write per-run scores
    /// plus the aggregated leaderboard.
    pub fn run_batch(&self) -> Result<()> {
        let registry = self.registry()?;
        let mut sim = Simulation::new(self.cfg.rules()?, registry, self.rng()?);

        let n_runs = self.cfg.runs.runs;
        let mut reports = Vec::with_capacity(n_runs);
        for run_idx in 0..n_runs {
            let report = self
                .perform_run(&mut sim, run_idx)
                .with_context(|| format!("failed to perform run {run_idx}"))?;
            reports.push(report);

            let progress = 100.0 * (run_idx + 1) as f64 / n_runs as f64;
            log::info!("completed {progress:06.2}%");
        }

        let leaderboard = aggregate(&reports);
        for entry in &leaderboard {
            log::info!(
                "{:.4} age: {:.2}, overlap: {:.2}, name: {}",
                entry.total.mean,
                entry.age,
                entry.overlap,
                entry.name
            );
        }

        let results = BatchResults {
            runs: n_runs,
            leaderboard: &leaderboard,
        };
        write_json(self.results_file(), &results).context("failed to save results")?;

        Ok(())
    }

    fn perform_run(&self, sim: &mut Simulation, run_idx: usize) -> Result<Vec<NormalizedScore>> {
        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;

        sim.reset().context("failed to reset simulation")?;

        let mut recorder = if self.cfg.engine.record {
            let file = self.frames_file(run_idx);
            let file = File::create(&file).with_context(|| format!("failed to create {file:?}"))?;
            let mut writer = BufWriter::new(file);
            encode::write(&mut writer, &sim.frame()).context("failed to serialize frame")?;
            Some(writer)
        } else {
            None
        };

        while sim.should_continue(self.cfg.runs.turn_limit) {
            sim.step();
            if let Some(writer) = recorder.as_mut() {
                encode::write(writer, &sim.frame()).context("failed to serialize frame")?;
            }
        }

        if let Some(mut writer) = recorder {
            writer.flush().context("failed to flush writer stream")?;
        }

        let report = sim.report()?;
        let record = RunRecord {
            run: run_idx,
            turns: sim.turn(),
            faults: sim.faults(),
            scores: report
                .iter()
                .enumerate()
                .map(|(rank, score)| RankedScore {
                    rank: rank + 1,
                    total: score.total(),
                    score,
                })
                .collect(),
        };
        write_json(self.scores_file(run_idx), &record).context("failed to save scores")?;

        log::info!(
            "run {run_idx} ended after {} turns with {} active",
            sim.turn(),
            sim.active().len()
        );
        Ok(report)
    }

    /// Check that every submission loads, answers a probe decision, and
    /// survives a short run with well-formed scores.
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry()?;
        let rules = self.cfg.rules()?;

        let grid = Grid::new(rules.grid.rows().max(2), rules.grid.columns().max(2))?;
        let body = VecDeque::from([grid.coordinate(0, 0)]);
        let occupied = HashSet::from([grid.coordinate(0, 0), grid.coordinate(1, 1)]);
        let food = HashSet::new();
        let view = crate::strategy::View::new(&body, &occupied, &food, grid, None, true);

        for candidate in registry.discovered() {
            let mut strategy = candidate.build()?;
            let direction = strategy
                .decide(&view)
                .with_context(|| format!("{:?} failed the probe decision", candidate.name))?;
            log::info!("{} ({}) answered {direction:?}", candidate.name, candidate.kind);
        }

        let mut sim = Simulation::new(rules, registry, self.rng()?);
        sim.reset().context("failed to reset simulation")?;
        while sim.should_continue(self.cfg.runs.turn_limit) {
            sim.step();
        }
        for score in sim.report()? {
            let parts = [Some(score.age), score.length, Some(score.overlap)];
            if parts.into_iter().flatten().any(|val| !(0.0..=1.0).contains(&val)) {
                bail!("{} has a score outside [0, 1]: {score:?}", score.raw.name);
            }
        }
        for fault in sim.faults() {
            log::warn!("{} faulted on turn {}: {}", fault.name, fault.turn, fault.reason);
        }

        log::info!("validated {} submissions", sim.active().len() + sim.ended().len());
        Ok(())
    }

    pub fn clean(&self) -> Result<()> {
        let sim_dir = self.sim_dir.to_str().context("sim dir is not valid UTF-8")?;
        let pattern = Path::new(&Pattern::escape(sim_dir)).join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        for entry in glob(pattern).context("failed to glob run dirs")? {
            let run_dir = entry.context("failed to read glob entry")?;
            if run_dir.is_dir() {
                fs::remove_dir_all(&run_dir)
                    .with_context(|| format!("failed to remove {run_dir:?}"))?;
                log::info!("removed {run_dir:?}");
            }
        }

        let results_file = self.results_file();
        if results_file.exists() {
            fs::remove_file(&results_file)
                .with_context(|| format!("failed to remove {results_file:?}"))?;
            log::info!("removed {results_file:?}");
        }

        Ok(())
    }

    fn registry(&self) -> Result<Registry> {
        let root = self.sim_dir.join(&self.cfg.registry.prefix);
        let registry = Registry::from_dir(&root, &Catalog::builtin(), self.cfg.registry.replicas)
            .with_context(|| format!("failed to discover submissions in {root:?}"))?;
        log::info!("discovered {} submissions", registry.discovered().len());
        Ok(registry)
    }

    fn rng(&self) -> Result<ChaCha12Rng> {
        let rng = match self.cfg.runs.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        Ok(rng)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn frames_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("frames.msgpack")
    }

    fn scores_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("scores.json")
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.json")
    }
}

fn write_json<P: AsRef<Path>, T: Serialize>(file: P, value: &T) -> Result<()> {
    let file = file.as_ref();
    let handle = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(handle);
    serde_json::to_writer_pretty(&mut writer, value).context("failed to serialize json")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
