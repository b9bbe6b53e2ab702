//! Tick-synchronous simulation of a roster of agents on one board.

use crate::agent::{Agent, EndReason};
use crate::config::FoodMode;
use crate::direction::Direction;
use crate::grid::{Coordinate, Grid};
use crate::registry::Registry;
use crate::score::{self, NormalizedScore};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Uniform;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

const SAMPLING_ATTEMPTS: usize = 64;

/// Board and engine parameters shared by every run of a simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    pub grid: Grid,
    pub wraparound: bool,
    pub vision_range: Option<u32>,
    pub food: FoodMode,
    pub decision_budget: Option<Duration>,
    pub parallel_decisions: bool,
    pub palette_size: usize,
}

impl Rules {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            wraparound: true,
            vision_range: None,
            food: FoodMode::Disabled,
            decision_budget: None,
            parallel_decisions: false,
            palette_size: 41,
        }
    }
}

/// A strategy failure recorded against an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fault {
    pub turn: u32,
    pub name: String,
    pub reason: String,
}

/// Renderer-facing snapshot of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentFrame {
    pub name: String,
    pub slot: usize,
    pub alive: bool,
    pub end: Option<String>,
    pub body: Vec<Coordinate>,
}

/// Renderer-facing snapshot of the whole board after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub turn: u32,
    pub agents: Vec<AgentFrame>,
    pub food: Vec<Coordinate>,
}

/// Simulation state.
///
/// Owns the roster, the food and the occupancy index, and is reused across
/// runs through [`Simulation::reset`].
pub struct Simulation {
    rules: Rules,
    registry: Registry,
    rng: ChaCha12Rng,
    active: Vec<Agent>,
    /// In elimination order.
    ended: Vec<Agent>,
    food: HashSet<Coordinate>,
    /// Number of body cells of any agent on each coordinate.
    occupancy: HashMap<Coordinate, u32>,
    turn: u32,
    faults: Vec<Fault>,
}

impl Simulation {
    /// Create an empty simulation; call [`Simulation::reset`] before stepping.
    pub fn new(rules: Rules, registry: Registry, rng: ChaCha12Rng) -> Self {
        Self {
            rules,
            registry,
            rng,
            active: Vec::new(),
            ended: Vec::new(),
            food: HashSet::new(),
            occupancy: HashMap::new(),
            turn: 0,
            faults: Vec::new(),
        }
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn active(&self) -> &[Agent] {
        &self.active
    }

    pub fn ended(&self) -> &[Agent] {
        &self.ended
    }

    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    /// Start a new run with a freshly instantiated roster on a random board.
    pub fn reset(&mut self) -> Result<()> {
        let mut submissions = self
            .registry
            .submissions()
            .context("failed to instantiate roster")?;
        if submissions.is_empty() {
            bail!("roster is empty");
        }
        submissions.sort_by(|a, b| a.name.cmp(&b.name));

        self.active.clear();
        self.ended.clear();
        self.food.clear();
        self.occupancy.clear();
        self.faults.clear();
        self.turn = 0;

        let palette = self.rules.palette_size.max(1);
        let stride = (palette / submissions.len()).max(1);
        for (idx, submission) in submissions.into_iter().enumerate() {
            let head = self
                .random_free_cell()
                .context("no free cell left to place agents")?;
            *self.occupancy.entry(head).or_default() += 1;
            let slot = (idx * stride) % palette;
            self.active.push(Agent::new(
                submission.name,
                slot,
                VecDeque::from([head]),
                submission.strategy,
            ));
        }

        let target = self.food_target();
        while self.food.len() < target {
            let Some(cell) = self.random_free_cell() else {
                break;
            };
            self.food.insert(cell);
        }

        log::debug!(
            "reset with {} agents and {} food",
            self.active.len(),
            self.food.len()
        );
        Ok(())
    }

    /// Whether the run should keep going.
    pub fn should_continue(&self, turn_limit: u32) -> bool {
        self.turn < turn_limit && !self.active.is_empty()
    }

    /// Advance the run by one tick.
    pub fn step(&mut self) {
        let occupied: Arc<HashSet<_>> = Arc::new(self.occupancy.keys().copied().collect());
        let food = Arc::new(self.food.clone());
        let decisions = self.gather_decisions(&occupied, &food);

        let mut ending: Vec<Option<EndReason>> = vec![None; self.active.len()];
        let mut movers = Vec::with_capacity(self.active.len());
        for (idx, decision) in decisions.into_iter().enumerate() {
            let agent = &mut self.active[idx];
            let direction = match decision {
                Ok(direction) => direction,
                Err(error) => {
                    let reason = format!("{error:#}");
                    log::warn!("turn {}: {} faulted: {reason}", self.turn, agent.name());
                    self.faults.push(Fault {
                        turn: self.turn,
                        name: agent.name().to_string(),
                        reason: reason.clone(),
                    });
                    ending[idx] = Some(EndReason::Fault(reason));
                    continue;
                }
            };
            match next_head(&self.rules, agent.head(), direction) {
                Some(head) => {
                    agent.advance(head);
                    movers.push(idx);
                }
                None => ending[idx] = Some(EndReason::OutOfBounds),
            }
        }

        let growth = self.rules.food.enabled();
        for &idx in &movers {
            let agent = &mut self.active[idx];
            if !(growth && self.food.contains(&agent.head())) {
                agent.drop_tail();
            }
        }

        let mut eaten = 0;
        for &idx in &movers {
            if growth && self.food.remove(&self.active[idx].head()) {
                eaten += 1;
            }
        }

        self.recompute_occupancy();

        for _ in 0..eaten {
            if self.food.len() >= self.food_target() {
                break;
            }
            if let Some(cell) = self.random_free_cell() {
                self.food.insert(cell);
            }
        }

        self.eliminate(&mut ending);

        let mut still_active = Vec::with_capacity(self.active.len());
        for (mut agent, reason) in self.active.drain(..).zip(ending) {
            match reason {
                Some(reason) => {
                    log::debug!("turn {}: {} ended ({reason})", self.turn, agent.name());
                    agent.end(reason);
                    self.ended.push(agent);
                }
                None => still_active.push(agent),
            }
        }
        self.active = still_active;

        for agent in &mut self.active {
            let overlaps = agent
                .body()
                .iter()
                .skip(1)
                .filter(|cell| self.occupancy.get(cell).copied().unwrap_or(0) > 1)
                .count();
            agent.record_tick(overlaps as u32);
        }

        self.turn += 1;
    }

    /// Normalized scores of every agent, best first.
    pub fn report(&self) -> Result<Vec<NormalizedScore>> {
        let with_length = self.rules.food.enabled();
        let scores: Vec<_> = self
            .active
            .iter()
            .chain(&self.ended)
            .map(|agent| agent.score(with_length))
            .collect();
        score::normalize(&scores).context("failed to report scores")
    }

    /// Snapshot for renderers and recorders.
    pub fn frame(&self) -> Frame {
        let agents = self
            .active
            .iter()
            .chain(&self.ended)
            .map(|agent| AgentFrame {
                name: agent.name().to_string(),
                slot: agent.slot(),
                alive: agent.is_alive(),
                end: agent.end_reason().map(ToString::to_string),
                body: agent.body().iter().copied().collect(),
            })
            .collect();
        let mut food: Vec<_> = self.food.iter().copied().collect();
        food.sort();
        Frame {
            turn: self.turn,
            agents,
            food,
        }
    }

    fn gather_decisions(
        &mut self,
        occupied: &Arc<HashSet<Coordinate>>,
        food: &Arc<HashSet<Coordinate>>,
    ) -> Vec<Result<Direction>> {
        let rules = &self.rules;
        if rules.parallel_decisions {
            self.active
                .par_iter_mut()
                .map(|agent| agent.decide(occupied, food, rules))
                .collect()
        } else {
            self.active
                .iter_mut()
                .map(|agent| agent.decide(occupied, food, rules))
                .collect()
        }
    }

    /// Mark movers whose new head hit an ended body or shares its cell.
    fn eliminate(&self, ending: &mut [Option<EndReason>]) {
        let ended_cells: HashSet<_> = self
            .ended
            .iter()
            .flat_map(|agent| agent.body().iter())
            .chain(
                self.active
                    .iter()
                    .zip(ending.iter())
                    .filter(|(_, reason)| reason.is_some())
                    .flat_map(|(agent, _)| agent.body().iter()),
            )
            .copied()
            .collect();

        let mut active_counts: HashMap<Coordinate, u32> = HashMap::new();
        for (agent, _) in self
            .active
            .iter()
            .zip(ending.iter())
            .filter(|(_, reason)| reason.is_none())
        {
            for cell in agent.body() {
                *active_counts.entry(*cell).or_default() += 1;
            }
        }

        for (agent, reason) in self.active.iter().zip(ending.iter_mut()) {
            if reason.is_some() {
                continue;
            }
            let head = agent.head();
            if ended_cells.contains(&head) {
                *reason = Some(EndReason::EndedBody);
            } else if active_counts.get(&head).copied().unwrap_or(0) > 1 {
                *reason = Some(EndReason::Collision);
            }
        }
    }

    fn recompute_occupancy(&mut self) {
        self.occupancy.clear();
        for agent in self.active.iter().chain(&self.ended) {
            for cell in agent.body() {
                *self.occupancy.entry(*cell).or_default() += 1;
            }
        }
    }

    fn food_target(&self) -> usize {
        match self.rules.food {
            FoodMode::Disabled => 0,
            FoodMode::Fixed { count } => count,
            FoodMode::Dynamic => self.active.len(),
        }
    }

    fn is_free(&self, cell: &Coordinate) -> bool {
        !self.occupancy.contains_key(cell) && !self.food.contains(cell)
    }

    /// Uniform over free cells. Rejection sampling first, then a single
    /// scan of the board once it is crowded.
    fn random_free_cell(&mut self) -> Option<Coordinate> {
        let grid = self.rules.grid;
        let dist = Uniform::new(0, grid.area()).ok()?;
        for _ in 0..SAMPLING_ATTEMPTS {
            let idx = dist.sample(&mut self.rng);
            let cell = grid.cell_at(idx);
            if self.is_free(&cell) {
                return Some(cell);
            }
        }

        let (occupancy, food) = (&self.occupancy, &self.food);
        grid.cells()
            .filter(|cell| !occupancy.contains_key(cell) && !food.contains(cell))
            .choose(&mut self.rng)
    }
}

fn next_head(rules: &Rules, head: Coordinate, direction: Direction) -> Option<Coordinate> {
    if rules.wraparound {
        Some(head.neighbor(direction))
    } else {
        rules.grid.checked_neighbor(head, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Discovered;
    use crate::strategies::{Cautious, Straight, Wanderer};
    use crate::strategy::{Strategy, View};
    use std::collections::VecDeque;

    struct Fixed(Direction);

    impl Strategy for Fixed {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl Strategy for Failing {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            bail!("no idea where to go")
        }
    }

    struct Panicking;

    impl Strategy for Panicking {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            panic!("strategy blew up")
        }
    }

    /// Fine for a number of calls, then errors.
    struct Flaky {
        calls_left: u32,
    }

    impl Strategy for Flaky {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            if self.calls_left == 0 {
                bail!("ran out of ideas");
            }
            self.calls_left -= 1;
            Ok(Direction::Right)
        }
    }

    struct Hanging;

    impl Strategy for Hanging {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            std::thread::sleep(Duration::from_secs(60));
            Ok(Direction::Up)
        }
    }

    struct Slow;

    impl Strategy for Slow {
        fn decide(&mut self, _view: &View<'_>) -> Result<Direction> {
            std::thread::sleep(Duration::from_millis(30));
            Ok(Direction::Up)
        }
    }

    /// Fails if it can see the other agent's post-move position.
    struct Observer {
        forbidden: Coordinate,
    }

    impl Strategy for Observer {
        fn decide(&mut self, view: &View<'_>) -> Result<Direction> {
            if view.is_occupied(&self.forbidden) {
                bail!("saw a move from the current tick");
            }
            Ok(Direction::Down)
        }
    }

    fn grid() -> Grid {
        Grid::new(10, 10).expect("failed to construct grid")
    }

    fn empty_registry() -> Registry {
        Registry::from_discovered(Vec::new(), 1)
    }

    fn board(rules: Rules) -> Simulation {
        Simulation::new(rules, empty_registry(), ChaCha12Rng::seed_from_u64(7))
    }

    fn agent(name: &str, body: &[(i64, i64)], strategy: impl Strategy + 'static) -> Agent {
        let grid = grid();
        let cells: VecDeque<_> = body.iter().map(|&(r, c)| grid.coordinate(r, c)).collect();
        Agent::new(name.to_string(), 0, cells, Box::new(strategy))
    }

    fn place(sim: &mut Simulation, agents: Vec<Agent>) {
        sim.active = agents;
        sim.recompute_occupancy();
    }

    fn find<'a>(sim: &'a Simulation, name: &str) -> &'a Agent {
        sim.active
            .iter()
            .chain(&sim.ended)
            .find(|agent| agent.name() == name)
            .expect("agent not found")
    }

    #[test]
    fn head_on_collision_ends_both() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(5, 4)], Fixed(Direction::Right)),
                agent("b", &[(5, 6)], Fixed(Direction::Left)),
                agent("c", &[(0, 0)], Fixed(Direction::Down)),
            ],
        );
        sim.step();

        assert_eq!(sim.active.len(), 1);
        assert_eq!(sim.active[0].name(), "c");
        for name in ["a", "b"] {
            let ended = find(&sim, name);
            assert!(!ended.is_alive());
            assert_eq!(ended.end_reason(), Some(&EndReason::Collision));
            assert_eq!(ended.age(), 0);
        }
        assert_eq!(find(&sim, "c").age(), 1);
    }

    #[test]
    fn ended_bodies_keep_blocking() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(5, 4)], Fixed(Direction::Right)),
                agent("b", &[(5, 6)], Fixed(Direction::Left)),
            ],
        );
        sim.step();
        assert!(sim.active.is_empty());
        assert_eq!(sim.occupancy.get(&grid().coordinate(5, 5)), Some(&2));

        sim.active.push(agent("late", &[(4, 5)], Fixed(Direction::Down)));
        sim.recompute_occupancy();
        sim.step();
        let late = find(&sim, "late");
        assert_eq!(late.end_reason(), Some(&EndReason::EndedBody));
        assert_eq!(sim.occupancy.get(&grid().coordinate(5, 5)), Some(&3));
    }

    #[test]
    fn running_into_a_body_ends_only_the_mover() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(0, 0)], Fixed(Direction::Right)),
                agent("b", &[(0, 1), (0, 2), (0, 3)], Fixed(Direction::Down)),
            ],
        );
        sim.step();

        assert_eq!(find(&sim, "a").end_reason(), Some(&EndReason::Collision));
        let b = find(&sim, "b");
        assert!(b.is_alive());
        let body: Vec<_> = b.body().iter().map(|c| (c.row(), c.column())).collect();
        assert_eq!(body, vec![(1, 1), (0, 1), (0, 2)]);
        assert_eq!(b.overlap(), 1);
    }

    #[test]
    fn self_collision_ends_the_agent() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![agent(
                "coil",
                &[(1, 1), (1, 2), (2, 2), (2, 1), (3, 1)],
                Fixed(Direction::Down),
            )],
        );
        sim.step();
        assert_eq!(find(&sim, "coil").end_reason(), Some(&EndReason::Collision));
        assert!(!sim.should_continue(100));
    }

    #[test]
    fn eating_food_grows_and_respawns() {
        let mut rules = Rules::new(grid());
        rules.food = FoodMode::Fixed { count: 1 };
        let mut sim = board(rules);
        place(&mut sim, vec![agent("a", &[(3, 3)], Fixed(Direction::Right))]);
        sim.food.insert(grid().coordinate(3, 4));

        sim.step();
        let a = find(&sim, "a");
        let body: Vec<_> = a.body().iter().map(|c| (c.row(), c.column())).collect();
        assert_eq!(body, vec![(3, 4), (3, 3)]);
        assert_eq!(sim.food.len(), 1);
        assert!(sim.food.iter().all(|cell| !a.body().contains(cell)));

        sim.food = HashSet::from([grid().coordinate(8, 8)]);
        sim.step();
        assert_eq!(find(&sim, "a").length(), 2);
        assert_eq!(sim.report().expect("failed to report")[0].raw.length, Some(2));
    }

    #[test]
    fn dynamic_food_tracks_active_count() {
        let mut rules = Rules::new(grid());
        rules.food = FoodMode::Dynamic;
        let mut sim = board(rules);
        place(
            &mut sim,
            vec![
                agent("a", &[(3, 3)], Fixed(Direction::Right)),
                agent("b", &[(7, 7)], Fixed(Direction::Up)),
            ],
        );
        sim.food.insert(grid().coordinate(3, 4));
        sim.food.insert(grid().coordinate(6, 7));

        sim.step();
        assert_eq!(find(&sim, "a").length(), 2);
        assert_eq!(find(&sim, "b").length(), 2);
        assert_eq!(sim.food.len(), 2);
    }

    #[test]
    fn without_food_length_is_constant() {
        let mut sim = board(Rules::new(grid()));
        place(&mut sim, vec![agent("a", &[(3, 3), (3, 2)], Fixed(Direction::Right))]);
        sim.food.insert(grid().coordinate(3, 4));
        sim.step();
        assert_eq!(find(&sim, "a").length(), 2);
        assert_eq!(sim.report().expect("failed to report")[0].raw.length, None);
    }

    #[test]
    fn bounded_board_ends_agents_at_the_border() {
        let mut rules = Rules::new(grid());
        rules.wraparound = false;
        let mut sim = board(rules);
        place(&mut sim, vec![agent("a", &[(0, 0)], Fixed(Direction::Up))]);
        sim.step();
        let a = find(&sim, "a");
        assert_eq!(a.end_reason(), Some(&EndReason::OutOfBounds));
        assert_eq!(a.head(), grid().coordinate(0, 0));
    }

    #[test]
    fn toroidal_board_wraps() {
        let mut sim = board(Rules::new(grid()));
        place(&mut sim, vec![agent("a", &[(0, 0)], Fixed(Direction::Up))]);
        sim.step();
        let a = find(&sim, "a");
        assert!(a.is_alive());
        assert_eq!(a.head(), grid().coordinate(9, 0));
    }

    #[test]
    fn faults_end_only_the_offender() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("bad", &[(2, 2)], Failing),
                agent("boom", &[(4, 4)], Panicking),
                agent("good", &[(6, 6)], Fixed(Direction::Left)),
            ],
        );
        sim.step();

        assert_eq!(sim.active.len(), 1);
        assert_eq!(sim.active[0].name(), "good");
        let names: Vec<_> = sim.faults().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["bad", "boom"]);
        assert!(sim.faults()[1].reason.contains("strategy blew up"));
        assert_eq!(find(&sim, "bad").head(), grid().coordinate(2, 2));
        assert!(matches!(
            find(&sim, "bad").end_reason(),
            Some(EndReason::Fault(_))
        ));
    }

    #[test]
    fn faults_record_their_turn() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("flaky", &[(2, 2)], Flaky { calls_left: 2 }),
                agent("steady", &[(6, 6)], Fixed(Direction::Left)),
            ],
        );
        for _ in 0..3 {
            sim.step();
        }

        assert_eq!(sim.faults().len(), 1);
        let fault = &sim.faults()[0];
        assert_eq!(fault.name, "flaky");
        assert_eq!(fault.turn, 2);
        assert!(fault.reason.contains("ran out of ideas"));
        assert_eq!(find(&sim, "flaky").age(), 2);
        assert_eq!(find(&sim, "flaky").head(), grid().coordinate(2, 4));
    }

    #[test]
    fn swapping_single_cell_heads_is_not_a_collision() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(5, 4)], Fixed(Direction::Right)),
                agent("b", &[(5, 5)], Fixed(Direction::Left)),
            ],
        );
        sim.step();

        assert_eq!(sim.active.len(), 2);
        assert_eq!(find(&sim, "a").head(), grid().coordinate(5, 5));
        assert_eq!(find(&sim, "b").head(), grid().coordinate(5, 4));
    }

    #[test]
    fn swapping_heads_with_longer_bodies_collides() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(5, 4), (5, 3)], Fixed(Direction::Right)),
                agent("b", &[(5, 5), (5, 6)], Fixed(Direction::Left)),
            ],
        );
        sim.step();

        assert!(sim.active.is_empty());
        for name in ["a", "b"] {
            assert_eq!(find(&sim, name).end_reason(), Some(&EndReason::Collision));
        }
    }

    #[test]
    fn hanging_decisions_are_abandoned() {
        let mut rules = Rules::new(grid());
        rules.decision_budget = Some(Duration::from_millis(50));
        let mut sim = board(rules);
        place(
            &mut sim,
            vec![
                agent("stuck", &[(2, 2)], Hanging),
                agent("steady", &[(6, 6)], Fixed(Direction::Left)),
            ],
        );

        let start = std::time::Instant::now();
        sim.step();
        assert!(start.elapsed() < Duration::from_secs(5));

        assert_eq!(sim.faults().len(), 1);
        assert_eq!(sim.faults()[0].name, "stuck");
        assert_eq!(sim.active.len(), 1);
        assert_eq!(sim.active[0].name(), "steady");
    }

    #[test]
    fn budgeted_agents_keep_deciding() {
        let mut rules = Rules::new(grid());
        rules.decision_budget = Some(Duration::from_secs(2));
        let mut sim = board(rules);
        place(&mut sim, vec![agent("a", &[(3, 3)], Fixed(Direction::Down))]);
        for _ in 0..3 {
            sim.step();
        }

        assert!(sim.faults().is_empty());
        let a = find(&sim, "a");
        assert_eq!(a.age(), 3);
        assert_eq!(a.head(), grid().coordinate(6, 3));
    }

    #[test]
    fn free_cells_are_found_on_a_crowded_board() {
        let mut rules = Rules::new(grid());
        rules.food = FoodMode::Fixed { count: 1 };
        let mut sim = board(rules);
        let mut body: Vec<_> = grid().cells().map(|c| (c.row(), c.column())).collect();
        let last = body.pop().expect("empty grid");
        place(&mut sim, vec![agent("big", &body, Fixed(Direction::Up))]);

        assert_eq!(sim.random_free_cell(), Some(grid().coordinate(last.0, last.1)));
        sim.food.insert(grid().coordinate(last.0, last.1));
        assert_eq!(sim.random_free_cell(), None);
    }

    #[test]
    fn slow_decisions_are_faults() {
        let mut rules = Rules::new(grid());
        rules.decision_budget = Some(Duration::from_millis(1));
        let mut sim = board(rules);
        place(&mut sim, vec![agent("slow", &[(2, 2)], Slow)]);
        sim.step();
        assert_eq!(sim.faults().len(), 1);
        assert!(sim.active.is_empty());
    }

    #[test]
    fn decisions_see_the_pre_move_board() {
        for parallel in [false, true] {
            let mut rules = Rules::new(grid());
            rules.parallel_decisions = parallel;
            let mut sim = board(rules);
            place(
                &mut sim,
                vec![
                    agent("mover", &[(5, 5)], Fixed(Direction::Right)),
                    agent(
                        "watcher",
                        &[(0, 0)],
                        Observer {
                            forbidden: grid().coordinate(5, 6),
                        },
                    ),
                ],
            );
            sim.step();
            assert!(sim.faults().is_empty());
            assert_eq!(sim.active.len(), 2);
        }
    }

    #[test]
    fn single_agent_end_to_end() {
        let registry = Registry::from_discovered(
            vec![Discovered::new("solo", "straight", toml::Table::new(), Straight::build)],
            1,
        );
        let mut sim = Simulation::new(Rules::new(grid()), registry, ChaCha12Rng::seed_from_u64(1));
        sim.reset().expect("failed to reset");

        for turn in 0..5 {
            assert!(sim.should_continue(5));
            assert_eq!(sim.turn(), turn);
            sim.step();
        }
        assert!(!sim.should_continue(5));

        let report = sim.report().expect("failed to report");
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].raw.age, 5);
        assert!(report[0].total() > 0.0);
    }

    #[test]
    fn reset_places_roster_and_food_on_distinct_cells() {
        let registry = Registry::from_discovered(
            vec![Discovered::new("w", "wanderer", toml::Table::new(), Wanderer::build)],
            5,
        );
        let mut rules = Rules::new(grid());
        rules.food = FoodMode::Dynamic;
        let mut sim = Simulation::new(rules, registry, ChaCha12Rng::seed_from_u64(3));
        sim.reset().expect("failed to reset");

        let names: Vec<_> = sim.active().iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["w0", "w1", "w2", "w3", "w4"]);
        let slots: Vec<_> = sim.active().iter().map(|a| a.slot()).collect();
        assert_eq!(slots, vec![0, 8, 16, 24, 32]);

        let mut cells: HashSet<_> = sim.active().iter().map(|a| a.head()).collect();
        assert_eq!(cells.len(), 5);
        assert_eq!(sim.food.len(), 5);
        cells.extend(sim.food.iter().copied());
        assert_eq!(cells.len(), 10);
        assert_eq!(sim.turn(), 0);
    }

    #[test]
    fn reset_fails_when_board_is_too_small() {
        let registry = Registry::from_discovered(
            vec![Discovered::new("w", "wanderer", toml::Table::new(), Wanderer::build)],
            5,
        );
        let tiny = Grid::new(2, 2).expect("failed to construct grid");
        let mut sim = Simulation::new(Rules::new(tiny), registry, ChaCha12Rng::seed_from_u64(3));
        assert!(sim.reset().is_err());
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let frames = |parallel: bool| {
            let registry = Registry::from_discovered(
                vec![
                    Discovered::new("c", "cautious", toml::Table::new(), Cautious::build),
                    Discovered::new("w", "wanderer", toml::Table::new(), Wanderer::build),
                ],
                4,
            );
            let mut rules = Rules::new(grid());
            rules.food = FoodMode::Fixed { count: 3 };
            rules.parallel_decisions = parallel;
            let mut sim = Simulation::new(rules, registry, ChaCha12Rng::seed_from_u64(11));
            sim.reset().expect("failed to reset");
            let mut frames = vec![sim.frame()];
            while sim.should_continue(40) {
                sim.step();
                frames.push(sim.frame());
            }
            frames
        };
        assert_eq!(frames(false), frames(true));
    }

    #[test]
    fn report_requires_agents() {
        let sim = board(Rules::new(grid()));
        assert!(sim.report().is_err());
    }

    #[test]
    fn frame_lists_active_then_ended() {
        let mut sim = board(Rules::new(grid()));
        place(
            &mut sim,
            vec![
                agent("a", &[(5, 4)], Fixed(Direction::Right)),
                agent("b", &[(5, 6)], Fixed(Direction::Left)),
                agent("c", &[(0, 0)], Fixed(Direction::Down)),
            ],
        );
        sim.step();
        let frame = sim.frame();
        assert_eq!(frame.turn, 1);
        let flags: Vec<_> = frame.agents.iter().map(|a| (a.name.as_str(), a.alive)).collect();
        assert_eq!(flags, vec![("c", true), ("a", false), ("b", false)]);
        assert_eq!(frame.agents[0].end, None);
        assert_eq!(frame.agents[1].end.as_deref(), Some("collision"));
    }
}
