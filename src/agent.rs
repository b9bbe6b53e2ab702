use crate::direction::Direction;
use crate::grid::{Coordinate, Grid};
use crate::score::Score;
use crate::simulation::Rules;
use crate::strategy::{Strategy, View};
use anyhow::{Context, Result, anyhow, bail};
use std::{
    any::Any,
    collections::{HashSet, VecDeque},
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

/// Why an agent stopped moving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Head shared a cell with another active body, or its own.
    Collision,
    /// Head ran into the residual body of an ended agent.
    EndedBody,
    /// Head left a bounded board.
    OutOfBounds,
    /// Strategy failed, panicked or ran over its time budget.
    Fault(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Collision => write!(f, "collision"),
            EndReason::EndedBody => write!(f, "hit ended body"),
            EndReason::OutOfBounds => write!(f, "out of bounds"),
            EndReason::Fault(reason) => write!(f, "fault: {reason}"),
        }
    }
}

/// Board snapshot sent to a strategy worker.
struct Request {
    body: VecDeque<Coordinate>,
    occupied: Arc<HashSet<Coordinate>>,
    food: Arc<HashSet<Coordinate>>,
    grid: Grid,
    vision_range: Option<u32>,
    wraparound: bool,
}

enum Reply {
    Decided(Result<Direction>),
    TimedOut(Duration),
}

/// Strategy moved onto its own thread so a decision can be abandoned once
/// it runs past the budget.
struct Worker {
    requests: mpsc::Sender<Request>,
    replies: mpsc::Receiver<Result<Direction>>,
    budget: Duration,
}

impl Worker {
    fn spawn(name: &str, mut strategy: Box<dyn Strategy>, budget: Duration) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (reply_tx, reply_rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("strategy-{name}"))
            .spawn(move || {
                for req in request_rx {
                    let view = View::new(
                        &req.body,
                        &req.occupied,
                        &req.food,
                        req.grid,
                        req.vision_range,
                        req.wraparound,
                    );
                    let decision = guarded_decide(strategy.as_mut(), &view);
                    if reply_tx.send(decision).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn strategy worker")?;

        Ok(Self {
            requests: request_tx,
            replies: reply_rx,
            budget,
        })
    }

    fn ask(&self, request: Request) -> Reply {
        if self.requests.send(request).is_err() {
            return Reply::Decided(Err(anyhow!("strategy worker stopped")));
        }
        match self.replies.recv_timeout(self.budget) {
            Ok(decision) => Reply::Decided(decision),
            Err(mpsc::RecvTimeoutError::Timeout) => Reply::TimedOut(self.budget),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Reply::Decided(Err(anyhow!("strategy worker stopped")))
            }
        }
    }
}

enum Driver {
    Inline(Box<dyn Strategy>),
    Worker(Worker),
    /// Left behind after an overrun.
    Abandoned,
}

/// Agent of the simulation.
///
/// Wraps a strategy with a head-first body and its per-run counters.
pub struct Agent {
    name: String,
    slot: usize,
    body: VecDeque<Coordinate>,
    age: u32,
    overlap: u32,
    end: Option<EndReason>,
    driver: Driver,
}

impl Agent {
    /// `body` must be non-empty and head-first.
    pub fn new(
        name: String,
        slot: usize,
        body: VecDeque<Coordinate>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        Self {
            name,
            slot,
            body,
            age: 0,
            overlap: 0,
            end: None,
            driver: Driver::Inline(strategy),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable cosmetic index handed to renderers.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn head(&self) -> Coordinate {
        self.body[0]
    }

    pub fn body(&self) -> &VecDeque<Coordinate> {
        &self.body
    }

    pub fn length(&self) -> usize {
        self.body.len()
    }

    pub fn is_alive(&self) -> bool {
        self.end.is_none()
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end.as_ref()
    }

    pub(crate) fn advance(&mut self, head: Coordinate) {
        self.body.push_front(head);
    }

    pub(crate) fn drop_tail(&mut self) {
        if self.body.len() > 1 {
            self.body.pop_back();
        }
    }

    /// Close a tick survived with `overlaps` body cells shared with others.
    pub(crate) fn record_tick(&mut self, overlaps: u32) {
        self.overlap += overlaps;
        self.age += 1;
    }

    pub(crate) fn end(&mut self, reason: EndReason) {
        self.end = Some(reason);
    }

    pub fn score(&self, with_length: bool) -> Score {
        Score {
            name: self.name.clone(),
            age: self.age(),
            length: with_length.then_some(self.length() as u32),
            overlap: self.overlap(),
        }
    }

    /// Ask the strategy for its next move against a pre-move snapshot.
    ///
    /// Errors, panics and budget overruns all come back as `Err`. With a
    /// budget the strategy runs on a dedicated thread, and an overrun
    /// abandons it there.
    pub(crate) fn decide(
        &mut self,
        occupied: &Arc<HashSet<Coordinate>>,
        food: &Arc<HashSet<Coordinate>>,
        rules: &Rules,
    ) -> Result<Direction> {
        if let Some(budget) = rules.decision_budget {
            if matches!(self.driver, Driver::Inline(_)) {
                if let Driver::Inline(strategy) = mem::replace(&mut self.driver, Driver::Abandoned)
                {
                    self.driver = Driver::Worker(Worker::spawn(&self.name, strategy, budget)?);
                }
            }
        }

        let reply = match &mut self.driver {
            Driver::Inline(strategy) => {
                let view = View::new(
                    &self.body,
                    occupied,
                    food,
                    rules.grid,
                    rules.vision_range,
                    rules.wraparound,
                );
                Reply::Decided(guarded_decide(strategy.as_mut(), &view))
            }
            Driver::Worker(worker) => worker.ask(Request {
                body: self.body.clone(),
                occupied: Arc::clone(occupied),
                food: Arc::clone(food),
                grid: rules.grid,
                vision_range: rules.vision_range,
                wraparound: rules.wraparound,
            }),
            Driver::Abandoned => bail!("strategy was abandoned after an overrun"),
        };

        match reply {
            Reply::Decided(decision) => decision,
            Reply::TimedOut(budget) => {
                self.driver = Driver::Abandoned;
                bail!("decision ran over its budget of {budget:?}")
            }
        }
    }
}

fn guarded_decide(strategy: &mut dyn Strategy, view: &View<'_>) -> Result<Direction> {
    match panic::catch_unwind(AssertUnwindSafe(|| strategy.decide(view))) {
        Ok(decision) => decision,
        Err(payload) => bail!("strategy panicked: {}", panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
