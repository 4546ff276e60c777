// State Manager - Thread-safe simulation state handling
// Owns the body collection and the background clock that steps it

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, SimulationError, TickError};
use crate::physics_engine::{
    apply_accelerations, calculate_total_energy, energy_drift, init_orbit_around_parent, Body,
    BodyKind, IntegrationScheme, Integrator, Vector2, LUNA_DISTANCE,
};

/// Sleep between ticks of the background loop
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

// =============================================================================
// BODY COLLECTION
// =============================================================================

/// Counters describing how the background loop is faring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickHealth {
    pub completed_ticks: u64,
    /// Discarded ticks (panic in the step, date overflow)
    pub failed_ticks: u64,
    /// Committed ticks that left some body non-finite
    pub degenerate_ticks: u64,
    pub last_failure: Option<String>,
}

impl TickHealth {
    fn record_failure(&mut self, err: &TickError) {
        self.failed_ticks += 1;
        self.last_failure = Some(err.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyCollection {
    pub bodies: Vec<Body>,
    pub start_date: DateTime<Utc>,
    /// Always `start_date + elapsed_seconds`
    pub simulated_date: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub time_factor: f64, // simulated seconds per real second
    pub is_paused: bool,
    pub total_energy: f64,
    pub initial_energy: f64,
    pub health: TickHealth,
}

impl BodyCollection {
    pub fn new(start_date: DateTime<Utc>) -> Self {
        Self {
            bodies: Vec::new(),
            start_date,
            simulated_date: start_date,
            elapsed_seconds: 0.0,
            time_factor: 1.0,
            is_paused: false,
            total_energy: 0.0,
            initial_energy: 0.0,
            health: TickHealth::default(),
        }
    }

    /// Earth at rest at the origin with Luna on a circular orbit
    pub fn earth_moon(start_date: DateTime<Utc>) -> Self {
        let mut collection = Self::new(start_date);
        collection.add_body(Body::earth());
        let anchor = Body::earth().anchor();
        let mut luna = Body::luna();
        init_orbit_around_parent(&mut luna, anchor, Vector2::new(0.0, LUNA_DISTANCE));
        collection.add_body(luna);
        collection
    }

    /// Append a body, returning its index
    pub fn add_body(&mut self, body: Body) -> usize {
        self.bodies.push(body);
        self.reset_energy_reference();
        self.bodies.len() - 1
    }

    /// Put `body` on a circular orbit at `offset` from the first body named
    /// `parent_name`, then append it
    pub fn add_orbiting(&mut self, mut body: Body, parent_name: &str, offset: Vector2) -> Result<usize> {
        let anchor = self
            .find(parent_name)
            .map(|parent| parent.anchor())
            .ok_or_else(|| SimulationError::UnknownParent(parent_name.to_string()))?;

        init_orbit_around_parent(&mut body, anchor, offset);
        Ok(self.add_body(body))
    }

    pub fn find(&self, name: &str) -> Option<&Body> {
        self.bodies.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Fill every body's acceleration from the current field so the first
    /// jerk estimate is not taken against zero
    pub fn prime_accelerations(&mut self) {
        apply_accelerations(&mut self.bodies);
    }

    pub fn reset_energy_reference(&mut self) {
        self.initial_energy = calculate_total_energy(&self.bodies);
        self.total_energy = self.initial_energy;
    }
}

// =============================================================================
// SERIALIZABLE SNAPSHOTS FOR READERS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodySnapshot {
    pub name: String,
    pub kind: BodyKind,
    pub position: [f64; 2], // m
    pub velocity: [f64; 2], // m/s
    pub radius: f64,        // m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub bodies: Vec<BodySnapshot>,
    pub simulated_date: DateTime<Utc>,
    pub start_date: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub time_factor: f64,
    pub is_paused: bool,
    pub energy_drift: f64,
    pub health: TickHealth,
}

impl BodyCollection {
    pub fn to_snapshot(&self) -> SimulationSnapshot {
        let bodies = self
            .bodies
            .iter()
            .map(|b| BodySnapshot {
                name: b.name.clone(),
                kind: b.kind,
                position: [b.position.x, b.position.y],
                velocity: [b.velocity.x, b.velocity.y],
                radius: b.radius(),
            })
            .collect();

        SimulationSnapshot {
            bodies,
            simulated_date: self.simulated_date,
            start_date: self.start_date,
            elapsed_seconds: self.elapsed_seconds,
            time_factor: self.time_factor,
            is_paused: self.is_paused,
            energy_drift: energy_drift(self.initial_energy, self.total_energy),
            health: self.health.clone(),
        }
    }
}

// =============================================================================
// TICK
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Advanced { sim_dt: f64 },
    Paused,
    /// No simulated time elapsed; the step was not run
    Idle,
}

/// `start + seconds`, or None when out of chrono's range
pub fn date_after(start: DateTime<Utc>, seconds: f64) -> Option<DateTime<Utc>> {
    let whole = seconds.trunc();
    if !whole.is_finite() || whole.abs() >= i64::MAX as f64 {
        return None;
    }
    let nanos = ((seconds - whole) * 1e9) as i64;
    let delta = TimeDelta::try_seconds(whole as i64)?.checked_add(&TimeDelta::nanoseconds(nanos))?;
    start.checked_add_signed(delta)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Advance the collection by `real_dt` wall-clock seconds.
///
/// The step runs on a private copy of the bodies, which is published under a
/// single write lock, so readers only ever see whole steps. A failed tick
/// leaves the shared state untouched, and so does a tick that finds the
/// collection paused when it comes to publish.
pub fn advance(
    state: &RwLock<BodyCollection>,
    integrator: &dyn Integrator,
    real_dt: f64,
) -> std::result::Result<TickOutcome, TickError> {
    let (mut working, elapsed, start_date, time_factor) = {
        let sim = state.read();
        if sim.is_paused {
            return Ok(TickOutcome::Paused);
        }
        (sim.bodies.clone(), sim.elapsed_seconds, sim.start_date, sim.time_factor)
    };

    let sim_dt = real_dt * time_factor;
    if sim_dt <= 0.0 {
        return Ok(TickOutcome::Idle);
    }

    panic::catch_unwind(AssertUnwindSafe(|| integrator.step(&mut working, sim_dt)))
        .map_err(|payload| TickError::Panicked(panic_message(payload.as_ref())))?;

    let elapsed_seconds = elapsed + sim_dt;
    let simulated_date =
        date_after(start_date, elapsed_seconds).ok_or(TickError::DateOverflow { elapsed_seconds })?;
    let degenerate = working.iter().find(|b| !b.is_finite()).map(|b| b.name.clone());
    let total_energy = calculate_total_energy(&working);

    let mut sim = state.write();
    // paused while the step ran
    if sim.is_paused {
        return Ok(TickOutcome::Paused);
    }
    sim.bodies = working;
    sim.elapsed_seconds = elapsed_seconds;
    sim.simulated_date = simulated_date;
    sim.total_energy = total_energy;
    sim.health.completed_ticks += 1;

    if let Some(name) = degenerate {
        sim.health.degenerate_ticks += 1;
        log::warn!("Body {} has non-finite state at {}", name, simulated_date);
    }

    Ok(TickOutcome::Advanced { sim_dt })
}

// =============================================================================
// SIMULATION CLOCK (runs in background thread)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockState {
    Idle,
    Running,
    Stopped,
}

fn run_clock_loop(
    state: Arc<RwLock<BodyCollection>>,
    is_running: Arc<RwLock<bool>>,
    integrator: Box<dyn Integrator>,
    tick_interval: Duration,
) {
    // Seeded here so the first tick sees ~0 elapsed time
    let mut last_tick = Instant::now();

    while *is_running.read() {
        let now = Instant::now();
        let real_dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        if let Err(err) = advance(&state, integrator.as_ref(), real_dt) {
            log::warn!("Discarded simulation tick: {}", err);
            state.write().health.record_failure(&err);
        }

        thread::sleep(tick_interval);
    }
}

fn validate_time_factor(time_factor: f64) -> Result<()> {
    if time_factor.is_finite() && time_factor > 0.0 {
        Ok(())
    } else {
        Err(SimulationError::InvalidTimeFactor(time_factor))
    }
}

/// Read-only handle to a running simulation, cheap to clone across threads
#[derive(Clone)]
pub struct SimulationReader {
    state: Arc<RwLock<BodyCollection>>,
}

impl SimulationReader {
    pub fn snapshot(&self) -> SimulationSnapshot {
        self.state.read().to_snapshot()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&BodyCollection) -> R) -> R {
        f(&self.state.read())
    }

    pub fn simulated_date(&self) -> DateTime<Utc> {
        self.state.read().simulated_date
    }
}

/// A body collection plus the clock that steps it.
///
/// `Idle` until `start`, then a single background thread is the only writer
/// until `stop` (or drop) joins it.
pub struct Simulation {
    state: Arc<RwLock<BodyCollection>>,
    is_running: Arc<RwLock<bool>>,
    integrator: Option<Box<dyn Integrator>>,
    tick_interval: Duration,
    clock: ClockState,
    worker: Option<JoinHandle<()>>,
}

impl Simulation {
    pub fn new(collection: BodyCollection, scheme: IntegrationScheme) -> Self {
        Self::with_integrator(collection, scheme.integrator())
    }

    pub fn with_integrator(collection: BodyCollection, integrator: Box<dyn Integrator>) -> Self {
        Self {
            state: Arc::new(RwLock::new(collection)),
            is_running: Arc::new(RwLock::new(false)),
            integrator: Some(integrator),
            tick_interval: DEFAULT_TICK_INTERVAL,
            clock: ClockState::Idle,
            worker: None,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn clock_state(&self) -> ClockState {
        self.clock
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Scheme of the integrator, None once it has moved into the clock thread
    pub fn scheme(&self) -> Option<IntegrationScheme> {
        self.integrator.as_ref().map(|i| i.scheme())
    }

    /// Begin continuous stepping at `time_factor` simulated seconds per real second
    pub fn start(&mut self, time_factor: f64) -> Result<()> {
        if self.clock != ClockState::Idle {
            return Err(SimulationError::ClockNotIdle(self.clock));
        }
        validate_time_factor(time_factor)?;
        let integrator = self
            .integrator
            .take()
            .ok_or(SimulationError::ClockNotIdle(self.clock))?;

        {
            let mut sim = self.state.write();
            sim.time_factor = time_factor;
            sim.prime_accelerations();
            sim.reset_energy_reference();
        }

        *self.is_running.write() = true;
        let state = self.state.clone();
        let is_running = self.is_running.clone();
        let tick_interval = self.tick_interval;

        let spawned = thread::Builder::new()
            .name("gravity-clock".to_string())
            .spawn(move || run_clock_loop(state, is_running, integrator, tick_interval));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.clock = ClockState::Running;
                log::debug!(
                    "Simulation clock started (time factor {}, tick {:?})",
                    time_factor,
                    tick_interval
                );
                Ok(())
            }
            Err(err) => {
                *self.is_running.write() = false;
                self.clock = ClockState::Stopped;
                Err(err.into())
            }
        }
    }

    /// Stop the background loop and wait for it to exit
    pub fn stop(&mut self) {
        if self.clock == ClockState::Stopped {
            return;
        }

        *self.is_running.write() = false;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Simulation clock thread panicked");
            }
            log::debug!("Simulation clock stopped");
        }
        self.integrator = None;
        self.clock = ClockState::Stopped;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.write().is_paused = paused;
    }

    pub fn set_time_factor(&self, time_factor: f64) -> Result<()> {
        validate_time_factor(time_factor)?;
        self.state.write().time_factor = time_factor;
        Ok(())
    }

    pub fn reader(&self) -> SimulationReader {
        SimulationReader {
            state: self.state.clone(),
        }
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        self.state.read().to_snapshot()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&BodyCollection) -> R) -> R {
        f(&self.state.read())
    }

    pub fn health(&self) -> TickHealth {
        self.state.read().health.clone()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// TESTS
// =============================================================================
