use gravity_engine::{
    compute_accelerations, Body, BodyCollection, BodyKind, ClockState, IntegrationScheme,
    Integrator, JerkAwareIntegrator, Simulation, SimulationConfig, SimulationError, Vector2,
};

use chrono::{DateTime, TimeZone, Utc};
use std::thread;
use std::time::{Duration, Instant};

/// Fast tick so the clock tests only need to wait a few tens of ms
const TEST_TICK: Duration = Duration::from_millis(2);

/// Generous bound for the clock thread to make progress; the first panic
/// in a process can spend a long time capturing a backtrace
const PROGRESS_DEADLINE: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds, failing the test at the deadline
fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + PROGRESS_DEADLINE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap()
}

/// Earth-Luna simulation with a short tick interval, not yet started
fn earth_moon_sim(scheme: IntegrationScheme) -> Simulation {
    Simulation::new(BodyCollection::earth_moon(epoch()), scheme).with_tick_interval(TEST_TICK)
}

fn luna_distance(collection: &BodyCollection) -> f64 {
    let earth = collection.find("Earth").unwrap();
    let luna = collection.find("Luna").unwrap();
    luna.position.sub(&earth.position).magnitude()
}

struct PanickingIntegrator;

impl Integrator for PanickingIntegrator {
    fn step(&self, _bodies: &mut [Body], _dt: f64) {
        panic!("numerical fault");
    }

    fn scheme(&self) -> IntegrationScheme {
        IntegrationScheme::Order3
    }
}

// ==================================================================================
// Clock lifecycle
// ==================================================================================

#[test]
fn clock_advances_simulated_date() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    assert_eq!(sim.clock_state(), ClockState::Idle);

    sim.start(1000.0).unwrap();
    assert_eq!(sim.clock_state(), ClockState::Running);

    let reader = sim.reader();
    let mut dates = vec![epoch()];
    for _ in 0..3 {
        let last = *dates.last().unwrap();
        wait_until("the simulated date to advance", || reader.simulated_date() > last);
        dates.push(reader.simulated_date());
    }
    assert!(dates.windows(2).all(|w| w[1] > w[0]));

    let snapshot = sim.snapshot();
    assert!(snapshot.health.completed_ticks > 0);
    assert_eq!(snapshot.health.failed_ticks, 0);
    assert_eq!(snapshot.time_factor, 1000.0);

    sim.stop();
    assert_eq!(sim.clock_state(), ClockState::Stopped);
}

#[test]
fn clock_cannot_start_twice() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    sim.start(10.0).unwrap();

    assert!(matches!(
        sim.start(10.0),
        Err(SimulationError::ClockNotIdle(ClockState::Running))
    ));

    sim.stop();
    assert!(matches!(
        sim.start(10.0),
        Err(SimulationError::ClockNotIdle(ClockState::Stopped))
    ));
}

#[test]
fn stop_freezes_simulated_time() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    sim.start(1000.0).unwrap();
    wait_until("the first tick", || sim.snapshot().simulated_date > epoch());

    sim.stop();
    let frozen = sim.snapshot();
    thread::sleep(Duration::from_millis(20));
    let later = sim.snapshot();

    assert!(frozen.simulated_date > epoch());
    assert_eq!(frozen.simulated_date, later.simulated_date);
    assert_eq!(frozen.bodies, later.bodies);

    // idempotent
    sim.stop();
    assert_eq!(sim.clock_state(), ClockState::Stopped);
}

#[test]
fn dropping_simulation_stops_clock() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    sim.start(1000.0).unwrap();
    let reader = sim.reader();
    wait_until("the first tick", || reader.simulated_date() > epoch());

    drop(sim);
    let frozen = reader.simulated_date();
    thread::sleep(Duration::from_millis(20));

    assert_eq!(reader.simulated_date(), frozen);
}

#[test]
fn pause_and_resume() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    sim.start(1000.0).unwrap();
    wait_until("the first tick", || sim.snapshot().simulated_date > epoch());

    sim.set_paused(true);
    let paused_at = sim.snapshot();
    thread::sleep(Duration::from_millis(30));
    let still_paused = sim.snapshot();
    assert!(still_paused.is_paused);
    assert_eq!(paused_at.simulated_date, still_paused.simulated_date);
    assert_eq!(paused_at.bodies, still_paused.bodies);

    sim.set_paused(false);
    wait_until("the clock to resume", || {
        sim.snapshot().simulated_date > still_paused.simulated_date
    });
}

#[test]
fn time_factor_can_change_while_running() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order2);
    sim.start(1.0).unwrap();

    assert!(matches!(
        sim.set_time_factor(-5.0),
        Err(SimulationError::InvalidTimeFactor(_))
    ));
    sim.set_time_factor(5000.0).unwrap();
    assert_eq!(sim.snapshot().time_factor, 5000.0);
}

// ==================================================================================
// Failure handling
// ==================================================================================

#[test]
fn failing_ticks_do_not_stop_the_loop() {
    let mut sim = Simulation::with_integrator(
        BodyCollection::earth_moon(epoch()),
        Box::new(PanickingIntegrator),
    )
    .with_tick_interval(TEST_TICK);
    let initial = sim.snapshot();

    sim.start(1000.0).unwrap();
    wait_until("a failed tick", || sim.health().failed_ticks >= 1);
    let early = sim.health();
    wait_until("another failed tick", || sim.health().failed_ticks > early.failed_ticks);
    let late = sim.health();

    assert_eq!(late.completed_ticks, 0);
    assert!(late.last_failure.unwrap().contains("numerical fault"));

    // discarded ticks never reach the shared state
    let snapshot = sim.snapshot();
    assert_eq!(snapshot.simulated_date, epoch());
    assert_eq!(snapshot.bodies, initial.bodies);
    assert_eq!(sim.clock_state(), ClockState::Running);
}

// ==================================================================================
// Readers
// ==================================================================================

#[test]
fn concurrent_readers_see_whole_steps() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    sim.start(10_000.0).unwrap();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let reader = sim.reader();
            thread::spawn(move || {
                let mut last = reader.simulated_date();
                for _ in 0..200 {
                    let snapshot = reader.snapshot();
                    assert_eq!(snapshot.bodies.len(), 2);
                    assert!(snapshot
                        .bodies
                        .iter()
                        .all(|b| b.position.iter().chain(b.velocity.iter()).all(|v| v.is_finite())));
                    assert!(snapshot.simulated_date >= last);
                    last = snapshot.simulated_date;
                    thread::sleep(Duration::from_micros(200));
                }
            })
        })
        .collect();

    for handle in readers {
        handle.join().unwrap();
    }
    sim.stop();
}

#[test]
fn running_orbit_stays_bound() {
    let mut sim = earth_moon_sim(IntegrationScheme::Order3);
    let initial = sim.with_state(luna_distance);

    sim.start(10_000.0).unwrap();
    wait_until("some simulated time", || sim.with_state(|c| c.elapsed_seconds > 0.0));
    thread::sleep(Duration::from_millis(100));
    sim.stop();

    let (distance, elapsed) = sim.with_state(|c| (luna_distance(c), c.elapsed_seconds));
    assert!(elapsed > 0.0);
    assert!((distance - initial).abs() / initial < 0.01, "distance {}", distance);
    assert!(sim.snapshot().energy_drift < 0.01);
}

// ==================================================================================
// Physics through the public API
// ==================================================================================

#[test]
fn colinear_bodies_with_massless_member() {
    let mut collection = BodyCollection::new(epoch());
    collection.add_body(Body::new("M", 1.0e30, BodyKind::Star));
    collection.add_body(Body::new("m", 1.0e26, BodyKind::Planet).with_position(Vector2::new(5.0e9, 0.0)));
    collection.add_body(Body::new("zero", 0.0, BodyKind::Moon).with_position(Vector2::new(-5.0e9, 0.0)));

    let acc = compute_accelerations(&collection.bodies);

    // pulled toward +x by both
    assert!(acc[2].x > 0.0);
    assert_eq!(acc[2].y, 0.0);

    // M and m only feel each other
    let pair = compute_accelerations(&collection.bodies[..2]);
    assert_eq!(acc[0], pair[0]);
    assert_eq!(acc[1], pair[1]);
}

#[test]
fn satellite_of_moving_parent_stays_with_parent() {
    let mut collection = BodyCollection::new(epoch());
    collection.add_body(Body::new("Sun", 1.989e33, BodyKind::Star));
    collection
        .add_orbiting(Body::earth(), "Sun", Vector2::new(1.496e11, 0.0))
        .unwrap();
    collection
        .add_orbiting(Body::luna(), "Earth", Vector2::new(0.0, 385_000_600.0))
        .unwrap();
    collection.prime_accelerations();
    let initial = luna_distance(&collection);

    // about a tenth of a lunar month
    let integrator = JerkAwareIntegrator::new();
    integrator.integrate(&mut collection.bodies, 60.0, 4_000);

    let error = (luna_distance(&collection) - initial).abs() / initial;
    assert!(error < 0.05, "radius error: {:.2e}", error);
}

// ==================================================================================
// Configuration
// ==================================================================================

#[test]
fn config_builds_and_runs() {
    let config = SimulationConfig::from_json(
        r#"{
            "time_factor": 5000.0,
            "tick_interval_ms": 2,
            "scheme": "order2",
            "start_date": "2000-01-01T12:00:00Z"
        }"#,
    )
    .unwrap();

    let mut sim = config.build_simulation().unwrap();
    assert_eq!(sim.scheme(), Some(IntegrationScheme::Order2));
    sim.start(config.time_factor).unwrap();
    wait_until("the first tick", || sim.snapshot().simulated_date > epoch());

    let snapshot = sim.snapshot();
    assert_eq!(snapshot.bodies[0].name, "Earth");
    assert_eq!(snapshot.bodies[1].name, "Luna");
    assert!(snapshot.simulated_date > epoch());
    assert_eq!(snapshot.start_date, epoch());

    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"kind\":\"moon\""));
}

#[test]
fn run_from_env_starts_default_catalog() {
    // the host, not the library, decides whether `.env` is read
    dotenv::dotenv().ok();
    let mut sim = gravity_engine::run_from_env().unwrap();
    assert_eq!(sim.clock_state(), ClockState::Running);
    assert!(sim.with_state(|c| c.find("Luna").is_some()));
    sim.stop();
}
