// Gravity - Newtonian N-Body Simulation Core
// Bodies, orbit setup, pairwise gravity, Taylor integrators and the real-time clock

pub mod config;
pub mod error;
pub mod physics_engine;
pub mod state_manager;

pub use config::{BodyConfig, OrbitConfig, SimulationConfig};
pub use error::{Result, SimulationError, TickError};
pub use physics_engine::{
    apply_accelerations, calculate_angular_momentum, calculate_total_energy, circular_orbit,
    circular_orbit_speed, compute_accelerations, init_orbit_around_parent, Body, BodyKind,
    IntegrationScheme, Integrator, JerkAwareIntegrator, OrbitAnchor, SecondOrderIntegrator, Shape,
    StateVector, Vector2, G, MASS_UNITS_PER_KG,
};
pub use state_manager::{
    BodyCollection, BodySnapshot, ClockState, Simulation, SimulationReader, SimulationSnapshot,
    TickHealth, TickOutcome,
};

/// Build the default simulation with `GRAVITY_*` overrides from the process
/// environment and start it
pub fn run_from_env() -> Result<Simulation> {
    let config = SimulationConfig::default().with_env_overrides()?;
    let mut simulation = config.build_simulation()?;
    simulation.start(config.time_factor)?;
    Ok(simulation)
}
