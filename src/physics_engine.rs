// Physics Engine - Newtonian N-Body Gravity
// Implements the body model, orbit initialization, pairwise gravity and the
// order-2 / jerk-aware order-3 Taylor integrators

use serde::{Deserialize, Serialize};

// =============================================================================
// PHYSICAL CONSTANTS
// =============================================================================

/// Gravitational constant (m³/(kg·s²))
pub const G: f64 = 6.674e-11;

/// Body masses are stored in grams; gravity formulas expect kilograms
pub const MASS_UNITS_PER_KG: f64 = 1000.0;

/// Earth mass in the engine mass unit (g)
pub const MASS_EARTH: f64 = 5.972e27;

/// Earth's mean radius (m)
pub const R_EARTH: f64 = 6.371e6;

/// Luna mass in the engine mass unit (g)
pub const MASS_LUNA: f64 = 7.35e22;

/// Luna's mean radius (m)
pub const R_LUNA: f64 = 1.7374e6;

/// Earth-Luna separation used by the default catalog (m)
pub const LUNA_DISTANCE: f64 = 385_000_600.0;

/// G * M for a mass in engine units, i.e. with the gram-to-kilogram
/// conversion applied. Every gravity formula goes through this.
pub fn gravitational_parameter(mass: f64) -> f64 {
    G * (mass / MASS_UNITS_PER_KG)
}

// =============================================================================
// 2D VECTOR MATHEMATICS
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn dot(&self, other: &Vector2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z-component of the 3D cross product
    pub fn cross(&self, other: &Vector2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Clockwise quarter turn: (x, y) -> (y, -x)
    pub fn perpendicular(&self) -> Self {
        Self {
            x: self.y,
            y: -self.x,
        }
    }

    pub fn scale(&self, s: f64) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Vector2 {
    fn from(v: [f64; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

// =============================================================================
// STATE VECTOR (Position + Velocity)
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StateVector {
    pub position: Vector2, // meters
    pub velocity: Vector2, // m/s
}

impl StateVector {
    pub fn new(position: Vector2, velocity: Vector2) -> Self {
        Self { position, velocity }
    }

    pub fn zero() -> Self {
        Self {
            position: Vector2::zero(),
            velocity: Vector2::zero(),
        }
    }
}

// =============================================================================
// BODY
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Star,
    Planet,
    Moon,
}

/// Renderable data carried alongside the physics. Gravity never reads it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Shape {
    /// meters
    pub radius: f64,
    /// RGB
    pub color: [u8; 3],
}

impl Shape {
    pub const DEFAULT_COLOR: [u8; 3] = [165, 42, 42];

    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            color: Self::DEFAULT_COLOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Body {
    pub name: String,
    /// grams (see `MASS_UNITS_PER_KG`)
    pub mass: f64,
    pub kind: BodyKind,
    pub position: Vector2,     // m
    pub velocity: Vector2,     // m/s
    pub acceleration: Vector2, // m/s²
    pub jerk: Vector2,         // m/s³
    pub shape: Option<Shape>,
}

impl Body {
    pub fn new(name: impl Into<String>, mass: f64, kind: BodyKind) -> Self {
        Self {
            name: name.into(),
            mass,
            kind,
            position: Vector2::zero(),
            velocity: Vector2::zero(),
            acceleration: Vector2::zero(),
            jerk: Vector2::zero(),
            shape: None,
        }
    }

    pub fn with_position(mut self, position: Vector2) -> Self {
        self.position = position;
        self
    }

    pub fn with_velocity(mut self, velocity: Vector2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn earth() -> Self {
        Self::new("Earth", MASS_EARTH, BodyKind::Planet).with_shape(Shape::new(R_EARTH))
    }

    pub fn luna() -> Self {
        Self::new("Luna", MASS_LUNA, BodyKind::Moon).with_shape(Shape::new(R_LUNA))
    }

    /// Display radius, 0 for bodies without a shape
    pub fn radius(&self) -> f64 {
        self.shape.map_or(0.0, |s| s.radius)
    }

    pub fn state(&self) -> StateVector {
        StateVector::new(self.position, self.velocity)
    }

    /// By-value snapshot of this body for use as an orbit parent
    pub fn anchor(&self) -> OrbitAnchor {
        OrbitAnchor {
            position: self.position,
            velocity: self.velocity,
            mass: self.mass,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.acceleration.is_finite()
            && self.jerk.is_finite()
    }
}

// =============================================================================
// ORBIT INITIALIZATION
// =============================================================================

/// Parent state captured at setup time. Holds no reference to the parent body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrbitAnchor {
    pub position: Vector2,
    pub velocity: Vector2,
    /// grams
    pub mass: f64,
}

/// Circular-orbit speed around a parent of `parent_mass` (g) at `distance` (m)
pub fn circular_orbit_speed(parent_mass: f64, distance: f64) -> f64 {
    (gravitational_parameter(parent_mass) / distance).sqrt()
}

/// Position and velocity for a circular orbit at `offset` from `parent`.
///
/// The velocity is the circular speed along the offset rotated a quarter turn
/// clockwise, plus the parent's own velocity. This is only instantaneously
/// circular: it assumes the parent dominates the mass and does not accelerate
/// much within one period.
///
/// `offset` must be non-zero; a zero offset yields NaN velocity.
pub fn circular_orbit(parent: &OrbitAnchor, offset: Vector2) -> StateVector {
    let distance = offset.magnitude();
    let unit = offset.scale(1.0 / distance);
    let speed = circular_orbit_speed(parent.mass, distance);

    StateVector {
        position: parent.position.add(&offset),
        velocity: unit.perpendicular().scale(speed).add(&parent.velocity),
    }
}

/// Place `body` at `offset` from `parent` with a circular-orbit velocity
pub fn init_orbit_around_parent(body: &mut Body, parent: OrbitAnchor, offset: Vector2) {
    let state = circular_orbit(&parent, offset);
    body.position = state.position;
    body.velocity = state.velocity;
}

// =============================================================================
// GRAVITY FIELD (direct O(n²) summation)
// =============================================================================

/// Acceleration at `subject` due to `source`.
///
/// Coincident positions divide by zero and produce non-finite output.
pub fn acceleration_from(subject: &Vector2, source: &Body) -> Vector2 {
    let r_vec = source.position.sub(subject);
    let r = r_vec.magnitude();
    let accel_mag = gravitational_parameter(source.mass) / (r * r);
    r_vec.scale(1.0 / r).scale(accel_mag)
}

/// Net gravitational acceleration on each body, index-aligned with `bodies`.
///
/// Pairs are skipped by index, so bodies with equal names still attract.
pub fn compute_accelerations(bodies: &[Body]) -> Vec<Vector2> {
    bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            bodies
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .fold(Vector2::zero(), |total, (_, other)| {
                    total.add(&acceleration_from(&body.position, other))
                })
        })
        .collect()
}

/// Overwrite every body's `acceleration` with the current field
pub fn apply_accelerations(bodies: &mut [Body]) {
    let accelerations = compute_accelerations(bodies);
    for (body, a) in bodies.iter_mut().zip(accelerations) {
        body.acceleration = a;
    }
}

// =============================================================================
// INTEGRATORS
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationScheme {
    /// Constant acceleration over the step
    Order2,
    /// Adds a finite-difference jerk term
    #[default]
    Order3,
}

impl IntegrationScheme {
    pub fn integrator(self) -> Box<dyn Integrator> {
        match self {
            IntegrationScheme::Order2 => Box::new(SecondOrderIntegrator::new()),
            IntegrationScheme::Order3 => Box::new(JerkAwareIntegrator::new()),
        }
    }
}

/// Advances every body by one step of `dt` seconds.
///
/// Implementations must treat the body set as one synchronous step: every
/// body's new acceleration is computed before any position moves, and every
/// position moves before any velocity changes. Both schemes are explicit and
/// only stable when `dt` is small relative to the orbital periods involved;
/// large steps grow without bound rather than failing.
pub trait Integrator: Send + Sync {
    fn step(&self, bodies: &mut [Body], dt: f64);

    fn scheme(&self) -> IntegrationScheme;

    /// Run `n_steps` steps of `dt`
    fn integrate(&self, bodies: &mut [Body], dt: f64, n_steps: usize) {
        for _ in 0..n_steps {
            self.step(bodies, dt);
        }
    }
}

/// Second-order Taylor step with acceleration held constant:
///
/// x(t+dt) = x + v*dt + 0.5*a*dt²
/// v(t+dt) = v + a*dt
///
/// `dt = 0` leaves positions and velocities untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecondOrderIntegrator;

impl SecondOrderIntegrator {
    pub fn new() -> Self {
        Self
    }
}

impl Integrator for SecondOrderIntegrator {
    fn step(&self, bodies: &mut [Body], dt: f64) {
        let dt_sq_half = 0.5 * dt * dt;

        apply_accelerations(bodies);

        for body in bodies.iter_mut() {
            body.position = body
                .position
                .add(&body.acceleration.scale(dt_sq_half))
                .add(&body.velocity.scale(dt));
        }

        for body in bodies.iter_mut() {
            body.velocity = body.velocity.add(&body.acceleration.scale(dt));
        }
    }

    fn scheme(&self) -> IntegrationScheme {
        IntegrationScheme::Order2
    }
}

/// Third-order Taylor step with jerk estimated from the change in
/// acceleration since the previous step:
///
/// j = (a_new - a_old) / dt
/// x(t+dt) = x + v*dt + a_old*dt²/2 + j*dt³/6
/// v(t+dt) = v + a_old*dt + j*dt²/2
///
/// then a_old <- a_new. `dt` must be > 0. Bodies should have their
/// acceleration primed (see `apply_accelerations`) before the first step,
/// otherwise the first jerk is measured against zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct JerkAwareIntegrator;

impl JerkAwareIntegrator {
    pub fn new() -> Self {
        Self
    }
}

impl Integrator for JerkAwareIntegrator {
    fn step(&self, bodies: &mut [Body], dt: f64) {
        let dt_sq_half = dt * dt * 0.5;
        let dt_cube_sixth = dt * dt * dt / 6.0;

        let new_accelerations = compute_accelerations(bodies);

        for (body, a_new) in bodies.iter_mut().zip(new_accelerations.iter()) {
            body.jerk = a_new.sub(&body.acceleration).scale(1.0 / dt);
        }

        for body in bodies.iter_mut() {
            body.position = body
                .position
                .add(&body.velocity.scale(dt))
                .add(&body.acceleration.scale(dt_sq_half))
                .add(&body.jerk.scale(dt_cube_sixth));
        }

        for body in bodies.iter_mut() {
            body.velocity = body
                .velocity
                .add(&body.acceleration.scale(dt))
                .add(&body.jerk.scale(dt_sq_half));
        }

        for (body, a_new) in bodies.iter_mut().zip(new_accelerations) {
            body.acceleration = a_new;
        }
    }

    fn scheme(&self) -> IntegrationScheme {
        IntegrationScheme::Order3
    }
}

// =============================================================================
// ENERGY CALCULATIONS (for drift monitoring)
// =============================================================================

/// Total mechanical energy of the system (J)
pub fn calculate_total_energy(bodies: &[Body]) -> f64 {
    let mut kinetic = 0.0;
    let mut potential = 0.0;

    for body in bodies {
        // Kinetic energy: 0.5 * m * v²
        kinetic += 0.5 * (body.mass / MASS_UNITS_PER_KG) * body.velocity.magnitude_squared();
    }

    // Potential energy: -G * m1 * m2 / r for each pair
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let r = bodies[i].position.sub(&bodies[j].position).magnitude();
            if r > 1e-10 {
                potential -= gravitational_parameter(bodies[i].mass)
                    * (bodies[j].mass / MASS_UNITS_PER_KG)
                    / r;
            }
        }
    }

    kinetic + potential
}

/// Total angular momentum about the origin (kg·m²/s, z-component)
pub fn calculate_angular_momentum(bodies: &[Body]) -> f64 {
    bodies
        .iter()
        .map(|b| (b.mass / MASS_UNITS_PER_KG) * b.position.cross(&b.velocity))
        .sum()
}

/// Relative drift of `current` from `initial`, 0 when the reference is ~0
pub fn energy_drift(initial: f64, current: f64) -> f64 {
    if initial.abs() > 1e-20 {
        (current - initial).abs() / initial.abs()
    } else {
        0.0
    }
}

// =============================================================================
// TESTS
// =============================================================================
