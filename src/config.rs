// Simulation configuration
// Body catalogs, clock settings and environment overrides supplied by the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Result, SimulationError};
use crate::physics_engine::{
    Body, BodyKind, IntegrationScheme, Shape, Vector2, LUNA_DISTANCE, MASS_EARTH, MASS_LUNA,
    R_EARTH, R_LUNA,
};
use crate::state_manager::{BodyCollection, Simulation};

pub const ENV_TIME_FACTOR: &str = "GRAVITY_TIME_FACTOR";
pub const ENV_TICK_INTERVAL_MS: &str = "GRAVITY_TICK_INTERVAL_MS";
pub const ENV_SCHEME: &str = "GRAVITY_SCHEME";

/// J2000 epoch (2000-01-01 12:00 UTC) as a Unix timestamp
pub const J2000_TIMESTAMP: i64 = 946_728_000;

// =============================================================================
// CONFIG TYPES
// =============================================================================

/// Place a body on a circular orbit around an earlier body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrbitConfig {
    pub parent: String,
    pub offset: [f64; 2], // m, from the parent
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyConfig {
    pub name: String,
    pub mass: f64, // g
    pub kind: BodyKind,
    #[serde(default)]
    pub radius: Option<f64>, // m
    #[serde(default)]
    pub color: Option<[u8; 3]>,
    #[serde(default)]
    pub position: [f64; 2],
    #[serde(default)]
    pub velocity: [f64; 2],
    /// When set, overrides `position` and `velocity`
    #[serde(default)]
    pub orbit: Option<OrbitConfig>,
}

impl BodyConfig {
    fn to_body(&self) -> Body {
        let mut body = Body::new(self.name.clone(), self.mass, self.kind)
            .with_position(self.position.into())
            .with_velocity(self.velocity.into());

        if let Some(radius) = self.radius {
            body = body.with_shape(Shape {
                radius,
                color: self.color.unwrap_or(Shape::DEFAULT_COLOR),
            });
        }
        body
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub time_factor: f64,
    pub tick_interval_ms: u64,
    pub scheme: IntegrationScheme,
    pub start_date: DateTime<Utc>,
    pub bodies: Vec<BodyConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_factor: 1_000_000.0,
            tick_interval_ms: 16,
            scheme: IntegrationScheme::Order3,
            start_date: DateTime::from_timestamp(J2000_TIMESTAMP, 0).unwrap_or_default(),
            bodies: vec![
                BodyConfig {
                    name: "Earth".to_string(),
                    mass: MASS_EARTH,
                    kind: BodyKind::Planet,
                    radius: Some(R_EARTH),
                    color: None,
                    position: [0.0, 0.0],
                    velocity: [0.0, 0.0],
                    orbit: None,
                },
                BodyConfig {
                    name: "Luna".to_string(),
                    mass: MASS_LUNA,
                    kind: BodyKind::Moon,
                    radius: Some(R_LUNA),
                    color: None,
                    position: [0.0, 0.0],
                    velocity: [0.0, 0.0],
                    orbit: Some(OrbitConfig {
                        parent: "Earth".to_string(),
                        offset: [0.0, LUNA_DISTANCE],
                    }),
                },
            ],
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl SimulationConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Apply `GRAVITY_*` overrides from the process environment.
    ///
    /// Files are never read here. A host that keeps its settings in `.env`
    /// loads it first:
    ///
    /// ```no_run
    /// dotenv::dotenv().ok();
    /// let config = gravity_engine::SimulationConfig::default().with_env_overrides()?;
    /// # Ok::<(), gravity_engine::SimulationError>(())
    /// ```
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_TIME_FACTOR) {
            self.time_factor = raw.trim().parse().map_err(|e| {
                SimulationError::InvalidConfig(format!("{}={:?}: {}", ENV_TIME_FACTOR, raw, e))
            })?;
        }
        if let Some(raw) = lookup(ENV_TICK_INTERVAL_MS) {
            self.tick_interval_ms = raw.trim().parse().map_err(|e| {
                SimulationError::InvalidConfig(format!("{}={:?}: {}", ENV_TICK_INTERVAL_MS, raw, e))
            })?;
        }
        if let Some(raw) = lookup(ENV_SCHEME) {
            self.scheme = match raw.trim().to_ascii_lowercase().as_str() {
                "order2" => IntegrationScheme::Order2,
                "order3" => IntegrationScheme::Order3,
                other => {
                    return Err(SimulationError::InvalidConfig(format!(
                        "{}: unknown scheme {:?}",
                        ENV_SCHEME, other
                    )))
                }
            };
        }
        Ok(self)
    }
}

// =============================================================================
// VALIDATION & BUILDING
// =============================================================================

fn invalid(msg: String) -> SimulationError {
    SimulationError::InvalidConfig(msg)
}

impl SimulationConfig {
    /// Reject input the physics would turn into NaN or that the clock cannot run
    pub fn validate(&self) -> Result<()> {
        if !self.time_factor.is_finite() || self.time_factor <= 0.0 {
            return Err(SimulationError::InvalidTimeFactor(self.time_factor));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick interval must be > 0 ms".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for body in &self.bodies {
            if !body.mass.is_finite() || body.mass < 0.0 {
                return Err(invalid(format!("{}: mass must be finite and >= 0", body.name)));
            }
            if let Some(orbit) = &body.orbit {
                if !seen.contains(orbit.parent.as_str()) {
                    return Err(SimulationError::UnknownParent(orbit.parent.clone()));
                }
                let offset = Vector2::from(orbit.offset);
                if !offset.is_finite() || offset.magnitude() == 0.0 {
                    return Err(invalid(format!("{}: orbit offset must be non-zero", body.name)));
                }
            }
            if !seen.insert(body.name.as_str()) {
                log::warn!("Body name {} is used more than once", body.name);
            }
        }
        Ok(())
    }

    /// Validate, then build the collection in catalog order
    pub fn build_collection(&self) -> Result<BodyCollection> {
        self.validate()?;

        let mut collection = BodyCollection::new(self.start_date);
        collection.time_factor = self.time_factor;
        for body_config in &self.bodies {
            let body = body_config.to_body();
            match &body_config.orbit {
                Some(orbit) => {
                    collection.add_orbiting(body, &orbit.parent, orbit.offset.into())?;
                }
                None => {
                    collection.add_body(body);
                }
            }
        }

        // Orbit setup can still leave two bodies on top of each other
        for (i, a) in collection.bodies.iter().enumerate() {
            for b in &collection.bodies[i + 1..] {
                if a.position == b.position {
                    return Err(invalid(format!(
                        "{} and {} start at the same position",
                        a.name, b.name
                    )));
                }
            }
        }

        Ok(collection)
    }

    /// Build an idle simulation ready for `start(self.time_factor)`
    pub fn build_simulation(&self) -> Result<Simulation> {
        let collection = self.build_collection()?;
        Ok(Simulation::new(collection, self.scheme).with_tick_interval(self.tick_interval()))
    }
}

// =============================================================================
// TESTS
// =============================================================================
