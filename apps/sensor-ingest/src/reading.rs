use chrono::{DateTime, Utc};

/// Readings stamped before this year come from an arm whose clock has not
/// synced yet (it boots near the unix epoch).
pub const MIN_PLAUSIBLE_YEAR: i32 = 2019;

/// One validated sample from a robotic-arm sensor.
///
/// Only the payload codec constructs readings, so every value of this type
/// carries a plausible UTC timestamp and measurements rounded to two decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    arm_id: String,
    rotation: f64,
    temperature: f64,
    force: f64,
    pressure: f64,
}

impl Reading {
    pub(crate) fn new(
        timestamp: DateTime<Utc>,
        arm_id: String,
        rotation: f64,
        temperature: f64,
        force: f64,
        pressure: f64,
    ) -> Self {
        Self {
            timestamp,
            arm_id,
            rotation,
            temperature,
            force,
            pressure,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn arm_id(&self) -> &str {
        &self.arm_id
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn force(&self) -> f64 {
        self.force
    }

    pub fn pressure(&self) -> f64 {
        self.pressure
    }

    /// Row rendered in `sensor_data` column order, for logs. Never executed.
    pub fn values_literal(&self) -> String {
        format!(
            "('{}', '{}', {:.2}, {:.2}, {:.2}, {:.2})",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.arm_id,
            self.force,
            self.temperature,
            self.pressure,
            self.rotation
        )
    }
}
