//! Fault simulation: periodic sensor corruption and eventual connection
//! death.
//!
//! Each handler draws one base lifetime `T` when it starts. A corruption
//! tick fires every `5 * T` and forces a random sensor into ERROR; a death
//! tick fires once after `15 * T` and kills the connection, so a handler
//! typically corrupts two sensors before it dies.

use crate::registry::{SensorRegistry, SensorState};
use log::{info, warn};
use rand::Rng;
use std::time::Duration;

const CORRUPTION_PERIOD_FACTOR: f64 = 5.0;
const DEATH_DEADLINE_FACTOR: f64 = 15.0;

/// Timing plan for one handler's fault simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultSchedule {
    corruption_period: Duration,
    death_deadline: Duration,
}

impl FaultSchedule {
    /// Draw a schedule, or `None` when fault simulation is disabled.
    ///
    /// The base lifetime is `uniform(0, time_to_live_secs) + 5` seconds.
    pub fn draw(failures_enabled: bool, time_to_live_secs: u64) -> Option<Self> {
        if !failures_enabled || time_to_live_secs == 0 {
            return None;
        }
        let base = rand::thread_rng().gen_range(0.0..time_to_live_secs as f64) + 5.0;
        Some(Self {
            corruption_period: Duration::from_secs_f64(base * CORRUPTION_PERIOD_FACTOR),
            death_deadline: Duration::from_secs_f64(base * DEATH_DEADLINE_FACTOR),
        })
    }

    pub fn corruption_period(&self) -> Duration {
        self.corruption_period
    }

    pub fn death_deadline(&self) -> Duration {
        self.death_deadline
    }
}

/// Force one uniformly-chosen sensor into the ERROR state.
///
/// Expressed as snapshot → transform → replace, so concurrent polls only
/// ever observe a fully-swapped list.
pub fn corrupt_random_sensor(registry: &SensorRegistry) {
    let mut records = registry.snapshot();
    if records.is_empty() {
        warn!("[Faults] corruption tick on an empty registry, nothing to corrupt");
        return;
    }
    let idx = rand::thread_rng().gen_range(0..records.len());
    records[idx].state = SensorState::Error;
    info!(
        "[Faults] forcing sensor {}/{} into ERROR",
        records[idx].kind, records[idx].name
    );
    registry.replace(records);
}
