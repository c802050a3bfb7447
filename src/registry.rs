//! Shared sensor registry.
//!
//! Holds the process-wide list of simulated sensor records. Every writer
//! (the REST back-channel, the fault-simulation timers, a subscriber seeding
//! the fleet) replaces the list wholesale, so concurrent readers only ever
//! observe a fully-swapped snapshot and no per-record locking is needed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// Operational state of one sensor.
///
/// On the wire this is a bare integer: `1` for ON, `0` for OFF, `-1` for
/// ERROR.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, Serialize, Deserialize,
)]
#[repr(i8)]
#[serde(try_from = "i8", into = "i8")]
pub enum SensorState {
    Error = -1,
    Off = 0,
    On = 1,
}

impl From<SensorState> for i8 {
    fn from(state: SensorState) -> i8 {
        state as i8
    }
}

impl TryFrom<i8> for SensorState {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, String> {
        SensorState::from_repr(value).ok_or_else(|| format!("invalid sensor state: {value}"))
    }
}

/// One simulated sensor.
///
/// Identity is the (type, name) pair; two records are equal only when every
/// field matches, which is what the handler's change detection relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Category of the sensor, e.g. "heatpump".
    #[serde(rename = "type")]
    pub kind: String,
    /// Unique identifier within the type.
    pub name: String,
    pub state: SensorState,
    pub temperature: f64,
}

impl SensorRecord {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        state: SensorState,
        temperature: f64,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            state,
            temperature,
        }
    }
}

/// Shared, wholesale-replaceable list of sensor records.
///
/// Injected into every subscription handler and into the REST back-channel.
/// The API is intentionally two operations: `snapshot` and `replace`. Any
/// mutation is expressed as snapshot → transform → replace, so a poll
/// running in another task can never observe a torn intermediate state.
pub struct SensorRegistry {
    records: RwLock<Vec<SensorRecord>>,
}

impl SensorRegistry {
    pub fn new(initial: Vec<SensorRecord>) -> Self {
        Self {
            records: RwLock::new(initial),
        }
    }

    /// Point-in-time copy of the current records, in registry order.
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.records.read().clone()
    }

    /// Atomically swap in a new record list. Last write wins.
    pub fn replace(&self, records: Vec<SensorRecord>) {
        *self.records.write() = records;
    }
}

/// Development seed fleet used at process start.
pub fn default_fleet() -> Vec<SensorRecord> {
    vec![
        SensorRecord::new("heatpump", "hp-1", SensorState::On, 22.5),
        SensorRecord::new("heatpump", "hp-2", SensorState::Off, 19.0),
        SensorRecord::new("heatpump", "hp-3", SensorState::On, 21.0),
    ]
}
