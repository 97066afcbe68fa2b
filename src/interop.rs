//! Plain-data exchange values for driving external network simulators.
//!
//! Benchmark and interoperability scripts exchange population sizes,
//! connectivity rules, per-synapse defaults and aggregate firing rates with
//! third-party simulators. Only plain numeric values cross that boundary; no
//! internal simulator state is shared. Everything here serializes to JSON.
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::metrics;

/// Size descriptor of one population.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationInfo {
    pub name: String,
    pub size: usize,
}

/// A pairwise connectivity rule between two populations.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ConnectionRule {
    /// Every source entity connects to every target entity.
    AllToAll,
    /// Every target entity receives exactly this many connections.
    FixedInDegree(usize),
    /// Every source entity sends exactly this many connections.
    FixedOutDegree(usize),
}

/// Default weight and delay applied to every synapse of a projection.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SynapseDefaults {
    pub weight: f64,
    pub delay: f64,
}

/// Aggregate firing-rate output for one population over an observation window.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RateSummary {
    pub population: String,
    pub num_events: usize,
    pub num_entities: usize,
    pub window: f64,
    /// Events per unit time per entity; an approximation when `num_entities`
    /// is an estimate of the recorded count.
    pub rate: f64,
}

impl RateSummary {
    /// Summarize an event count over an observation window.
    pub fn new(
        population: &str,
        num_events: usize,
        num_entities: usize,
        window: f64,
    ) -> Result<Self, SimulationError> {
        let rate = metrics::average_firing_rate(num_events, num_entities, window)?;
        Ok(RateSummary {
            population: population.to_string(),
            num_events,
            num_entities,
            window,
            rate,
        })
    }
}
