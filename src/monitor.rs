//! Monitors recording per-step observables of a population.
//!
//! A [`Monitor`] is bound to one population and appends exactly one record
//! per simulation step: either the values of a state variable for the
//! recorded entities, or the indices of the entities whose threshold event
//! fired. Recordings can be saved to and loaded from JSON files.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use itertools::izip;
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::metrics;
use crate::population::Population;

/// What a monitor records at each step.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum Probe {
    /// The per-entity values of a state variable.
    Variable(String),
    /// The indices of entities whose threshold event fired.
    Spikes,
}

impl Probe {
    /// Create a variable probe for the given state variable.
    pub fn variable(name: &str) -> Self {
        Probe::Variable(name.to_string())
    }
}

// Append-only per-step buffers, one shape per probe kind.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
enum Records {
    Values(Vec<Vec<f64>>),
    Spikes(Vec<Vec<usize>>),
}

/// A recording of one observable of one population.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Monitor {
    probe: Probe,
    // Resolved column index for variable probes.
    column: Option<usize>,
    // Recorded entity indices; None records the whole population.
    entities: Option<Vec<usize>>,
    num_recorded: usize,
    times: Vec<f64>,
    records: Records,
}

impl Monitor {
    /// Bind a probe to a population, optionally restricted to a subset of entities.
    /// Fails for unknown variable names or out-of-range entity indices.
    pub(crate) fn bind(
        probe: Probe,
        entities: Option<Vec<usize>>,
        population: &Population,
    ) -> Result<Self, SimulationError> {
        let column = match &probe {
            Probe::Variable(name) => Some(population.model().index_of(name)?),
            Probe::Spikes => None,
        };
        if let Some(indices) = &entities {
            for &index in indices {
                if index >= population.num_entities() {
                    return Err(SimulationError::InvalidConfiguration(format!(
                        "monitored entity index {} is out of range for a population of {} entities",
                        index,
                        population.num_entities()
                    )));
                }
            }
        }
        let num_recorded = match &entities {
            Some(indices) => indices.len(),
            None => population.num_entities(),
        };
        let records = match &probe {
            Probe::Variable(_) => Records::Values(vec![]),
            Probe::Spikes => Records::Spikes(vec![]),
        };
        Ok(Monitor {
            probe,
            column,
            entities,
            num_recorded,
            times: vec![],
            records,
        })
    }

    /// Append the record for the step at the given time. Called once per
    /// simulation step, after the update routine committed the new state.
    pub(crate) fn record(
        &mut self,
        time: f64,
        population: &Population,
    ) -> Result<(), SimulationError> {
        self.times
            .try_reserve(1)
            .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
        match &mut self.records {
            Records::Values(rows) => {
                let column = population.state().column(
                    self.column
                        .expect("variable monitors always carry a resolved column"),
                );
                let row = match &self.entities {
                    Some(indices) => indices.iter().map(|&index| column[index]).collect(),
                    None => column.to_vec(),
                };
                rows.try_reserve(1)
                    .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
                rows.push(row);
            }
            Records::Spikes(rows) => {
                let events = population.events();
                let row: Vec<usize> = match &self.entities {
                    Some(indices) => indices
                        .iter()
                        .copied()
                        .filter(|&index| events[index])
                        .collect(),
                    None => events
                        .iter()
                        .enumerate()
                        .filter_map(|(index, fired)| if *fired { Some(index) } else { None })
                        .collect(),
                };
                rows.try_reserve(1)
                    .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
                rows.push(row);
            }
        }
        self.times.push(time);
        Ok(())
    }

    /// Returns the probe of the monitor.
    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    /// Returns the number of recorded steps.
    pub fn num_steps(&self) -> usize {
        self.times.len()
    }

    /// Returns the number of recorded entities.
    pub fn num_recorded(&self) -> usize {
        self.num_recorded
    }

    /// Returns the record times, one per step.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Returns the per-step value rows of a variable monitor.
    pub fn values(&self) -> Option<&[Vec<f64>]> {
        match &self.records {
            Records::Values(rows) => Some(rows),
            Records::Spikes(_) => None,
        }
    }

    /// Returns the per-step firing-entity rows of a spike monitor.
    pub fn spikes(&self) -> Option<&[Vec<usize>]> {
        match &self.records {
            Records::Spikes(rows) => Some(rows),
            Records::Values(_) => None,
        }
    }

    /// Returns the total number of recorded events.
    pub fn num_events(&self) -> usize {
        match &self.records {
            Records::Spikes(rows) => rows.iter().map(|row| row.len()).sum(),
            Records::Values(_) => 0,
        }
    }

    /// Returns the number of recorded events with record time in [start, end).
    pub fn num_events_in(&self, start: f64, end: f64) -> usize {
        match &self.records {
            Records::Spikes(rows) => izip!(self.times.iter(), rows.iter())
                .filter(|(time, _)| **time >= start && **time < end)
                .map(|(_, row)| row.len())
                .sum(),
            Records::Values(_) => 0,
        }
    }

    /// Returns the average firing rate over [start, end), in events per unit
    /// time per recorded entity.
    ///
    /// When the monitor records only a subset of the population, the result
    /// is the subset's rate; it approximates the population rate under the
    /// assumption that activity is evenly distributed across entities, and no
    /// correction is applied for uneven subsets.
    pub fn mean_firing_rate(&self, start: f64, end: f64) -> Result<f64, SimulationError> {
        if !matches!(self.records, Records::Spikes(_)) {
            return Err(SimulationError::InvalidConfiguration(
                "firing rates require a spike monitor".to_string(),
            ));
        }
        metrics::average_firing_rate(self.num_events_in(start, end), self.num_recorded, end - start)
    }

    /// Save the recording to a JSON file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SimulationError> {
        let file = File::create(path).map_err(|e| SimulationError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| SimulationError::IOError(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SimulationError::IOError(e.to_string()))
    }

    /// Load a recording from a JSON file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SimulationError> {
        let file = File::open(path).map_err(|e| SimulationError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| SimulationError::IOError(e.to_string()))
    }
}
