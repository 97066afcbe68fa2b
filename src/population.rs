//! Populations of homogeneous entities driven by a compiled model.
//!
//! A [`Population`] owns a [`StateContainer`] holding one value per entity
//! for every state variable of its model, and runs the per-step update
//! routine: input accumulation, per-equation stepping, domain clamping,
//! threshold-event detection, atomic commit and input reset.
use std::sync::Arc;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::model::Model;

/// Struct-of-arrays state storage: one column per state variable, one entry
/// per entity. Exclusively owned by its population; the update routine
/// borrows it mutably for the duration of one step and no observer ever sees
/// a half-updated container.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct StateContainer {
    columns: Vec<Vec<f64>>,
    num_entities: usize,
}

impl StateContainer {
    /// Create a container by broadcasting the given initial values across all entities.
    pub(crate) fn broadcast(
        initial_values: &[f64],
        num_entities: usize,
    ) -> Result<Self, SimulationError> {
        let mut columns: Vec<Vec<f64>> = Vec::new();
        columns
            .try_reserve_exact(initial_values.len())
            .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
        for &initial_value in initial_values {
            let mut column: Vec<f64> = Vec::new();
            column
                .try_reserve_exact(num_entities)
                .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
            column.resize(num_entities, initial_value);
            columns.push(column);
        }
        Ok(StateContainer {
            columns,
            num_entities,
        })
    }

    /// Returns the values of the variable with the given column index.
    pub fn column(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    pub(crate) fn column_mut(&mut self, index: usize) -> &mut Vec<f64> {
        &mut self.columns[index]
    }

    /// Returns the number of entities.
    pub fn num_entities(&self) -> usize {
        self.num_entities
    }

    /// Returns the number of state variables.
    pub fn num_variables(&self) -> usize {
        self.columns.len()
    }
}

/// A population of homogeneous entities sharing one compiled model.
pub struct Population {
    model: Arc<Model>,
    state: StateContainer,
    // Per-equation staging buffers, reused across steps.
    staged: Vec<Vec<f64>>,
    // Wiener increments for the current step, reused across steps.
    noise: Vec<f64>,
    // Event indicator of the last executed step.
    events: Vec<bool>,
}

impl Population {
    /// Create a population of the given size, pre-filled with the model's
    /// initial values broadcast across all entities.
    pub fn new(model: Arc<Model>, num_entities: usize) -> Result<Self, SimulationError> {
        if num_entities == 0 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "population of model {} must contain at least one entity",
                model.name()
            )));
        }
        let state = StateContainer::broadcast(model.initial_values(), num_entities)?;
        let staged = vec![Vec::new(); model.num_equations()];
        Ok(Population {
            model,
            state,
            staged,
            noise: Vec::new(),
            events: vec![false; num_entities],
        })
    }

    /// Returns the backing model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the number of entities.
    pub fn num_entities(&self) -> usize {
        self.state.num_entities()
    }

    /// Returns the state container.
    pub fn state(&self) -> &StateContainer {
        &self.state
    }

    /// Returns the per-entity values of the given state variable.
    pub fn values(&self, name: &str) -> Result<&[f64], SimulationError> {
        let column = self.model.index_of(name)?;
        Ok(self.state.column(column))
    }

    /// Returns the per-entity event indicator of the last executed step.
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// Returns the number of entities whose event fired at the last executed step.
    pub fn num_events(&self) -> usize {
        self.events.iter().filter(|fired| **fired).count()
    }

    /// Execute the update routine for one step.
    ///
    /// `injections` carries (column, value) pairs accumulated into the state
    /// before stepping; `t` is the time at the start of the step. Wiener
    /// increments are drawn from `rng` sequentially, one draw per entity per
    /// stochastic equation, so trajectories do not depend on the thread count.
    /// On error the committed state is left at its pre-step values (plus the
    /// accumulated input) and remains inspectable.
    pub(crate) fn step(
        &mut self,
        injections: &[(usize, f64)],
        step: usize,
        t: f64,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), SimulationError> {
        let model = Arc::clone(&self.model);
        let num_entities = self.state.num_entities();

        // 1. Input accumulation.
        for &(column, value) in injections {
            for entry in self.state.column_mut(column).iter_mut() {
                *entry += value;
            }
        }

        // 2. Per-equation stepping, in declaration order, into staging buffers.
        // Committed values are untouched: synchronous semantics unless an
        // equation explicitly declared a fresh dependency.
        let mut staged = std::mem::take(&mut self.staged);
        for (stage, stepper) in model.steppers().iter().enumerate() {
            let noise = match stepper.is_stochastic() {
                true => {
                    self.noise.resize(num_entities, 0.0);
                    for draw in self.noise.iter_mut() {
                        *draw = rng.sample(StandardNormal);
                    }
                    Some(self.noise.as_slice())
                }
                false => None,
            };
            let mut out = std::mem::take(&mut staged[stage]);
            let result = stepper.advance(&self.state, &staged[..stage], t, dt, noise, step, &mut out);
            staged[stage] = out;
            if let Err(error) = result {
                self.staged = staged;
                return Err(error);
            }
        }

        // 3. Domain clamping.
        for (stage, stepper) in model.steppers().iter().enumerate() {
            if let Some((lower, upper)) = stepper.bounds() {
                for value in staged[stage].iter_mut() {
                    *value = value.clamp(lower, upper);
                }
            }
        }

        // 4. Event detection: committed value below the level and fresh value
        // at or above it. The reset, if declared, applies to the fresh value.
        self.events.clear();
        self.events.resize(num_entities, false);
        if let Some(threshold) = model.compiled_threshold() {
            let previous = self.state.column(threshold.column);
            let fresh = &mut staged[threshold.stage];
            for (event, (previous_value, fresh_value)) in self
                .events
                .iter_mut()
                .zip(previous.iter().zip(fresh.iter_mut()))
            {
                if *previous_value < threshold.level && *fresh_value >= threshold.level {
                    *event = true;
                    if let Some(reset) = threshold.reset {
                        *fresh_value = reset;
                    }
                }
            }
        }

        // 5. Commit.
        for (stage, stepper) in model.steppers().iter().enumerate() {
            std::mem::swap(self.state.column_mut(stepper.target()), &mut staged[stage]);
        }
        if let Some(threshold) = model.compiled_threshold() {
            if let Some(flag_column) = threshold.flag_column {
                for (flag, event) in self
                    .state
                    .column_mut(flag_column)
                    .iter_mut()
                    .zip(self.events.iter())
                {
                    *flag = if *event { 1.0 } else { 0.0 };
                }
            }
        }

        // 6. Input reset.
        if let Some(input_column) = model.input_column() {
            for entry in self.state.column_mut(input_column).iter_mut() {
                *entry = 0.0;
            }
        }

        self.staged = staged;
        Ok(())
    }
}

impl std::fmt::Debug for Population {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Population")
            .field("model", &self.model.name())
            .field("num_entities", &self.num_entities())
            .finish()
    }
}
