//! The simulation scheduler.
//!
//! A [`Simulation`] owns the clock, the seeded random number generator, the
//! registered populations, inputs and monitors, and drives them through a
//! deterministic per-step pipeline: input injection, one update-routine call
//! per population (in registration order), one record per monitor. Steps are
//! strictly sequential; any error halts the run at the failing step index
//! with no retry or rollback.
use std::time::Instant;

use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::input::Waveform;
use crate::metrics;
use crate::monitor::{Monitor, Probe};
use crate::population::Population;

/// Lifecycle of a simulation.
#[derive(Debug, PartialEq, Clone)]
pub enum SimulationStatus {
    /// No step has been executed yet.
    Idle,
    /// Steps are being executed (or a manual stepping sequence is in progress).
    Running,
    /// The last run request finished all its steps.
    Completed,
    /// A step failed; the index of the failing step is recorded and the
    /// simulation refuses further stepping. State containers and monitor
    /// buffers remain valid and inspectable.
    Failed { step: usize },
}

/// Statistics of one completed run request.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Number of steps executed by this run request.
    pub steps: usize,
    /// Simulated time covered by this run request.
    pub duration: f64,
    /// Wall-clock seconds spent preparing the run.
    pub setup_seconds: f64,
    /// Wall-clock seconds spent stepping.
    pub stepping_seconds: f64,
    /// Number of threshold events per population, in registration order.
    pub event_counts: Vec<usize>,
    /// Average event rate per population over this run request, in events
    /// per unit time per entity, in registration order.
    pub mean_rates: Vec<f64>,
}

// An input waveform bound to a population and a resolved column.
struct BoundInput {
    population: usize,
    column: usize,
    waveform: Waveform,
}

// A monitor bound to a population.
struct BoundMonitor {
    population: usize,
    monitor: Monitor,
}

/// A scheduled simulation over one or more populations.
pub struct Simulation {
    dt: f64,
    // Current step index; time = step * dt.
    step: usize,
    status: SimulationStatus,
    rng: ChaCha8Rng,
    populations: Vec<Population>,
    inputs: Vec<BoundInput>,
    monitors: Vec<BoundMonitor>,
    // Scratch for the per-population injections of one step.
    injections: Vec<(usize, f64)>,
}

impl Simulation {
    /// Create a simulation with the given time step and random seed.
    /// The seed fully determines the Wiener increments of the run: identical
    /// seeds, models and inputs reproduce identical trajectories.
    pub fn new(dt: f64, seed: u64) -> Result<Self, SimulationError> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(SimulationError::InvalidConfiguration(format!(
                "time step must be positive and finite, got {}",
                dt
            )));
        }
        Ok(Simulation {
            dt,
            step: 0,
            status: SimulationStatus::Idle,
            rng: ChaCha8Rng::seed_from_u64(seed),
            populations: vec![],
            inputs: vec![],
            monitors: vec![],
            injections: vec![],
        })
    }

    /// Returns the time step.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Returns the current step index.
    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.step as f64 * self.dt
    }

    /// Returns the simulation status.
    pub fn status(&self) -> &SimulationStatus {
        &self.status
    }

    /// Register a population; returns its handle.
    /// Populations are updated in registration order at every step.
    pub fn add_population(&mut self, population: Population) -> usize {
        self.populations.push(population);
        self.populations.len() - 1
    }

    /// Returns a registered population.
    pub fn population(&self, id: usize) -> Option<&Population> {
        self.populations.get(id)
    }

    /// Returns the number of registered populations.
    pub fn num_populations(&self) -> usize {
        self.populations.len()
    }

    /// Arrange for the waveform's value to be added to the given state
    /// variable of the population during the input-accumulation phase of
    /// every matching step.
    pub fn add_input(
        &mut self,
        population: usize,
        variable: &str,
        waveform: Waveform,
    ) -> Result<(), SimulationError> {
        let target = self.populations.get(population).ok_or_else(|| {
            SimulationError::InvalidConfiguration(format!("unknown population {}", population))
        })?;
        let column = target.model().index_of(variable)?;
        self.inputs.push(BoundInput {
            population,
            column,
            waveform,
        });
        Ok(())
    }

    /// Register a monitor over the whole population; returns its handle.
    pub fn add_monitor(
        &mut self,
        population: usize,
        probe: Probe,
    ) -> Result<usize, SimulationError> {
        self.bind_monitor(population, probe, None)
    }

    /// Register a monitor restricted to a subset of entity indices; returns its handle.
    pub fn add_partial_monitor(
        &mut self,
        population: usize,
        probe: Probe,
        entities: Vec<usize>,
    ) -> Result<usize, SimulationError> {
        self.bind_monitor(population, probe, Some(entities))
    }

    fn bind_monitor(
        &mut self,
        population: usize,
        probe: Probe,
        entities: Option<Vec<usize>>,
    ) -> Result<usize, SimulationError> {
        let target = self.populations.get(population).ok_or_else(|| {
            SimulationError::InvalidConfiguration(format!("unknown population {}", population))
        })?;
        let monitor = Monitor::bind(probe, entities, target)?;
        self.monitors.push(BoundMonitor {
            population,
            monitor,
        });
        Ok(self.monitors.len() - 1)
    }

    /// Returns a registered monitor and its recording.
    pub fn monitor(&self, id: usize) -> Option<&Monitor> {
        self.monitors.get(id).map(|bound| &bound.monitor)
    }

    /// Execute a single step. Public so a caller can abort a long simulation
    /// between steps; all containers and monitors stay inspectable. A failed
    /// simulation refuses further stepping.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        if let SimulationStatus::Failed { step } = self.status {
            return Err(SimulationError::InvalidConfiguration(format!(
                "cannot step a simulation that failed at step {}",
                step
            )));
        }
        self.status = SimulationStatus::Running;
        match self.step_once() {
            Ok(()) => Ok(()),
            Err(error) => {
                self.status = SimulationStatus::Failed { step: self.step };
                Err(error)
            }
        }
    }

    // The per-step pipeline: (a) inputs, (b) update routines, (c) monitors.
    fn step_once(&mut self) -> Result<(), SimulationError> {
        let step = self.step;
        let time = step as f64 * self.dt;

        for (id, population) in self.populations.iter_mut().enumerate() {
            self.injections.clear();
            for input in &self.inputs {
                if input.population == id {
                    if let Some(value) = input.waveform.value_at(step, time) {
                        self.injections.push((input.column, value));
                    }
                }
            }
            population.step(&self.injections, step, time, self.dt, &mut self.rng)?;
        }

        for bound in self.monitors.iter_mut() {
            bound
                .monitor
                .record(time, &self.populations[bound.population])?;
        }

        self.step += 1;
        Ok(())
    }

    /// Run for the given number of steps.
    ///
    /// Returns the run statistics, or the first error together with a
    /// `Failed` status carrying the failing step index. Zero steps is a legal
    /// degenerate run that completes immediately.
    pub fn run_steps(&mut self, num_steps: usize) -> Result<RunReport, SimulationError> {
        let setup_start = Instant::now();
        if let SimulationStatus::Failed { step } = self.status {
            return Err(SimulationError::InvalidConfiguration(format!(
                "cannot resume a simulation that failed at step {}",
                step
            )));
        }

        let mut event_counts = vec![0usize; self.populations.len()];
        let log_every = (num_steps / 100).max(1);
        let setup_seconds = setup_start.elapsed().as_secs_f64();

        log::info!(
            "Starting simulation of {} steps (dt = {}) from step {}",
            num_steps,
            self.dt,
            self.step
        );
        let stepping_start = Instant::now();
        self.status = SimulationStatus::Running;
        for k in 0..num_steps {
            if let Err(error) = self.step_once() {
                self.status = SimulationStatus::Failed { step: self.step };
                log::error!("Simulation failed at step {}: {}", self.step, error);
                return Err(error);
            }
            for (count, population) in event_counts.iter_mut().zip(self.populations.iter()) {
                *count += population.num_events();
            }
            if (k + 1) % log_every == 0 {
                log::info!(
                    "Simulated {}/{} steps (t = {:.3})",
                    k + 1,
                    num_steps,
                    self.time()
                );
            }
        }
        let stepping_seconds = stepping_start.elapsed().as_secs_f64();
        self.status = SimulationStatus::Completed;

        let duration = num_steps as f64 * self.dt;
        let mean_rates = match num_steps {
            0 => vec![0.0; self.populations.len()],
            _ => event_counts
                .iter()
                .zip(self.populations.iter())
                .map(|(&count, population)| {
                    metrics::average_firing_rate(count, population.num_entities(), duration)
                })
                .collect::<Result<Vec<f64>, SimulationError>>()?,
        };
        log::info!(
            "Simulation completed: {} steps in {:.3} s",
            num_steps,
            stepping_seconds
        );

        Ok(RunReport {
            steps: num_steps,
            duration,
            setup_seconds,
            stepping_seconds,
            event_counts,
            mean_rates,
        })
    }

    /// Run for the given simulated duration (in continuous time units).
    /// The duration is converted to the nearest whole number of steps and
    /// must cover at least one step.
    pub fn run(&mut self, duration: f64) -> Result<RunReport, SimulationError> {
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(SimulationError::InvalidConfiguration(format!(
                "run duration must be positive and finite, got {}",
                duration
            )));
        }
        let num_steps = (duration / self.dt).round() as usize;
        if num_steps == 0 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "run duration {} is shorter than half a time step (dt = {})",
                duration, self.dt
            )));
        }
        self.run_steps(num_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::Equation;
    use crate::model::{Model, Threshold};
    use std::sync::Arc;

    fn decay_model() -> Arc<Model> {
        Arc::new(
            Model::builder("decay")
                .state("v", 1.0)
                .equation(Equation::new("v", |v, _t, _deps| -v))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_rejects_non_positive_dt() {
        assert!(matches!(
            Simulation::new(0.0, 0),
            Err(SimulationError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Simulation::new(-0.1, 0),
            Err(SimulationError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Simulation::new(f64::NAN, 0),
            Err(SimulationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let mut sim = Simulation::new(0.1, 0).unwrap();
        assert!(sim.run(0.0).is_err());
        assert!(sim.run(-1.0).is_err());
        assert!(sim.run(f64::INFINITY).is_err());
        // Shorter than half a step.
        assert!(sim.run(0.04).is_err());
        assert_eq!(sim.status(), &SimulationStatus::Idle);
    }

    #[test]
    fn test_zero_step_run_completes_immediately() {
        let mut sim = Simulation::new(0.1, 0).unwrap();
        let pop = sim.add_population(Population::new(decay_model(), 1).unwrap());
        let mon = sim.add_monitor(pop, Probe::variable("v")).unwrap();

        let report = sim.run_steps(0).unwrap();
        assert_eq!(report.steps, 0);
        assert_eq!(report.event_counts, vec![0]);
        assert_eq!(sim.status(), &SimulationStatus::Completed);
        assert_eq!(sim.monitor(mon).unwrap().num_steps(), 0);
    }

    #[test]
    fn test_monitor_length_equals_step_count() {
        for num_steps in [0usize, 1, 7, 100] {
            let mut sim = Simulation::new(0.1, 0).unwrap();
            let pop = sim.add_population(Population::new(decay_model(), 3).unwrap());
            let mon = sim.add_monitor(pop, Probe::variable("v")).unwrap();
            sim.run_steps(num_steps).unwrap();
            assert_eq!(sim.monitor(mon).unwrap().num_steps(), num_steps);
        }
    }

    #[test]
    fn test_clock_advances_monotonically() {
        let mut sim = Simulation::new(0.5, 0).unwrap();
        sim.add_population(Population::new(decay_model(), 1).unwrap());
        assert_eq!(sim.time(), 0.0);
        sim.step().unwrap();
        assert_eq!(sim.current_step(), 1);
        assert_eq!(sim.time(), 0.5);
        assert_eq!(sim.status(), &SimulationStatus::Running);

        let report = sim.run_steps(3).unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(sim.current_step(), 4);
        assert_eq!(sim.time(), 2.0);
        assert_eq!(sim.status(), &SimulationStatus::Completed);
    }

    #[test]
    fn test_failed_run_reports_step_index_and_refuses_resume() {
        // The drift turns non-finite from t = 0.45 on, i.e., at step 5 of dt = 0.1.
        let model = Arc::new(
            Model::builder("domain")
                .state("v", 0.0)
                .equation(Equation::new("v", |_v, t, _deps| {
                    if t >= 0.45 {
                        f64::NAN
                    } else {
                        1.0
                    }
                }))
                .build()
                .unwrap(),
        );
        let mut sim = Simulation::new(0.1, 0).unwrap();
        let pop = sim.add_population(Population::new(model, 1).unwrap());
        let mon = sim.add_monitor(pop, Probe::variable("v")).unwrap();

        let error = sim.run_steps(100).unwrap_err();
        assert_eq!(
            error,
            SimulationError::NumericEvaluation {
                step: 5,
                variable: "v".to_string()
            }
        );
        assert_eq!(sim.status(), &SimulationStatus::Failed { step: 5 });
        // Five successful steps were recorded before the failure; the
        // buffers remain inspectable.
        assert_eq!(sim.monitor(mon).unwrap().num_steps(), 5);
        assert!(sim.run_steps(1).is_err());
        assert!(sim.step().is_err());
    }

    #[test]
    fn test_unknown_population_and_variable_are_rejected() {
        let mut sim = Simulation::new(0.1, 0).unwrap();
        let pop = sim.add_population(Population::new(decay_model(), 1).unwrap());

        assert!(sim
            .add_input(pop + 1, "v", Waveform::Constant(1.0))
            .is_err());
        assert_eq!(
            sim.add_input(pop, "w", Waveform::Constant(1.0)).unwrap_err(),
            SimulationError::UnknownVariable("w".to_string())
        );
        assert!(sim.add_monitor(pop + 1, Probe::Spikes).is_err());
    }

    #[test]
    fn test_multiple_populations_step_in_registration_order() {
        let mut sim = Simulation::new(0.1, 0).unwrap();
        let first = sim.add_population(Population::new(decay_model(), 2).unwrap());
        let second = sim.add_population(Population::new(decay_model(), 5).unwrap());
        let first_mon = sim.add_monitor(first, Probe::variable("v")).unwrap();
        let second_mon = sim.add_monitor(second, Probe::variable("v")).unwrap();

        let report = sim.run_steps(10).unwrap();
        assert_eq!(report.steps, 10);
        assert_eq!(report.event_counts, vec![0, 0]);
        assert_eq!(sim.monitor(first_mon).unwrap().num_steps(), 10);
        assert_eq!(sim.monitor(second_mon).unwrap().num_steps(), 10);
        assert_eq!(sim.monitor(first_mon).unwrap().values().unwrap()[9].len(), 2);
        assert_eq!(sim.monitor(second_mon).unwrap().values().unwrap()[9].len(), 5);
    }

    #[test]
    fn test_run_report_counts_events_and_rates() {
        // Fires every entity at every step.
        let model = Arc::new(
            Model::builder("spiker")
                .state("v", 0.0)
                .equation(Equation::new("v", |_v, _t, _deps| 10.0))
                .threshold(Threshold::new("v", 1.0).with_reset(0.0))
                .build()
                .unwrap(),
        );
        let mut sim = Simulation::new(0.1, 0).unwrap();
        sim.add_population(Population::new(model, 4).unwrap());

        let report = sim.run_steps(25).unwrap();
        assert_eq!(report.event_counts, vec![100]);
        // 100 events / (4 entities x 2.5 time units) = 10 per unit time.
        assert_eq!(report.mean_rates, vec![10.0]);
        assert_eq!(report.duration, 2.5);
    }
}
