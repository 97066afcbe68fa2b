//! This crate provides tools for simulating populations of dynamical-system
//! models (spiking neuron models) declared as ordinary or stochastic
//! differential equations.
//!
//! A model is declared as named state variables plus differential-equation
//! rules; the declarations are compiled once into vectorized per-step update
//! routines (fixed-step stochastic Euler–Maruyama) and driven across discrete
//! time steps by a scheduler that injects external inputs and records
//! observables.
//!
//! # Declaring and compiling a model
//!
//! ```rust
//! use rusty_dyn::equation::Equation;
//! use rusty_dyn::model::{Model, Threshold};
//!
//! // A leaky integrate-and-fire membrane driven by an external current.
//! let model = Model::builder("lif")
//!     .state("v", -60.0)
//!     .state("spike", 0.0)
//!     .state("input", 0.0)
//!     .input_variable("input")
//!     .equation(
//!         Equation::new("v", |v, _t, deps| (-74.0 - v + deps[0]) / 10.0).depends_on("input"),
//!     )
//!     .threshold(Threshold::new("v", -54.0).with_reset(-60.0).with_flag("spike"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.variables(), &["v", "spike", "input"]);
//! ```
//!
//! # Running a simulation
//!
//! ```rust
//! use std::sync::Arc;
//! use rusty_dyn::equation::Equation;
//! use rusty_dyn::input::Waveform;
//! use rusty_dyn::model::{Model, Threshold};
//! use rusty_dyn::monitor::Probe;
//! use rusty_dyn::population::Population;
//! use rusty_dyn::scheduler::Simulation;
//! use rusty_dyn::DEFAULT_DT;
//!
//! let model = Arc::new(
//!     Model::builder("lif")
//!         .state("v", -60.0)
//!         .state("spike", 0.0)
//!         .state("input", 0.0)
//!         .input_variable("input")
//!         .equation(
//!             Equation::new("v", |v, _t, deps| (-74.0 - v + deps[0]) / 10.0).depends_on("input"),
//!         )
//!         .threshold(Threshold::new("v", -54.0).with_reset(-60.0).with_flag("spike"))
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut sim = Simulation::new(DEFAULT_DT, 42).unwrap();
//! let pop = sim.add_population(Population::new(model, 100).unwrap());
//! sim.add_input(pop, "input", Waveform::Constant(25.0)).unwrap();
//! let spikes = sim.add_monitor(pop, Probe::Spikes).unwrap();
//!
//! let report = sim.run(100.0).unwrap();
//! assert_eq!(report.steps, 1000);
//! // One record per executed step.
//! assert_eq!(sim.monitor(spikes).unwrap().num_steps(), 1000);
//! // The constant drive holds the membrane above threshold, so the
//! // population fires periodically.
//! assert!(report.event_counts[0] > 0);
//! ```
//!
//! # Stochastic dynamics
//!
//! A diffusion term turns an equation into a stochastic differential
//! equation; the stepper scales it with one standard normal draw per entity
//! per step. Runs are reproducible: identical seeds and inputs give
//! identical trajectories.
//!
//! ```rust
//! use std::sync::Arc;
//! use rusty_dyn::equation::Equation;
//! use rusty_dyn::model::Model;
//! use rusty_dyn::monitor::Probe;
//! use rusty_dyn::population::Population;
//! use rusty_dyn::scheduler::Simulation;
//!
//! let model = Arc::new(
//!     Model::builder("ou")
//!         .state("v", 0.0)
//!         .equation(Equation::stochastic(
//!             "v",
//!             |v, _t, _deps| -v,
//!             |_v, _t, _deps| 0.5,
//!         ))
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut first = Simulation::new(0.1, 7).unwrap();
//! let pop = first.add_population(Population::new(Arc::clone(&model), 10).unwrap());
//! let mon = first.add_monitor(pop, Probe::variable("v")).unwrap();
//! first.run_steps(50).unwrap();
//!
//! let mut second = Simulation::new(0.1, 7).unwrap();
//! let pop = second.add_population(Population::new(model, 10).unwrap());
//! let same = second.add_monitor(pop, Probe::variable("v")).unwrap();
//! second.run_steps(50).unwrap();
//!
//! assert_eq!(
//!     first.monitor(mon).unwrap().values(),
//!     second.monitor(same).unwrap().values()
//! );
//! ```

pub mod equation;
pub mod error;
pub mod input;
pub mod integrator;
pub mod interop;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod population;
pub mod scheduler;

/// The default integration time step.
pub const DEFAULT_DT: f64 = 0.1;
