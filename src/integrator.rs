//! The equation-to-stepper compiler.
//!
//! Compiles [`Equation`](crate::equation::Equation) declarations into
//! [`Stepper`] routines implementing the fixed-step stochastic Euler–Maruyama
//! scheme:
//!
//! ```text
//! V_new = V_old + dt * f(V_old, t, deps) + sqrt(dt) * g(V_old, t, deps) * Z
//! ```
//!
//! with `Z` a standard normal draw per entity per step. The diffusion term is
//! scaled by `sqrt(dt)` (the strong-order-0.5 discretization of a Brownian
//! increment), never by `dt`. Without a diffusion term the scheme reduces to
//! forward Euler. Dependency names are resolved to column indices at compile
//! time, so stepping performs no name lookups.
use std::collections::HashMap;

use rayon::prelude::*;

use crate::equation::{Dep, DerivFn, Equation};
use crate::error::SimulationError;
use crate::population::StateContainer;

/// Minimum number of entities to parallelize the element-wise stepping.
pub const MIN_ENTITIES_PAR: usize = 1000;

// Entities per rayon work item when stepping in parallel.
const PAR_CHUNK: usize = 1024;

/// A resolved dependency of a compiled stepper.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum DepSlot {
    /// Read the committed column with this index.
    Committed(usize),
    /// Read the staged output of the equation with this order index.
    Staged(usize),
}

/// A compiled single-equation stepping routine, closed over the declared
/// drift and diffusion functions. One call advances the target variable of
/// an entire population by one time step.
pub struct Stepper {
    // Column index of the target variable.
    target: usize,
    // Target name, kept for error reporting.
    target_name: String,
    deps: Vec<DepSlot>,
    bounds: Option<(f64, f64)>,
    drift: DerivFn,
    diffusion: Option<DerivFn>,
}

impl Stepper {
    /// Returns the column index of the target variable.
    pub(crate) fn target(&self) -> usize {
        self.target
    }

    /// Returns the declared domain bounds, if any.
    pub(crate) fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    /// Returns true if the stepper consumes Wiener increments.
    pub(crate) fn is_stochastic(&self) -> bool {
        self.diffusion.is_some()
    }

    /// Advance the target variable of the whole population by one step,
    /// writing the new values into `out` without touching the committed state.
    ///
    /// `staged` holds the outputs of the steppers already run within this
    /// step, in equation order; `noise` holds one standard normal draw per
    /// entity and must be present exactly when the equation is stochastic.
    /// The first non-finite result aborts with the step index and the target
    /// variable name; no default is substituted.
    pub(crate) fn advance(
        &self,
        state: &StateContainer,
        staged: &[Vec<f64>],
        t: f64,
        dt: f64,
        noise: Option<&[f64]>,
        step: usize,
        out: &mut Vec<f64>,
    ) -> Result<(), SimulationError> {
        let num_entities = state.num_entities();
        let values = state.column(self.target);
        let cols: Vec<&[f64]> = self
            .deps
            .iter()
            .map(|slot| match slot {
                DepSlot::Committed(idx) => state.column(*idx),
                DepSlot::Staged(idx) => staged[*idx].as_slice(),
            })
            .collect();

        out.clear();
        out.try_reserve_exact(num_entities)
            .map_err(|e| SimulationError::ResourceExhausted(e.to_string()))?;
        out.resize(num_entities, 0.0);

        if num_entities >= MIN_ENTITIES_PAR {
            out.par_chunks_mut(PAR_CHUNK).enumerate().for_each(|(chunk_idx, chunk)| {
                self.advance_chunk(values, &cols, noise, t, dt, chunk_idx * PAR_CHUNK, chunk);
            });
        } else {
            self.advance_chunk(values, &cols, noise, t, dt, 0, out);
        }

        match out.iter().all(|value| value.is_finite()) {
            true => Ok(()),
            false => Err(SimulationError::NumericEvaluation {
                step,
                variable: self.target_name.clone(),
            }),
        }
    }

    // Element-wise Euler–Maruyama update over one contiguous range of entities.
    fn advance_chunk(
        &self,
        values: &[f64],
        cols: &[&[f64]],
        noise: Option<&[f64]>,
        t: f64,
        dt: f64,
        base: usize,
        out: &mut [f64],
    ) {
        let sqrt_dt = dt.sqrt();
        let mut dep_buf = vec![0.0; cols.len()];
        for (k, new_value) in out.iter_mut().enumerate() {
            let i = base + k;
            for (slot, col) in dep_buf.iter_mut().zip(cols.iter()) {
                *slot = col[i];
            }
            let value = values[i];
            let mut next = value + dt * (self.drift)(value, t, &dep_buf);
            if let (Some(diffusion), Some(draws)) = (&self.diffusion, noise) {
                next += sqrt_dt * diffusion(value, t, &dep_buf) * draws[i];
            }
            *new_value = next;
        }
    }
}

impl std::fmt::Debug for Stepper {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Stepper")
            .field("target", &self.target_name)
            .field("deps", &self.deps)
            .field("stochastic", &self.is_stochastic())
            .field("bounds", &self.bounds)
            .finish()
    }
}

/// Compile the equation declarations of a model into stepping routines.
///
/// Collects every reference to an undeclared state variable before failing,
/// and rejects same-step ("fresh") dependencies on variables that are not
/// integrated by an earlier equation.
pub(crate) fn compile(
    equations: Vec<Equation>,
    index: &HashMap<String, usize>,
) -> Result<Vec<Stepper>, SimulationError> {
    let mut undeclared: Vec<(String, String)> = vec![];
    for equation in &equations {
        if !index.contains_key(equation.target()) {
            undeclared.push((equation.target().to_string(), equation.target().to_string()));
        }
        for dep in equation.deps() {
            if !index.contains_key(dep.name()) {
                undeclared.push((equation.target().to_string(), dep.name().to_string()));
            }
        }
    }
    if !undeclared.is_empty() {
        return Err(SimulationError::UndeclaredReferences {
            references: undeclared,
        });
    }

    // Map column index of already-compiled targets to their equation order index.
    let mut stage_of: HashMap<usize, usize> = HashMap::new();
    let mut steppers: Vec<Stepper> = Vec::with_capacity(equations.len());

    for equation in equations {
        let (target_name, deps, drift, diffusion, bounds) = equation.into_parts();
        let target = index[&target_name];
        if stage_of.contains_key(&target) {
            return Err(SimulationError::InvalidConfiguration(format!(
                "duplicate equation for state variable {}",
                target_name
            )));
        }

        let mut slots = Vec::with_capacity(deps.len());
        for dep in deps {
            let column = index[dep.name()];
            let slot = match dep {
                Dep::Committed(_) => DepSlot::Committed(column),
                Dep::Fresh(name) => match stage_of.get(&column) {
                    Some(stage) => DepSlot::Staged(*stage),
                    None => {
                        return Err(SimulationError::InvalidConfiguration(format!(
                            "fresh dependency on {} in the equation for {} must refer to an earlier equation",
                            name, target_name
                        )))
                    }
                },
            };
            slots.push(slot);
        }

        if let Some((lower, upper)) = bounds {
            if !(lower <= upper) || !lower.is_finite() || !upper.is_finite() {
                return Err(SimulationError::InvalidConfiguration(format!(
                    "invalid clamp bounds [{}, {}] for state variable {}",
                    lower, upper, target_name
                )));
            }
        }

        stage_of.insert(target, steppers.len());
        steppers.push(Stepper {
            target,
            target_name,
            deps: slots,
            bounds,
            drift,
            diffusion,
        });
    }

    Ok(steppers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::Equation;

    fn index_of(names: &[&str]) -> HashMap<String, usize> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect()
    }

    #[test]
    fn test_compile_resolves_dependencies() {
        let index = index_of(&["v", "m", "input"]);
        let equations = vec![
            Equation::new("m", |m, _t, _deps| -m).clamped(0.0, 1.0),
            Equation::new("v", |_v, _t, deps| deps[0] + deps[1])
                .depends_on("input")
                .depends_on_fresh("m"),
        ];

        let steppers = compile(equations, &index).unwrap();
        assert_eq!(steppers.len(), 2);
        assert_eq!(steppers[0].target(), 1);
        assert_eq!(steppers[0].bounds(), Some((0.0, 1.0)));
        assert_eq!(steppers[1].target(), 0);
        assert_eq!(
            steppers[1].deps,
            vec![DepSlot::Committed(2), DepSlot::Staged(0)]
        );
    }

    #[test]
    fn test_compile_collects_every_undeclared_reference() {
        let index = index_of(&["v"]);
        let equations = vec![
            Equation::new("v", |_v, _t, deps| deps[0]).depends_on("w"),
            Equation::new("v", |_v, _t, deps| deps[0]).depends_on("u"),
        ];

        let error = compile(equations, &index).unwrap_err();
        assert_eq!(
            error,
            SimulationError::UndeclaredReferences {
                references: vec![
                    ("v".to_string(), "w".to_string()),
                    ("v".to_string(), "u".to_string()),
                ]
            }
        );
    }

    #[test]
    fn test_compile_rejects_duplicate_target() {
        let index = index_of(&["v"]);
        let equations = vec![
            Equation::new("v", |v, _t, _deps| -v),
            Equation::new("v", |v, _t, _deps| v),
        ];
        assert_eq!(
            compile(equations, &index).unwrap_err(),
            SimulationError::InvalidConfiguration(
                "duplicate equation for state variable v".to_string()
            )
        );
    }

    #[test]
    fn test_compile_rejects_forward_fresh_dependency() {
        let index = index_of(&["v", "m"]);
        let equations = vec![
            Equation::new("v", |_v, _t, deps| deps[0]).depends_on_fresh("m"),
            Equation::new("m", |m, _t, _deps| -m),
        ];
        assert!(matches!(
            compile(equations, &index),
            Err(SimulationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_compile_rejects_invalid_bounds() {
        let index = index_of(&["m"]);
        let equations = vec![Equation::new("m", |m, _t, _deps| -m).clamped(1.0, 0.0)];
        assert!(matches!(
            compile(equations, &index),
            Err(SimulationError::InvalidConfiguration(_))
        ));
    }
}
