//! Model declaration and compilation.
//!
//! A [`Model`] gathers the state variables of one homogeneous entity kind,
//! the differential equations driving them, an optional threshold (event)
//! rule and an optional designated input variable. It is assembled through a
//! validating [`ModelBuilder`], compiled once into stepping routines, and
//! immutable afterwards; a single model may back any number of populations.
use std::collections::HashMap;

use crate::equation::Equation;
use crate::error::SimulationError;
use crate::integrator::{self, Stepper};

/// A threshold-crossing event rule.
///
/// An event fires for an entity when the variable's committed value was below
/// `level` at the start of a step and its freshly integrated value reaches or
/// exceeds `level`. Optionally the variable is reset after the event and a
/// 0/1 flag variable records which entities fired.
#[derive(Debug, PartialEq, Clone)]
pub struct Threshold {
    /// The monitored state variable.
    pub variable: String,
    /// The crossing level.
    pub level: f64,
    /// The value written to the variable after an event, if any.
    pub reset: Option<f64>,
    /// A state variable receiving 1.0 for firing entities and 0.0 otherwise, if any.
    pub flag: Option<String>,
}

impl Threshold {
    /// Create a threshold rule on the given variable and level.
    pub fn new(variable: &str, level: f64) -> Self {
        Threshold {
            variable: variable.to_string(),
            level,
            reset: None,
            flag: None,
        }
    }

    /// Reset the variable to the given value after each event.
    pub fn with_reset(mut self, value: f64) -> Self {
        self.reset = Some(value);
        self
    }

    /// Record events in the given 0/1 flag variable.
    pub fn with_flag(mut self, name: &str) -> Self {
        self.flag = Some(name.to_string());
        self
    }
}

// Threshold rule with names resolved to column and stage indices.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct CompiledThreshold {
    pub column: usize,
    // Equation order index of the threshold variable.
    pub stage: usize,
    pub level: f64,
    pub reset: Option<f64>,
    pub flag_column: Option<usize>,
}

/// A compiled model: named state variables, their initial values and the
/// stepping routines derived from the equation declarations.
pub struct Model {
    name: String,
    // Variable names, in declaration order.
    variables: Vec<String>,
    initial_values: Vec<f64>,
    // Variable name to column index.
    index: HashMap<String, usize>,
    steppers: Vec<Stepper>,
    threshold: Option<Threshold>,
    compiled_threshold: Option<CompiledThreshold>,
    input_column: Option<usize>,
}

impl Model {
    /// Start declaring a model with the given name.
    pub fn builder(name: &str) -> ModelBuilder {
        ModelBuilder {
            name: name.to_string(),
            variables: vec![],
            equations: vec![],
            threshold: None,
            input_variable: None,
        }
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the state variable names, in declaration order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Returns the number of state variables.
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Returns the initial values, in variable declaration order.
    pub fn initial_values(&self) -> &[f64] {
        &self.initial_values
    }

    /// Returns the number of compiled equations.
    pub fn num_equations(&self) -> usize {
        self.steppers.len()
    }

    /// Returns the column index of the given state variable.
    pub fn index_of(&self, name: &str) -> Result<usize, SimulationError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| SimulationError::UnknownVariable(name.to_string()))
    }

    /// Returns the threshold rule, if any.
    pub fn threshold(&self) -> Option<&Threshold> {
        self.threshold.as_ref()
    }

    /// Returns the designated input variable, if any.
    pub fn input_variable(&self) -> Option<&str> {
        self.input_column.map(|column| self.variables[column].as_str())
    }

    pub(crate) fn steppers(&self) -> &[Stepper] {
        &self.steppers
    }

    pub(crate) fn compiled_threshold(&self) -> Option<&CompiledThreshold> {
        self.compiled_threshold.as_ref()
    }

    pub(crate) fn input_column(&self) -> Option<usize> {
        self.input_column
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("num_equations", &self.num_equations())
            .field("threshold", &self.threshold)
            .field("input_variable", &self.input_variable())
            .finish()
    }
}

/// Builder collecting the declarative pieces of a [`Model`].
///
/// All validation happens in [`build`](ModelBuilder::build): undeclared
/// references are collected (all of them) before failing, and the equation
/// set is compiled into stepping routines exactly once.
pub struct ModelBuilder {
    name: String,
    variables: Vec<(String, f64)>,
    equations: Vec<Equation>,
    threshold: Option<Threshold>,
    input_variable: Option<String>,
}

impl ModelBuilder {
    /// Declare a state variable with its initial value.
    pub fn state(mut self, name: &str, initial_value: f64) -> Self {
        self.variables.push((name.to_string(), initial_value));
        self
    }

    /// Declare a differential equation.
    pub fn equation(mut self, equation: Equation) -> Self {
        self.equations.push(equation);
        self
    }

    /// Declare the threshold-crossing event rule.
    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Designate the variable receiving external inputs. The scheduler
    /// accumulates injected values into it before each step and the update
    /// routine zeroes it afterwards.
    pub fn input_variable(mut self, name: &str) -> Self {
        self.input_variable = Some(name.to_string());
        self
    }

    /// Validate the declarations and compile the model.
    pub fn build(self) -> Result<Model, SimulationError> {
        if self.variables.is_empty() {
            return Err(SimulationError::InvalidConfiguration(format!(
                "model {} declares no state variable",
                self.name
            )));
        }

        let mut index: HashMap<String, usize> = HashMap::new();
        for (column, (name, initial_value)) in self.variables.iter().enumerate() {
            if index.insert(name.clone(), column).is_some() {
                return Err(SimulationError::InvalidConfiguration(format!(
                    "duplicate state variable {} in model {}",
                    name, self.name
                )));
            }
            if !initial_value.is_finite() {
                return Err(SimulationError::InvalidConfiguration(format!(
                    "non-finite initial value for state variable {}",
                    name
                )));
            }
        }

        let steppers = integrator::compile(self.equations, &index)?;

        // Equation order index per target column, for threshold resolution.
        let stage_of: HashMap<usize, usize> = steppers
            .iter()
            .enumerate()
            .map(|(stage, stepper)| (stepper.target(), stage))
            .collect();

        let compiled_threshold = match &self.threshold {
            Some(threshold) => {
                let column = match index.get(&threshold.variable) {
                    Some(column) => *column,
                    None => return Err(SimulationError::UnknownVariable(threshold.variable.clone())),
                };
                let stage = match stage_of.get(&column) {
                    Some(stage) => *stage,
                    None => {
                        return Err(SimulationError::InvalidConfiguration(format!(
                            "threshold variable {} is not integrated by any equation",
                            threshold.variable
                        )))
                    }
                };
                if !threshold.level.is_finite() {
                    return Err(SimulationError::InvalidConfiguration(format!(
                        "non-finite threshold level for state variable {}",
                        threshold.variable
                    )));
                }
                let flag_column = match &threshold.flag {
                    Some(flag) => {
                        let flag_column = match index.get(flag) {
                            Some(column) => *column,
                            None => return Err(SimulationError::UnknownVariable(flag.clone())),
                        };
                        if stage_of.contains_key(&flag_column) {
                            return Err(SimulationError::InvalidConfiguration(format!(
                                "event flag variable {} must not be an equation target",
                                flag
                            )));
                        }
                        Some(flag_column)
                    }
                    None => None,
                };
                Some(CompiledThreshold {
                    column,
                    stage,
                    level: threshold.level,
                    reset: threshold.reset,
                    flag_column,
                })
            }
            None => None,
        };

        let input_column = match &self.input_variable {
            Some(name) => {
                let column = match index.get(name) {
                    Some(column) => *column,
                    None => return Err(SimulationError::UnknownVariable(name.clone())),
                };
                if stage_of.contains_key(&column) {
                    return Err(SimulationError::InvalidConfiguration(format!(
                        "input variable {} must not be an equation target",
                        name
                    )));
                }
                Some(column)
            }
            None => None,
        };

        let (variables, initial_values): (Vec<String>, Vec<f64>) =
            self.variables.into_iter().unzip();
        Ok(Model {
            name: self.name,
            variables,
            initial_values,
            index,
            steppers,
            threshold: self.threshold,
            compiled_threshold,
            input_column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_lif_model() {
        let model = Model::builder("lif")
            .state("v", -60.0)
            .state("spike", 0.0)
            .state("input", 0.0)
            .input_variable("input")
            .equation(
                Equation::new("v", |v, _t, deps| (-74.0 - v + deps[0]) / 10.0).depends_on("input"),
            )
            .threshold(Threshold::new("v", -54.0).with_reset(-60.0).with_flag("spike"))
            .build()
            .unwrap();

        assert_eq!(model.name(), "lif");
        assert_eq!(model.variables(), &["v", "spike", "input"]);
        assert_eq!(model.initial_values(), &[-60.0, 0.0, 0.0]);
        assert_eq!(model.num_equations(), 1);
        assert_eq!(model.index_of("spike").unwrap(), 1);
        assert_eq!(model.input_variable(), Some("input"));
        assert_eq!(
            model.compiled_threshold(),
            Some(&CompiledThreshold {
                column: 0,
                stage: 0,
                level: -54.0,
                reset: Some(-60.0),
                flag_column: Some(1),
            })
        );
    }

    #[test]
    fn test_build_fails_on_undeclared_references() {
        // Scenario: an equation referencing undeclared state variables must fail
        // at build time, listing every offender.
        let error = Model::builder("broken")
            .state("v", 0.0)
            .equation(
                Equation::new("v", |_v, _t, deps| deps[0] + deps[1])
                    .depends_on("w")
                    .depends_on("u"),
            )
            .build()
            .unwrap_err();

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
    fn test_build_fails_on_duplicate_variable() {
        let error = Model::builder("broken")
            .state("v", 0.0)
            .state("v", 1.0)
            .build()
            .unwrap_err();
        assert!(matches!(error, SimulationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_build_fails_on_non_finite_initial_value() {
        let error = Model::builder("broken")
            .state("v", f64::NAN)
            .build()
            .unwrap_err();
        assert!(matches!(error, SimulationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_build_fails_on_unintegrated_threshold_variable() {
        let error = Model::builder("broken")
            .state("v", 0.0)
            .threshold(Threshold::new("v", 1.0))
            .build()
            .unwrap_err();
        assert!(matches!(error, SimulationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_build_fails_on_unknown_threshold_variable() {
        let error = Model::builder("broken")
            .state("v", 0.0)
            .equation(Equation::new("v", |v, _t, _deps| -v))
            .threshold(Threshold::new("w", 1.0))
            .build()
            .unwrap_err();
        assert_eq!(error, SimulationError::UnknownVariable("w".to_string()));
    }

    #[test]
    fn test_build_fails_on_integrated_input_variable() {
        let error = Model::builder("broken")
            .state("input", 0.0)
            .equation(Equation::new("input", |x, _t, _deps| -x))
            .input_variable("input")
            .build()
            .unwrap_err();
        assert!(matches!(error, SimulationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_build_fails_on_empty_model() {
        let error = Model::builder("empty").build().unwrap_err();
        assert!(matches!(error, SimulationError::InvalidConfiguration(_)));
    }
}
