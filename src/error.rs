//! Error module for the Rusty Dyn library.
use std::error::Error;
use std::fmt;

use itertools::Itertools;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum SimulationError {
    /// Error for equations referencing state variables not declared in the model.
    /// Each entry is a (equation target, referenced name) pair; every offender is collected
    /// before the model build fails.
    UndeclaredReferences { references: Vec<(String, String)> },
    /// Error for a state variable name not found in the model, e.g., when binding a monitor or an input.
    UnknownVariable(String),
    /// Error for invalid model or run setup, e.g., non-positive time step or duration.
    InvalidConfiguration(String),
    /// Error for a non-finite value produced while integrating a state variable.
    /// Reported with the step index and the offending variable.
    NumericEvaluation { step: usize, variable: String },
    /// Error for state container or recording buffer allocation failure.
    ResourceExhausted(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimulationError::UndeclaredReferences { references } => {
                write!(
                    f,
                    "Undeclared state variables referenced: {}",
                    references
                        .iter()
                        .map(|(equation, name)| format!("{} (equation for {})", name, equation))
                        .join(", ")
                )
            }
            SimulationError::UnknownVariable(name) => {
                write!(f, "Unknown state variable: {}", name)
            }
            SimulationError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {}", e),
            SimulationError::NumericEvaluation { step, variable } => write!(
                f,
                "Non-finite value for state variable {} at step {}",
                variable, step
            ),
            SimulationError::ResourceExhausted(e) => write!(f, "Allocation failure: {}", e),
            SimulationError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SimulationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_references_display() {
        let error = SimulationError::UndeclaredReferences {
            references: vec![
                ("v".to_string(), "w".to_string()),
                ("x".to_string(), "u".to_string()),
            ],
        };
        assert_eq!(
            error.to_string(),
            "Undeclared state variables referenced: w (equation for v), u (equation for x)"
        );
    }

    #[test]
    fn test_numeric_evaluation_display() {
        let error = SimulationError::NumericEvaluation {
            step: 42,
            variable: "v".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Non-finite value for state variable v at step 42"
        );
    }
}
