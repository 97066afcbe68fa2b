//! External input waveforms injected into a model's input variable.
use serde::{Deserialize, Serialize};

/// The value an input contributes over the course of a run.
///
/// The contribution of a matching step is added to the target variable
/// during the input-accumulation phase of the update routine; several inputs
/// targeting the same variable accumulate.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum Waveform {
    /// The same value at every step.
    Constant(f64),
    /// One value per step index; steps beyond the end contribute nothing.
    Sequence(Vec<f64>),
    /// A constant value for steps whose time lies in [start, end).
    Pulse { start: f64, end: f64, amplitude: f64 },
}

impl Waveform {
    /// Returns the value contributed at the given step, if any.
    pub fn value_at(&self, step: usize, time: f64) -> Option<f64> {
        match self {
            Waveform::Constant(value) => Some(*value),
            Waveform::Sequence(values) => values.get(step).copied(),
            Waveform::Pulse {
                start,
                end,
                amplitude,
            } => {
                if time >= *start && time < *end {
                    Some(*amplitude)
                } else {
                    None
                }
            }
        }
    }
}
