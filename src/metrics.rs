//! Aggregate firing statistics.
use crate::error::SimulationError;

/// The average firing rate over an observation interval, in events per unit
/// time per entity: `num_events / (num_entities * interval)`.
///
/// When `num_entities` counts only the recorded part of a population (e.g.,
/// a monitored subset, or an estimate under partitioned recording), the
/// result approximates the population rate by assuming activity is evenly
/// distributed across entities; the approximation is deliberate and no
/// correction is applied.
pub fn average_firing_rate(
    num_events: usize,
    num_entities: usize,
    interval: f64,
) -> Result<f64, SimulationError> {
    if num_entities == 0 {
        return Err(SimulationError::InvalidConfiguration(
            "firing rates require at least one recorded entity".to_string(),
        ));
    }
    if !(interval > 0.0) || !interval.is_finite() {
        return Err(SimulationError::InvalidConfiguration(format!(
            "firing rates require a positive finite interval, got {}",
            interval
        )));
    }
    Ok(num_events as f64 / (num_entities as f64 * interval))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_firing_rate() {
        // 200 events from 50 recorded entities over a 1.0 window.
        assert_eq!(average_firing_rate(200, 50, 1.0).unwrap(), 4.0);
        assert_eq!(average_firing_rate(0, 10, 2.0).unwrap(), 0.0);
        assert_eq!(average_firing_rate(30, 3, 10.0).unwrap(), 1.0);
    }

    #[test]
    fn test_average_firing_rate_rejects_degenerate_inputs() {
        assert!(average_firing_rate(1, 0, 1.0).is_err());
        assert!(average_firing_rate(1, 10, 0.0).is_err());
        assert!(average_firing_rate(1, 10, -1.0).is_err());
        assert!(average_firing_rate(1, 10, f64::NAN).is_err());
        assert!(average_firing_rate(1, 10, f64::INFINITY).is_err());
    }
}
