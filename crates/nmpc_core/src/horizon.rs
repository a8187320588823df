use serde::{Deserialize, Serialize};

/// Smoothly growing prediction horizon.
///
/// The horizon length at time `t` is
/// `max_length * (1 - exp(-alpha * (t - initial_time)))`: it starts at zero
/// when the solver is initialized and approaches `max_length` from below,
/// which keeps the continuation method on its solution path from a trivially
/// consistent zero-horizon start. Pure function of elapsed time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HorizonSchedule {
    max_length: f64,
    alpha: f64,
    num_nodes: usize,
    initial_time: f64,
}

impl HorizonSchedule {
    pub fn new(max_length: f64, alpha: f64, num_nodes: usize, initial_time: f64) -> Self {
        Self {
            max_length,
            alpha,
            num_nodes,
            initial_time,
        }
    }

    /// Horizon length at time `t`.
    pub fn length(&self, t: f64) -> f64 {
        self.max_length * (1.0 - (-self.alpha * (t - self.initial_time)).exp())
    }

    /// Step size between adjacent shooting nodes at time `t`.
    pub fn step_size(&self, t: f64) -> f64 {
        self.length(t) / self.num_nodes as f64
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn initial_time(&self) -> f64 {
        self.initial_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_starts_at_zero() {
        let schedule = HorizonSchedule::new(0.5, 1.0, 50, 2.0);
        assert!(schedule.length(2.0).abs() < 1e-15);
        assert!(schedule.step_size(2.0).abs() < 1e-15);
    }

    #[test]
    fn test_horizon_strictly_increasing_and_bounded() {
        let schedule = HorizonSchedule::new(0.5, 1.0, 50, 0.0);
        let mut prev = schedule.length(0.0);
        for i in 1..200 {
            let t = 0.1 * i as f64;
            let len = schedule.length(t);
            assert!(
                len > prev,
                "horizon length must be strictly increasing: {len} <= {prev} at t = {t}"
            );
            assert!(
                len < 0.5,
                "horizon length must stay below the maximum: {len} at t = {t}"
            );
            prev = len;
        }
        assert!(
            (schedule.length(50.0) - 0.5).abs() < 1e-9,
            "horizon length should approach the maximum asymptotically"
        );
    }
}
