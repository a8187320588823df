//! Closed-loop simulation of a controller against a plant model.
//!
//! The plant is integrated with classical RK4 under a zero-order hold on
//! the control command, one solver tick per integration step.

use anyhow::Result;
use log::info;
use nalgebra::DVector;
use serde::Serialize;

use crate::solver::MultipleShootingNmpc;
use crate::traits::OcpModel;

/// One sampling instant of a closed-loop run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationRecord {
    pub time: f64,
    pub state: Vec<f64>,
    pub control_input: Vec<f64>,
    pub error_norm: f64,
}

/// Classical fourth-order Runge-Kutta with preallocated stage buffers.
pub struct Rk4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl Rk4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }

    /// Advances `state` by `dt` under a constant `control_input`.
    pub fn step<P: OcpModel>(
        &mut self,
        plant: &P,
        t: f64,
        dt: f64,
        state: &mut [f64],
        control_input: &[f64],
    ) {
        let n = state.len();
        plant.state_func(t, state, control_input, &mut self.k1);
        for i in 0..n {
            self.tmp[i] = state[i] + 0.5 * dt * self.k1[i];
        }
        plant.state_func(t + 0.5 * dt, &self.tmp, control_input, &mut self.k2);
        for i in 0..n {
            self.tmp[i] = state[i] + 0.5 * dt * self.k2[i];
        }
        plant.state_func(t + 0.5 * dt, &self.tmp, control_input, &mut self.k3);
        for i in 0..n {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        plant.state_func(t + dt, &self.tmp, control_input, &mut self.k4);
        for i in 0..n {
            state[i] +=
                dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }
    }
}

/// Runs the controller in closed loop from `t0` to `t_end` with a fixed
/// sampling period. The controller must already be initialized. The plant
/// may differ from the controller's internal model to exercise model
/// mismatch.
pub fn run_closed_loop<M: OcpModel, P: OcpModel>(
    plant: &P,
    solver: &mut MultipleShootingNmpc<M>,
    initial_state: &DVector<f64>,
    t0: f64,
    t_end: f64,
    sampling_period: f64,
) -> Result<Vec<SimulationRecord>> {
    let steps = ((t_end - t0) / sampling_period).round() as usize;
    let mut records = Vec::with_capacity(steps + 1);
    let mut state = initial_state.clone();
    let mut rk4 = Rk4::new(state.len());
    let mut t = t0;

    info!(
        "closed-loop run: t0 {t0}, t_end {t_end}, sampling period {sampling_period}, \
         {steps} steps"
    );
    for _ in 0..steps {
        let control_input = solver.control_update(t, sampling_period, &state)?;
        let error_norm = solver.error_norm(t, &state)?;
        records.push(SimulationRecord {
            time: t,
            state: state.as_slice().to_vec(),
            control_input: control_input.as_slice().to_vec(),
            error_norm,
        });
        rk4.step(
            plant,
            t,
            sampling_period,
            state.as_mut_slice(),
            control_input.as_slice(),
        );
        t += sampling_period;
    }
    let control_input = solver.control_input();
    let error_norm = solver.error_norm(t, &state)?;
    records.push(SimulationRecord {
        time: t,
        state: state.as_slice().to_vec(),
        control_input: control_input.as_slice().to_vec(),
        error_norm,
    });
    Ok(records)
}
