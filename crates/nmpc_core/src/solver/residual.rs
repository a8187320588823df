//! Optimality-error (residual) formulation over the shooting grid, plus the
//! forward/backward sensitivity sweep that re-derives state and costate
//! trajectories from prescribed defects. These are the condensing mechanics:
//! everything here is a pure function of the candidate trajectory, writing
//! into caller-owned buffers.

use nalgebra::DVector;

use super::elimination::add_saturation_derivative;
use crate::horizon::HorizonSchedule;
use crate::saturation::SaturationList;
use crate::traits::OcpModel;

/// Optimality error for the control-and-constraints sequence.
///
/// Node 0 is evaluated against the live plant `state`; node `i` against the
/// previous node's state and its own costate at `t + i * step`. Each node
/// additionally picks up the saturation-multiplier term at its saturated
/// components.
#[allow(clippy::too_many_arguments)]
pub(crate) fn control_residual<M: OcpModel>(
    model: &M,
    sats: &SaturationList,
    schedule: &HorizonSchedule,
    t: f64,
    state: &DVector<f64>,
    uc_seq: &DVector<f64>,
    state_traj: &[DVector<f64>],
    lambda_traj: &[DVector<f64>],
    multiplier_traj: &[DVector<f64>],
    out: &mut DVector<f64>,
) {
    let duc = model.dim_control_and_constraints();
    let n = schedule.num_nodes();
    let delta_tau = schedule.step_size(t);

    model.hu_func(
        t,
        state.as_slice(),
        &uc_seq.as_slice()[..duc],
        lambda_traj[0].as_slice(),
        &mut out.as_mut_slice()[..duc],
    );
    add_saturation_derivative(
        sats,
        &uc_seq.as_slice()[..duc],
        multiplier_traj[0].as_slice(),
        &mut out.as_mut_slice()[..duc],
    );

    let mut tau = t + delta_tau;
    for i in 1..n {
        let seg = i * duc..(i + 1) * duc;
        model.hu_func(
            tau,
            state_traj[i - 1].as_slice(),
            &uc_seq.as_slice()[seg.clone()],
            lambda_traj[i].as_slice(),
            &mut out.as_mut_slice()[seg.clone()],
        );
        add_saturation_derivative(
            sats,
            &uc_seq.as_slice()[seg.clone()],
            multiplier_traj[i].as_slice(),
            &mut out.as_mut_slice()[seg],
        );
        tau += delta_tau;
    }
}

/// Shooting defects for state (forward) and costate (backward).
///
/// The state defect at node `i` is `x_i - x_{i-1} - dtau * f`, with the live
/// plant state standing in for `x_{-1}`. The costate recursion is anchored
/// at the terminal cost gradient and runs backwards.
#[allow(clippy::too_many_arguments)]
pub(crate) fn state_costate_residual<M: OcpModel>(
    model: &M,
    schedule: &HorizonSchedule,
    t: f64,
    state: &DVector<f64>,
    uc_seq: &DVector<f64>,
    state_traj: &[DVector<f64>],
    lambda_traj: &[DVector<f64>],
    dx: &mut DVector<f64>,
    out_state: &mut [DVector<f64>],
    out_lambda: &mut [DVector<f64>],
) {
    let du = model.dim_control_input();
    let duc = model.dim_control_and_constraints();
    let dim_state = model.dim_state();
    let n = schedule.num_nodes();
    let delta_tau = schedule.step_size(t);

    model.state_func(
        t,
        state.as_slice(),
        &uc_seq.as_slice()[..du],
        dx.as_mut_slice(),
    );
    for k in 0..dim_state {
        out_state[0][k] = state_traj[0][k] - state[k] - delta_tau * dx[k];
    }
    let mut tau = t + delta_tau;
    for i in 1..n {
        model.state_func(
            tau,
            state_traj[i - 1].as_slice(),
            &uc_seq.as_slice()[i * duc..i * duc + du],
            dx.as_mut_slice(),
        );
        for k in 0..dim_state {
            out_state[i][k] = state_traj[i][k] - state_traj[i - 1][k] - delta_tau * dx[k];
        }
        tau += delta_tau;
    }

    model.phix_func(tau, state_traj[n - 1].as_slice(), dx.as_mut_slice());
    for k in 0..dim_state {
        out_lambda[n - 1][k] = lambda_traj[n - 1][k] - dx[k];
    }
    for i in (1..n).rev() {
        model.hx_func(
            tau,
            state_traj[i - 1].as_slice(),
            &uc_seq.as_slice()[i * duc..(i + 1) * duc],
            lambda_traj[i].as_slice(),
            dx.as_mut_slice(),
        );
        for k in 0..dim_state {
            out_lambda[i - 1][k] = lambda_traj[i - 1][k] - lambda_traj[i][k] - delta_tau * dx[k];
        }
        tau -= delta_tau;
    }
}

/// Sensitivity sweep: rebuilds the state/costate trajectory consistent with
/// the prescribed defects, so that only the control-and-constraints
/// variables remain as Krylov unknowns. Forward pass integrates the state
/// equation with each node's defect added back; backward pass recurses the
/// costate from the terminal gradient the same way.
#[allow(clippy::too_many_arguments)]
pub(crate) fn recompute_state_costate<M: OcpModel>(
    model: &M,
    schedule: &HorizonSchedule,
    t: f64,
    state: &DVector<f64>,
    uc_seq: &DVector<f64>,
    defect_state: &[DVector<f64>],
    defect_lambda: &[DVector<f64>],
    dx: &mut DVector<f64>,
    out_state: &mut [DVector<f64>],
    out_lambda: &mut [DVector<f64>],
) {
    let du = model.dim_control_input();
    let duc = model.dim_control_and_constraints();
    let dim_state = model.dim_state();
    let n = schedule.num_nodes();
    let delta_tau = schedule.step_size(t);

    model.state_func(
        t,
        state.as_slice(),
        &uc_seq.as_slice()[..du],
        dx.as_mut_slice(),
    );
    for k in 0..dim_state {
        out_state[0][k] = state[k] + delta_tau * dx[k] + defect_state[0][k];
    }
    let mut tau = t + delta_tau;
    for i in 1..n {
        model.state_func(
            tau,
            out_state[i - 1].as_slice(),
            &uc_seq.as_slice()[i * duc..i * duc + du],
            dx.as_mut_slice(),
        );
        for k in 0..dim_state {
            out_state[i][k] = out_state[i - 1][k] + delta_tau * dx[k] + defect_state[i][k];
        }
        tau += delta_tau;
    }

    model.phix_func(tau, out_state[n - 1].as_slice(), dx.as_mut_slice());
    for k in 0..dim_state {
        out_lambda[n - 1][k] = dx[k] + defect_lambda[n - 1][k];
    }
    for i in (1..n).rev() {
        model.hx_func(
            tau,
            out_state[i - 1].as_slice(),
            &uc_seq.as_slice()[i * duc..(i + 1) * duc],
            out_lambda[i].as_slice(),
            dx.as_mut_slice(),
        );
        for k in 0..dim_state {
            out_lambda[i - 1][k] = out_lambda[i][k] + delta_tau * dx[k] + defect_lambda[i - 1][k];
        }
        tau -= delta_tau;
    }
}
