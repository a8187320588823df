//! The multiple-shooting C/GMRES controller.
//!
//! One `control_update` call per sampling tick: a single fixed-size
//! matrix-free GMRES solve produces the time-derivative of the
//! control-and-constraints sequence, and the condensed state/costate and
//! saturation variables are integrated alongside it by closed-form update
//! laws. There is no inner iteration to convergence; the continuation
//! method tracks the KKT root across ticks instead of re-solving.

pub(crate) mod elimination;
pub(crate) mod residual;

use anyhow::{bail, Context, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::bootstrap::{self, MultiplierGuess};
use crate::error::SolverError;
use crate::gmres::{MatrixFreeGmres, MatrixFreeProblem};
use crate::horizon::HorizonSchedule;
use crate::saturation::SaturationList;
use crate::traits::OcpModel;
use self::elimination::{
    multiply_saturation_derivative, multiply_saturation_inverse, saturation_residual,
};
use self::residual::{control_residual, recompute_state_costate, state_costate_residual};

/// Parameters of the continuation method and its horizon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Asymptotic horizon length.
    pub horizon_max_length: f64,
    /// Growth rate of the horizon toward its maximum.
    pub horizon_growth_rate: f64,
    /// Number of shooting nodes on the horizon.
    pub num_nodes: usize,
    /// Forward-difference increment shared by every directional derivative.
    pub difference_increment: f64,
    /// Stabilization rate imposed on the optimality-error dynamics.
    pub zeta: f64,
    /// Krylov subspace dimension of the per-tick GMRES solve.
    pub krylov_dim: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            horizon_max_length: 0.5,
            horizon_growth_rate: 1.0,
            num_nodes: 50,
            difference_increment: 1.0e-6,
            zeta: 1000.0,
            krylov_dim: 5,
        }
    }
}

/// Everything the residual hooks touch: the model, the saturation list, the
/// per-node trajectory, and the scratch buffers reused every tick. Sizes are
/// fixed at construction; nothing here allocates on the per-tick path.
///
/// Kept separate from the GMRES engine so the engine can borrow it mutably
/// while driving the hooks.
struct ShootingCore<M: OcpModel> {
    model: M,
    sats: SaturationList,
    settings: SolverSettings,
    /// Set by `initialize`; also encodes the Uninitialized -> Running
    /// transition.
    schedule: Option<HorizonSchedule>,

    dim_state: usize,
    dim_control_input: usize,
    dim_uc: usize,
    dim_sat: usize,
    n: usize,

    // Trajectory variables (one column per shooting node).
    state_traj: Vec<DVector<f64>>,
    lambda_traj: Vec<DVector<f64>>,
    dummy_traj: Vec<DVector<f64>>,
    multiplier_traj: Vec<DVector<f64>>,

    // Residual buffers. `uc_error_1` and the `*_error_1` trajectories carry
    // values at the incremented time between the b-hook and the Ax-hook.
    uc_error: DVector<f64>,
    uc_error_1: DVector<f64>,
    uc_error_2: DVector<f64>,
    uc_error_3: DVector<f64>,
    state_error: Vec<DVector<f64>>,
    lambda_error: Vec<DVector<f64>>,
    state_error_1: Vec<DVector<f64>>,
    lambda_error_1: Vec<DVector<f64>>,
    dummy_error: Vec<DVector<f64>>,
    sat_error: Vec<DVector<f64>>,
    dummy_error_1: Vec<DVector<f64>>,
    sat_error_1: Vec<DVector<f64>>,

    // Right-hand-side and update scratch.
    state_rhs: Vec<DVector<f64>>,
    lambda_rhs: Vec<DVector<f64>>,
    dummy_rhs: Vec<DVector<f64>>,
    sat_rhs: Vec<DVector<f64>>,
    dummy_update: Vec<DVector<f64>>,
    multiplier_update: Vec<DVector<f64>>,
    multiplier_tmp: Vec<DVector<f64>>,

    // Incremented-time quantities for the forward differences.
    incremented_time: f64,
    incremented_state: DVector<f64>,
    incremented_uc_seq: DVector<f64>,
    incr_state_traj: Vec<DVector<f64>>,
    incr_lambda_traj: Vec<DVector<f64>>,
    dx: DVector<f64>,
}

fn node_buffers(dim: usize, n: usize) -> Vec<DVector<f64>> {
    (0..n).map(|_| DVector::zeros(dim)).collect()
}

impl<M: OcpModel> ShootingCore<M> {
    fn schedule(&self) -> Result<HorizonSchedule> {
        self.schedule.ok_or_else(|| SolverError::NotInitialized.into())
    }
}

impl<M: OcpModel> MatrixFreeProblem for ShootingCore<M> {
    /// The b-hook of the continuation law:
    /// `b = -(zeta - 1/h) F(U) - F3(U)/h - (F2(U) - F1(U))/h`,
    /// where `F1`/`F3` are the control residual at the incremented
    /// time/state with the current and the decayed-condensed trajectories,
    /// and `F2` additionally carries the warm-start direction.
    fn residual(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        update_guess: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let schedule = self.schedule()?;
        let h = self.settings.difference_increment;
        let zeta = self.settings.zeta;
        let it = self.incremented_time;

        control_residual(
            &self.model,
            &self.sats,
            &schedule,
            t,
            state,
            solution,
            &self.state_traj,
            &self.lambda_traj,
            &self.multiplier_traj,
            &mut self.uc_error,
        );
        control_residual(
            &self.model,
            &self.sats,
            &schedule,
            it,
            &self.incremented_state,
            solution,
            &self.state_traj,
            &self.lambda_traj,
            &self.multiplier_traj,
            &mut self.uc_error_1,
        );

        state_costate_residual(
            &self.model,
            &schedule,
            t,
            state,
            solution,
            &self.state_traj,
            &self.lambda_traj,
            &mut self.dx,
            &mut self.state_error,
            &mut self.lambda_error,
        );
        state_costate_residual(
            &self.model,
            &schedule,
            it,
            &self.incremented_state,
            solution,
            &self.state_traj,
            &self.lambda_traj,
            &mut self.dx,
            &mut self.state_error_1,
            &mut self.lambda_error_1,
        );

        // Condense state/costate under the exponential decay law.
        let decay = 1.0 - h * zeta;
        for i in 0..self.n {
            self.state_rhs[i].copy_from(&self.state_error[i]);
            self.state_rhs[i] *= decay;
            self.lambda_rhs[i].copy_from(&self.lambda_error[i]);
            self.lambda_rhs[i] *= decay;
        }
        recompute_state_costate(
            &self.model,
            &schedule,
            it,
            &self.incremented_state,
            solution,
            &self.state_rhs,
            &self.lambda_rhs,
            &mut self.dx,
            &mut self.incr_state_traj,
            &mut self.incr_lambda_traj,
        );

        // Condense the saturation variables under the same decay law.
        saturation_residual(
            &self.sats,
            self.dim_uc,
            solution,
            &self.dummy_traj,
            &self.multiplier_traj,
            &mut self.dummy_error,
            &mut self.sat_error,
        );
        for i in 0..self.n {
            self.dummy_rhs[i].copy_from(&self.dummy_error[i]);
            self.dummy_rhs[i] *= -zeta;
            self.sat_rhs[i].copy_from(&self.sat_error[i]);
            self.sat_rhs[i] *= -zeta;
        }
        multiply_saturation_inverse(
            &self.sats,
            &self.dummy_traj,
            &self.multiplier_traj,
            &self.dummy_rhs,
            &self.sat_rhs,
            &mut self.dummy_error_1,
            &mut self.sat_error_1,
        );
        for i in 0..self.n {
            self.multiplier_tmp[i].copy_from(&self.multiplier_traj[i]);
            self.multiplier_tmp[i].axpy(h, &self.sat_error_1[i], 1.0);
        }
        control_residual(
            &self.model,
            &self.sats,
            &schedule,
            it,
            &self.incremented_state,
            solution,
            &self.incr_state_traj,
            &self.incr_lambda_traj,
            &self.multiplier_tmp,
            &mut self.uc_error_3,
        );

        // F2: the same evaluation shifted along the warm-start direction.
        self.incremented_uc_seq.copy_from(solution);
        self.incremented_uc_seq.axpy(h, update_guess, 1.0);
        recompute_state_costate(
            &self.model,
            &schedule,
            it,
            &self.incremented_state,
            &self.incremented_uc_seq,
            &self.state_error_1,
            &self.lambda_error_1,
            &mut self.dx,
            &mut self.incr_state_traj,
            &mut self.incr_lambda_traj,
        );
        multiply_saturation_derivative(
            &self.sats,
            self.dim_uc,
            solution,
            update_guess,
            &mut self.dummy_error,
            &mut self.sat_error,
        );
        multiply_saturation_inverse(
            &self.sats,
            &self.dummy_traj,
            &self.multiplier_traj,
            &self.dummy_error,
            &self.sat_error,
            &mut self.dummy_error_1,
            &mut self.sat_error_1,
        );
        for i in 0..self.n {
            self.multiplier_tmp[i].copy_from(&self.multiplier_traj[i]);
            self.multiplier_tmp[i].axpy(-h, &self.sat_error_1[i], 1.0);
        }
        control_residual(
            &self.model,
            &self.sats,
            &schedule,
            it,
            &self.incremented_state,
            &self.incremented_uc_seq,
            &self.incr_state_traj,
            &self.incr_lambda_traj,
            &self.multiplier_tmp,
            &mut self.uc_error_2,
        );

        let h_inv = 1.0 / h;
        for k in 0..out.len() {
            out[k] = -(zeta - h_inv) * self.uc_error[k]
                - h_inv * self.uc_error_3[k]
                - h_inv * (self.uc_error_2[k] - self.uc_error_1[k]);
        }
        Ok(())
    }

    /// The Ax-hook: forward-difference directional derivative
    /// `(F(U + h d) - F1(U)) / h` against the base evaluation `F1` left
    /// behind by the b-hook.
    fn directional_residual(
        &mut self,
        _t: f64,
        _state: &DVector<f64>,
        solution: &DVector<f64>,
        direction: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        let schedule = self.schedule()?;
        let h = self.settings.difference_increment;
        let it = self.incremented_time;

        self.incremented_uc_seq.copy_from(solution);
        self.incremented_uc_seq.axpy(h, direction, 1.0);
        recompute_state_costate(
            &self.model,
            &schedule,
            it,
            &self.incremented_state,
            &self.incremented_uc_seq,
            &self.state_error_1,
            &self.lambda_error_1,
            &mut self.dx,
            &mut self.incr_state_traj,
            &mut self.incr_lambda_traj,
        );
        multiply_saturation_derivative(
            &self.sats,
            self.dim_uc,
            solution,
            direction,
            &mut self.dummy_error,
            &mut self.sat_error,
        );
        multiply_saturation_inverse(
            &self.sats,
            &self.dummy_traj,
            &self.multiplier_traj,
            &self.dummy_error,
            &self.sat_error,
            &mut self.dummy_error_1,
            &mut self.sat_error_1,
        );
        for i in 0..self.n {
            self.multiplier_tmp[i].copy_from(&self.multiplier_traj[i]);
            self.multiplier_tmp[i].axpy(-h, &self.sat_error_1[i], 1.0);
        }
        control_residual(
            &self.model,
            &self.sats,
            &schedule,
            it,
            &self.incremented_state,
            &self.incremented_uc_seq,
            &self.incr_state_traj,
            &self.incr_lambda_traj,
            &self.multiplier_tmp,
            &mut self.uc_error_2,
        );

        let h_inv = 1.0 / h;
        for k in 0..out.len() {
            out[k] = h_inv * (self.uc_error_2[k] - self.uc_error_1[k]);
        }
        Ok(())
    }
}

/// The multiple-shooting C/GMRES controller with saturation elimination.
pub struct MultipleShootingNmpc<M: OcpModel> {
    gmres: MatrixFreeGmres,
    uc_seq: DVector<f64>,
    update_seq: DVector<f64>,
    core: ShootingCore<M>,
}

impl<M: OcpModel> MultipleShootingNmpc<M> {
    /// Builds an uninitialized controller, allocating every trajectory and
    /// scratch buffer for its lifetime.
    pub fn new(model: M, saturations: SaturationList, settings: SolverSettings) -> Result<Self> {
        let dim_state = model.dim_state();
        let dim_control_input = model.dim_control_input();
        let dim_uc = model.dim_control_and_constraints();
        let dim_sat = saturations.dim_saturation();
        let n = settings.num_nodes;

        if dim_state == 0 || dim_control_input == 0 {
            bail!("Model must declare nonzero state and control dimensions.");
        }
        if n == 0 {
            bail!("Horizon must have at least one shooting node.");
        }
        if !(settings.horizon_max_length > 0.0) {
            bail!("Horizon maximum length must be positive.");
        }
        if !(settings.horizon_growth_rate > 0.0) {
            bail!("Horizon growth rate must be positive.");
        }
        if !(settings.difference_increment > 0.0) {
            bail!("Finite-difference increment must be positive.");
        }
        if !(settings.zeta > 0.0) {
            bail!("Stabilization rate zeta must be positive.");
        }
        if settings.krylov_dim == 0 {
            bail!("Krylov subspace dimension must be positive.");
        }
        if let Some(max_index) = saturations.max_index() {
            if max_index >= dim_uc {
                return Err(SolverError::DimensionMismatch {
                    what: "saturation component index",
                    expected: dim_uc,
                    got: max_index,
                }
                .into());
            }
        }

        let dim_uc_seq = n * dim_uc;
        Ok(Self {
            gmres: MatrixFreeGmres::new(dim_uc_seq, settings.krylov_dim),
            uc_seq: DVector::zeros(dim_uc_seq),
            update_seq: DVector::zeros(dim_uc_seq),
            core: ShootingCore {
                model,
                sats: saturations,
                settings,
                schedule: None,
                dim_state,
                dim_control_input,
                dim_uc,
                dim_sat,
                n,
                state_traj: node_buffers(dim_state, n),
                lambda_traj: node_buffers(dim_state, n),
                dummy_traj: node_buffers(dim_sat, n),
                multiplier_traj: node_buffers(dim_sat, n),
                uc_error: DVector::zeros(dim_uc_seq),
                uc_error_1: DVector::zeros(dim_uc_seq),
                uc_error_2: DVector::zeros(dim_uc_seq),
                uc_error_3: DVector::zeros(dim_uc_seq),
                state_error: node_buffers(dim_state, n),
                lambda_error: node_buffers(dim_state, n),
                state_error_1: node_buffers(dim_state, n),
                lambda_error_1: node_buffers(dim_state, n),
                dummy_error: node_buffers(dim_sat, n),
                sat_error: node_buffers(dim_sat, n),
                dummy_error_1: node_buffers(dim_sat, n),
                sat_error_1: node_buffers(dim_sat, n),
                state_rhs: node_buffers(dim_state, n),
                lambda_rhs: node_buffers(dim_state, n),
                dummy_rhs: node_buffers(dim_sat, n),
                sat_rhs: node_buffers(dim_sat, n),
                dummy_update: node_buffers(dim_sat, n),
                multiplier_update: node_buffers(dim_sat, n),
                multiplier_tmp: node_buffers(dim_sat, n),
                incremented_time: 0.0,
                incremented_state: DVector::zeros(dim_state),
                incremented_uc_seq: DVector::zeros(dim_uc_seq),
                incr_state_traj: node_buffers(dim_state, n),
                incr_lambda_traj: node_buffers(dim_state, n),
                dx: DVector::zeros(dim_state),
            },
        })
    }

    /// Solves the zero-horizon problem at `t0` via the bootstrap solver and
    /// replicates the KKT-consistent single-node solution across all
    /// shooting nodes. Transitions the controller to Running; on bootstrap
    /// divergence the controller stays uninitialized.
    pub fn initialize(
        &mut self,
        t0: f64,
        state: &DVector<f64>,
        control_guess: &DVector<f64>,
        multiplier_guess: MultiplierGuess,
        convergence_radius: f64,
        max_iterations: usize,
    ) -> Result<()> {
        let core = &mut self.core;
        if state.len() != core.dim_state {
            return Err(SolverError::DimensionMismatch {
                what: "initial state",
                expected: core.dim_state,
                got: state.len(),
            }
            .into());
        }
        if control_guess.len() != core.dim_uc {
            return Err(SolverError::DimensionMismatch {
                what: "initial control guess",
                expected: core.dim_uc,
                got: control_guess.len(),
            }
            .into());
        }

        let solution = bootstrap::solve_zero_horizon(
            &core.model,
            &core.sats,
            core.settings.difference_increment,
            core.settings.krylov_dim,
            t0,
            state,
            control_guess,
            &multiplier_guess,
            convergence_radius,
            max_iterations,
        )
        .context("Bootstrap initialization failed.")?;

        core.schedule = Some(HorizonSchedule::new(
            core.settings.horizon_max_length,
            core.settings.horizon_growth_rate,
            core.n,
            t0,
        ));

        core.model
            .phix_func(t0, state.as_slice(), core.dx.as_mut_slice());
        for i in 0..core.n {
            self.uc_seq.as_mut_slice()[i * core.dim_uc..(i + 1) * core.dim_uc]
                .copy_from_slice(solution.control_and_constraints.as_slice());
            core.dummy_traj[i].copy_from(&solution.dummy);
            core.multiplier_traj[i].copy_from(&solution.multiplier);
            core.state_traj[i].copy_from(state);
            core.lambda_traj[i].copy_from(&core.dx);
        }

        // Seed the optimality-error accumulators from the bootstrap
        // residuals; the state/costate defect accumulators start at zero.
        for i in 0..core.n {
            core.uc_error.as_mut_slice()[i * core.dim_uc..(i + 1) * core.dim_uc]
                .copy_from_slice(solution.control_error.as_slice());
            core.dummy_error[i].copy_from(&solution.dummy_error);
            core.sat_error[i].copy_from(&solution.saturation_error);
            core.state_error[i].fill(0.0);
            core.lambda_error[i].fill(0.0);
        }
        self.update_seq.fill(0.0);

        Ok(())
    }

    /// One sampling tick: predicts the incremented state, performs a single
    /// matrix-free GMRES solve for the update direction, integrates the
    /// condensed state/costate and saturation variables, integrates the
    /// control sequence, and returns the control command.
    pub fn control_update(
        &mut self,
        t: f64,
        sampling_period: f64,
        state: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let schedule = self.core.schedule()?;
        if state.len() != self.core.dim_state {
            return Err(SolverError::DimensionMismatch {
                what: "current state",
                expected: self.core.dim_state,
                got: state.len(),
            }
            .into());
        }
        let h = self.core.settings.difference_increment;
        let zeta = self.core.settings.zeta;
        let n = self.core.n;
        let du = self.core.dim_control_input;

        // Predict the state one finite-difference increment ahead; every
        // forward difference this tick is taken against it.
        self.core.incremented_time = t + h;
        self.core.model.state_func(
            t,
            state.as_slice(),
            &self.uc_seq.as_slice()[..du],
            self.core.dx.as_mut_slice(),
        );
        for k in 0..self.core.dim_state {
            self.core.incremented_state[k] = state[k] + h * self.core.dx[k];
        }

        self.gmres
            .solve(&mut self.core, t, state, &self.uc_seq, &mut self.update_seq)?;

        // Re-derive the incremented state/costate trajectory consistent with
        // the decayed defects, difference it against the current one, and
        // Euler-integrate.
        self.core.incremented_uc_seq.copy_from(&self.uc_seq);
        self.core.incremented_uc_seq.axpy(h, &self.update_seq, 1.0);
        let decay = 1.0 - h * zeta;
        for i in 0..n {
            self.core.state_rhs[i].copy_from(&self.core.state_error[i]);
            self.core.state_rhs[i] *= decay;
            self.core.lambda_rhs[i].copy_from(&self.core.lambda_error[i]);
            self.core.lambda_rhs[i] *= decay;
        }
        recompute_state_costate(
            &self.core.model,
            &schedule,
            self.core.incremented_time,
            &self.core.incremented_state,
            &self.core.incremented_uc_seq,
            &self.core.state_rhs,
            &self.core.lambda_rhs,
            &mut self.core.dx,
            &mut self.core.incr_state_traj,
            &mut self.core.incr_lambda_traj,
        );
        let rate = sampling_period / h;
        for i in 0..n {
            for k in 0..self.core.dim_state {
                let ds = self.core.incr_state_traj[i][k] - self.core.state_traj[i][k];
                self.core.state_traj[i][k] += rate * ds;
                let dl = self.core.incr_lambda_traj[i][k] - self.core.lambda_traj[i][k];
                self.core.lambda_traj[i][k] += rate * dl;
            }
        }

        // Dummy/multiplier update through the eliminator, same continuation
        // law.
        saturation_residual(
            &self.core.sats,
            self.core.dim_uc,
            &self.uc_seq,
            &self.core.dummy_traj,
            &self.core.multiplier_traj,
            &mut self.core.dummy_error,
            &mut self.core.sat_error,
        );
        multiply_saturation_derivative(
            &self.core.sats,
            self.core.dim_uc,
            &self.uc_seq,
            &self.update_seq,
            &mut self.core.dummy_error_1,
            &mut self.core.sat_error_1,
        );
        for i in 0..n {
            for j in 0..self.core.dim_sat {
                self.core.dummy_rhs[i][j] =
                    -zeta * self.core.dummy_error[i][j] - self.core.dummy_error_1[i][j];
                self.core.sat_rhs[i][j] =
                    -zeta * self.core.sat_error[i][j] - self.core.sat_error_1[i][j];
            }
        }
        multiply_saturation_inverse(
            &self.core.sats,
            &self.core.dummy_traj,
            &self.core.multiplier_traj,
            &self.core.dummy_rhs,
            &self.core.sat_rhs,
            &mut self.core.dummy_update,
            &mut self.core.multiplier_update,
        );
        for i in 0..n {
            self.core.dummy_traj[i].axpy(sampling_period, &self.core.dummy_update[i], 1.0);
            self.core.multiplier_traj[i].axpy(
                sampling_period,
                &self.core.multiplier_update[i],
                1.0,
            );
        }

        // Integrate the control-and-constraints sequence and emit the
        // command.
        self.uc_seq.axpy(sampling_period, &self.update_seq, 1.0);
        Ok(DVector::from_column_slice(&self.uc_seq.as_slice()[..du]))
    }

    /// Current control command (leading control-dimension slice of the
    /// sequence).
    pub fn control_input(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.uc_seq.as_slice()[..self.core.dim_control_input])
    }

    /// Combined Euclidean norm of every optimality-residual class at the
    /// given state against the current trajectory. Diagnostic only; uses
    /// local buffers so the per-tick scratch is untouched.
    pub fn error_norm(&self, t: f64, state: &DVector<f64>) -> Result<f64> {
        let schedule = self.core.schedule()?;
        if state.len() != self.core.dim_state {
            return Err(SolverError::DimensionMismatch {
                what: "current state",
                expected: self.core.dim_state,
                got: state.len(),
            }
            .into());
        }
        let core = &self.core;
        let n = core.n;

        let mut uc_error = DVector::zeros(self.uc_seq.len());
        let mut state_error = node_buffers(core.dim_state, n);
        let mut lambda_error = node_buffers(core.dim_state, n);
        let mut dummy_error = node_buffers(core.dim_sat, n);
        let mut sat_error = node_buffers(core.dim_sat, n);
        let mut dx = DVector::zeros(core.dim_state);

        control_residual(
            &core.model,
            &core.sats,
            &schedule,
            t,
            state,
            &self.uc_seq,
            &core.state_traj,
            &core.lambda_traj,
            &core.multiplier_traj,
            &mut uc_error,
        );
        state_costate_residual(
            &core.model,
            &schedule,
            t,
            state,
            &self.uc_seq,
            &core.state_traj,
            &core.lambda_traj,
            &mut dx,
            &mut state_error,
            &mut lambda_error,
        );
        saturation_residual(
            &core.sats,
            core.dim_uc,
            &self.uc_seq,
            &core.dummy_traj,
            &core.multiplier_traj,
            &mut dummy_error,
            &mut sat_error,
        );

        let mut squared = uc_error.norm_squared();
        for i in 0..n {
            squared += state_error[i].norm_squared()
                + lambda_error[i].norm_squared()
                + dummy_error[i].norm_squared()
                + sat_error[i].norm_squared();
        }
        Ok(squared.sqrt())
    }

    /// Whether `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.core.schedule.is_some()
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.core.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DoubleIntegrator;

    impl OcpModel for DoubleIntegrator {
        fn dim_state(&self) -> usize {
            2
        }

        fn dim_control_input(&self) -> usize {
            1
        }

        fn dim_constraints(&self) -> usize {
            0
        }

        fn state_func(&self, _t: f64, state: &[f64], control_input: &[f64], out: &mut [f64]) {
            out[0] = state[1];
            out[1] = control_input[0];
        }

        fn hu_func(
            &self,
            _t: f64,
            _state: &[f64],
            control_and_constraints: &[f64],
            lambda: &[f64],
            out: &mut [f64],
        ) {
            out[0] = control_and_constraints[0] + lambda[1];
        }

        fn hx_func(
            &self,
            _t: f64,
            state: &[f64],
            _control_and_constraints: &[f64],
            lambda: &[f64],
            out: &mut [f64],
        ) {
            out[0] = state[0];
            out[1] = state[1] + lambda[0];
        }

        fn phix_func(&self, _t: f64, state: &[f64], out: &mut [f64]) {
            out[0] = state[0];
            out[1] = state[1];
        }
    }

    fn saturated_list() -> SaturationList {
        let mut sats = SaturationList::new();
        sats.append(0, -10.0, 10.0, 0.001).expect("valid saturation");
        sats
    }

    #[test]
    fn test_control_update_before_initialize_fails_fast() {
        let mut solver =
            MultipleShootingNmpc::new(DoubleIntegrator, saturated_list(), SolverSettings::default())
                .expect("construction should succeed");
        let state = DVector::zeros(2);
        let err = solver
            .control_update(0.0, 0.001, &state)
            .expect_err("uninitialized update must fail");
        assert!(
            err.downcast_ref::<SolverError>()
                .is_some_and(|e| matches!(e, SolverError::NotInitialized)),
            "expected NotInitialized, got {err:?}"
        );
        assert!(solver.error_norm(0.0, &state).is_err());
        assert!(!solver.is_initialized());
    }

    #[test]
    fn test_construction_rejects_out_of_range_saturation_index() {
        let mut sats = SaturationList::new();
        sats.append(3, -1.0, 1.0, 0.1).expect("valid entry");
        let err = MultipleShootingNmpc::new(DoubleIntegrator, sats, SolverSettings::default())
            .map(|_| ())
            .expect_err("index 3 exceeds the control/constraint dimension");
        assert!(
            err.downcast_ref::<SolverError>()
                .is_some_and(|e| matches!(e, SolverError::DimensionMismatch { .. })),
            "expected DimensionMismatch, got {err:?}"
        );
    }

    #[test]
    fn test_initialize_then_update_stays_consistent() {
        let mut solver =
            MultipleShootingNmpc::new(DoubleIntegrator, saturated_list(), SolverSettings::default())
                .expect("construction should succeed");
        let state = DVector::from_vec(vec![0.2, -0.1]);
        solver
            .initialize(
                0.0,
                &state,
                &DVector::zeros(1),
                MultiplierGuess::Auto,
                1.0e-8,
                50,
            )
            .expect("bootstrap should converge on the double integrator");
        assert!(solver.is_initialized());

        let initial_error = solver.error_norm(0.0, &state).expect("error norm");
        assert!(
            initial_error < 1.0e-6,
            "freshly initialized controller should be near-KKT-consistent, got {initial_error}"
        );

        // One tick on the stationary plant: the command must be finite and
        // within the saturation bounds.
        let command = solver
            .control_update(0.0, 0.001, &state)
            .expect("control update should succeed");
        assert_eq!(command.len(), 1);
        assert!(command[0].is_finite());
        assert!(
            command[0] >= -10.0 && command[0] <= 10.0,
            "command must respect the saturation bounds, got {}",
            command[0]
        );
        assert_eq!(solver.control_input()[0], command[0]);
    }
}
