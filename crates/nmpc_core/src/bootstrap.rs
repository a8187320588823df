//! Zero-horizon bootstrap.
//!
//! Before the continuation method can run, the trajectory must start at an
//! exact KKT root. At the initial time the horizon has length zero, so the
//! optimal-control problem collapses to a single algebraic system in the
//! control-and-constraints vector, the dummy variables, and the saturation
//! multipliers, with the costate pinned to the terminal-cost gradient. An
//! undamped Newton iteration with a matrix-free GMRES inner solve drives
//! that system to the requested radius.

use anyhow::Result;
use log::debug;
use nalgebra::DVector;

use crate::error::SolverError;
use crate::gmres::{MatrixFreeGmres, MatrixFreeProblem};
use crate::saturation::SaturationList;
use crate::traits::OcpModel;

/// How to seed the saturation multipliers for the bootstrap iteration.
#[derive(Debug, Clone)]
pub enum MultiplierGuess {
    /// `w / (2 d0)` per entry, the stationary value for the seeded dummies.
    Auto,
    /// One shared initial value for every multiplier.
    Uniform(f64),
    /// One value per saturation entry.
    Full(DVector<f64>),
}

/// Converged solution of the zero-horizon problem, with the residuals left
/// at the root so the caller can seed its error accumulators.
#[derive(Debug, Clone)]
pub struct ZeroHorizonSolution {
    pub control_and_constraints: DVector<f64>,
    pub dummy: DVector<f64>,
    pub multiplier: DVector<f64>,
    pub control_error: DVector<f64>,
    pub dummy_error: DVector<f64>,
    pub saturation_error: DVector<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
}

/// The stacked zero-horizon KKT system `[hu + C(u)^T mu; 2 mu d - w;
/// (u - mid)^2 - r^2 + d^2]` as a matrix-free problem. The Jacobian action
/// is a forward difference against the residual stored by the last
/// `residual` call.
struct ZeroHorizonProblem<'a, M: OcpModel> {
    model: &'a M,
    sats: &'a SaturationList,
    difference_increment: f64,
    lambda: DVector<f64>,
    dim_uc: usize,
    dim_sat: usize,
    f_now: DVector<f64>,
    f_shifted: DVector<f64>,
    shifted: DVector<f64>,
}

fn evaluate_kkt<M: OcpModel>(
    model: &M,
    sats: &SaturationList,
    lambda: &DVector<f64>,
    duc: usize,
    dsat: usize,
    t: f64,
    state: &DVector<f64>,
    solution: &DVector<f64>,
    out: &mut DVector<f64>,
) {
    model.hu_func(
        t,
        state.as_slice(),
        &solution.as_slice()[..duc],
        lambda.as_slice(),
        &mut out.as_mut_slice()[..duc],
    );
    for (j, sat) in sats.entries().iter().enumerate() {
        let u = solution[sat.index];
        let d = solution[duc + j];
        let mu = solution[duc + dsat + j];
        out[sat.index] += (2.0 * u - sat.min - sat.max) * mu;
        out[duc + j] = 2.0 * mu * d - sat.weight;
        let dev = u - sat.mid();
        out[duc + dsat + j] = dev * dev - sat.half_range() * sat.half_range() + d * d;
    }
}

impl<M: OcpModel> MatrixFreeProblem for ZeroHorizonProblem<'_, M> {
    /// Right-hand side of the Newton step: `-F` at the current iterate,
    /// minus the Jacobian action on the warm-start direction.
    fn residual(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        update_guess: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        evaluate_kkt(
            self.model,
            self.sats,
            &self.lambda,
            self.dim_uc,
            self.dim_sat,
            t,
            state,
            solution,
            &mut self.f_now,
        );

        self.shifted.copy_from(solution);
        self.shifted.axpy(self.difference_increment, update_guess, 1.0);
        evaluate_kkt(
            self.model,
            self.sats,
            &self.lambda,
            self.dim_uc,
            self.dim_sat,
            t,
            state,
            &self.shifted,
            &mut self.f_shifted,
        );

        let h_inv = 1.0 / self.difference_increment;
        for k in 0..out.len() {
            out[k] = -self.f_now[k] - h_inv * (self.f_shifted[k] - self.f_now[k]);
        }
        Ok(())
    }

    fn directional_residual(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        direction: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        self.shifted.copy_from(solution);
        self.shifted.axpy(self.difference_increment, direction, 1.0);
        evaluate_kkt(
            self.model,
            self.sats,
            &self.lambda,
            self.dim_uc,
            self.dim_sat,
            t,
            state,
            &self.shifted,
            &mut self.f_shifted,
        );

        let h_inv = 1.0 / self.difference_increment;
        for k in 0..out.len() {
            out[k] = h_inv * (self.f_shifted[k] - self.f_now[k]);
        }
        Ok(())
    }
}

/// Solves the zero-horizon problem at `(t0, state)` from `control_guess`.
///
/// Dummies are seeded strictly inside the feasible disc of each saturation
/// entry so the eliminator's inverse is well defined from the first
/// iteration.
#[allow(clippy::too_many_arguments)]
pub fn solve_zero_horizon<M: OcpModel>(
    model: &M,
    sats: &SaturationList,
    difference_increment: f64,
    krylov_dim: usize,
    t0: f64,
    state: &DVector<f64>,
    control_guess: &DVector<f64>,
    multiplier_guess: &MultiplierGuess,
    convergence_radius: f64,
    max_iterations: usize,
) -> Result<ZeroHorizonSolution> {
    let duc = model.dim_control_and_constraints();
    let dsat = sats.dim_saturation();
    let dim = duc + 2 * dsat;

    if let MultiplierGuess::Full(values) = multiplier_guess {
        if values.len() != dsat {
            return Err(SolverError::DimensionMismatch {
                what: "multiplier guess",
                expected: dsat,
                got: values.len(),
            }
            .into());
        }
    }

    let mut solution = DVector::zeros(dim);
    solution.as_mut_slice()[..duc].copy_from_slice(control_guess.as_slice());
    for (j, sat) in sats.entries().iter().enumerate() {
        let dev = control_guess[sat.index] - sat.mid();
        let r = sat.half_range();
        let floor = 0.01 * r;
        let d0 = (r * r - dev * dev).max(floor * floor).sqrt();
        solution[duc + j] = d0;
        solution[duc + dsat + j] = match multiplier_guess {
            MultiplierGuess::Auto => sat.weight / (2.0 * d0),
            MultiplierGuess::Uniform(value) => *value,
            MultiplierGuess::Full(values) => values[j],
        };
    }

    let mut lambda = DVector::zeros(model.dim_state());
    model.phix_func(t0, state.as_slice(), lambda.as_mut_slice());

    let mut problem = ZeroHorizonProblem {
        model,
        sats,
        difference_increment,
        lambda,
        dim_uc: duc,
        dim_sat: dsat,
        f_now: DVector::zeros(dim),
        f_shifted: DVector::zeros(dim),
        shifted: DVector::zeros(dim),
    };
    let mut gmres = MatrixFreeGmres::new(dim, krylov_dim.min(dim));
    let mut update = DVector::zeros(dim);
    let mut residual = DVector::zeros(dim);

    let mut residual_norm = f64::INFINITY;
    for iteration in 0..max_iterations {
        evaluate_kkt(
            model,
            sats,
            &problem.lambda,
            duc,
            dsat,
            t0,
            state,
            &solution,
            &mut residual,
        );
        residual_norm = residual.norm();
        if !residual_norm.is_finite() {
            return Err(SolverError::BootstrapDiverged {
                iterations: iteration,
                residual_norm,
            }
            .into());
        }
        if residual_norm < convergence_radius {
            debug!(
                "zero-horizon bootstrap converged after {iteration} iterations, \
                 residual {residual_norm:.3e}"
            );
            let mut out = ZeroHorizonSolution {
                control_and_constraints: DVector::from_column_slice(&solution.as_slice()[..duc]),
                dummy: DVector::from_column_slice(&solution.as_slice()[duc..duc + dsat]),
                multiplier: DVector::from_column_slice(&solution.as_slice()[duc + dsat..]),
                control_error: DVector::from_column_slice(&residual.as_slice()[..duc]),
                dummy_error: DVector::zeros(dsat),
                saturation_error: DVector::zeros(dsat),
                iterations: iteration,
                residual_norm,
            };
            for j in 0..dsat {
                out.dummy_error[j] = residual[duc + j];
                out.saturation_error[j] = residual[duc + dsat + j];
            }
            return Ok(out);
        }

        // Full Newton step, delta solved from a fresh Krylov basis each
        // iteration.
        update.fill(0.0);
        gmres.solve(&mut problem, t0, state, &solution, &mut update)?;
        solution += &update;
    }

    Err(SolverError::BootstrapDiverged {
        iterations: max_iterations,
        residual_norm,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scalar plant with quadratic Hamiltonian in the control, so the
    /// unsaturated root is `u = -lambda = -x0`.
    struct ScalarPlant;

    impl OcpModel for ScalarPlant {
        fn dim_state(&self) -> usize {
            1
        }

        fn dim_control_input(&self) -> usize {
            1
        }

        fn dim_constraints(&self) -> usize {
            0
        }

        fn state_func(&self, _t: f64, _state: &[f64], control_input: &[f64], out: &mut [f64]) {
            out[0] = control_input[0];
        }

        fn hu_func(
            &self,
            _t: f64,
            _state: &[f64],
            control_and_constraints: &[f64],
            lambda: &[f64],
            out: &mut [f64],
        ) {
            out[0] = control_and_constraints[0] + lambda[0];
        }

        fn hx_func(
            &self,
            _t: f64,
            state: &[f64],
            _control_and_constraints: &[f64],
            _lambda: &[f64],
            out: &mut [f64],
        ) {
            out[0] = state[0];
        }

        fn phix_func(&self, _t: f64, state: &[f64], out: &mut [f64]) {
            out[0] = state[0];
        }
    }

    fn bounded() -> SaturationList {
        let mut sats = SaturationList::new();
        sats.append(0, -2.0, 2.0, 0.01).expect("valid saturation");
        sats
    }

    #[test]
    fn test_bootstrap_finds_interior_root() {
        let state = DVector::from_vec(vec![0.5]);
        let solution = solve_zero_horizon(
            &ScalarPlant,
            &bounded(),
            1.0e-8,
            3,
            0.0,
            &state,
            &DVector::zeros(1),
            &MultiplierGuess::Auto,
            1.0e-10,
            50,
        )
        .expect("interior root should be found");

        assert!(
            solution.residual_norm < 1.0e-10,
            "terminal residual {} exceeds the radius",
            solution.residual_norm
        );
        // hu = u + lambda + (2u - min - max) mu = u + x0 + 2 u mu = 0,
        // so the root sits slightly inside u = -x0.
        let u = solution.control_and_constraints[0];
        assert!(
            (u + 0.5).abs() < 0.05,
            "root should be near the unsaturated optimum, got {u}"
        );
        let d = solution.dummy[0];
        let mu = solution.multiplier[0];
        assert!(d > 0.0, "dummy must stay positive, got {d}");
        assert!(
            (2.0 * mu * d - 0.01).abs() < 1.0e-9,
            "multiplier stationarity violated"
        );
        assert!(
            (u * u - 4.0 + d * d).abs() < 1.0e-9,
            "constraint circle violated"
        );
    }

    #[test]
    fn test_bootstrap_reports_divergence() {
        let state = DVector::from_vec(vec![0.5]);
        let err = solve_zero_horizon(
            &ScalarPlant,
            &bounded(),
            1.0e-8,
            3,
            0.0,
            &state,
            &DVector::zeros(1),
            &MultiplierGuess::Auto,
            1.0e-10,
            0,
        )
        .expect_err("zero iterations cannot converge");
        assert!(
            err.downcast_ref::<SolverError>()
                .is_some_and(|e| matches!(e, SolverError::BootstrapDiverged { .. })),
            "expected BootstrapDiverged, got {err:?}"
        );
    }

    #[test]
    fn test_bootstrap_rejects_mismatched_multiplier_guess() {
        let state = DVector::from_vec(vec![0.5]);
        let err = solve_zero_horizon(
            &ScalarPlant,
            &bounded(),
            1.0e-8,
            3,
            0.0,
            &state,
            &DVector::zeros(1),
            &MultiplierGuess::Full(DVector::zeros(3)),
            1.0e-10,
            50,
        )
        .expect_err("three multipliers for one saturation entry");
        assert!(err
            .downcast_ref::<SolverError>()
            .is_some_and(|e| matches!(e, SolverError::DimensionMismatch { .. })));
    }
}
