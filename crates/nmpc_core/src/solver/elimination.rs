//! Closed-form elimination of the saturation variables.
//!
//! Each box constraint couples only its own dummy/multiplier pair to the
//! rest of the KKT system, so the 2x2 self-derivative block per saturated
//! component can be inverted analytically instead of enlarging the Krylov
//! unknown. Precondition throughout: dummy values are nonzero (the inverse
//! divides by `2 d_j` and `2 d_j^2`). That invariant is the update law's
//! responsibility and is only monitored in debug builds.

use nalgebra::DVector;

use crate::saturation::SaturationList;

/// Adds the partial derivative of the saturation residual with respect to
/// the control variables into one node's control/constraint residual.
pub(crate) fn add_saturation_derivative(
    sats: &SaturationList,
    uc_node: &[f64],
    multiplier_node: &[f64],
    out_node: &mut [f64],
) {
    for (j, sat) in sats.entries().iter().enumerate() {
        out_node[sat.index] +=
            (2.0 * uc_node[sat.index] - sat.min - sat.max) * multiplier_node[j];
    }
}

/// Complementarity-style residual pair for every node and saturated
/// component: dummy optimality `2 mu d - w` and constraint-satisfaction
/// optimality `(u - mid)^2 - half_range^2 + d^2`.
pub(crate) fn saturation_residual(
    sats: &SaturationList,
    duc: usize,
    uc_seq: &DVector<f64>,
    dummy_traj: &[DVector<f64>],
    multiplier_traj: &[DVector<f64>],
    out_dummy: &mut [DVector<f64>],
    out_saturation: &mut [DVector<f64>],
) {
    for i in 0..dummy_traj.len() {
        for (j, sat) in sats.entries().iter().enumerate() {
            out_dummy[i][j] = 2.0 * multiplier_traj[i][j] * dummy_traj[i][j] - sat.weight;
        }
        for (j, sat) in sats.entries().iter().enumerate() {
            let deviation = uc_seq[i * duc + sat.index] - sat.mid();
            let half_range = sat.half_range();
            out_saturation[i][j] =
                deviation * deviation - half_range * half_range + dummy_traj[i][j] * dummy_traj[i][j];
        }
    }
}

/// Effect of a perturbation `direction` of the control/constraint sequence
/// on the saturation residual. The dummy rows do not depend on the control
/// variables, so that block is zeroed.
pub(crate) fn multiply_saturation_derivative(
    sats: &SaturationList,
    duc: usize,
    uc_seq: &DVector<f64>,
    direction: &DVector<f64>,
    out_dummy: &mut [DVector<f64>],
    out_saturation: &mut [DVector<f64>],
) {
    for i in 0..out_dummy.len() {
        out_dummy[i].fill(0.0);
        for (j, sat) in sats.entries().iter().enumerate() {
            out_saturation[i][j] = (2.0 * uc_seq[i * duc + sat.index] - sat.min - sat.max)
                * direction[i * duc + sat.index];
        }
    }
}

/// Applies the inverse of the per-component 2x2 saturation self-derivative
/// to a desired residual change, yielding dummy/multiplier updates.
pub(crate) fn multiply_saturation_inverse(
    sats: &SaturationList,
    dummy_traj: &[DVector<f64>],
    multiplier_traj: &[DVector<f64>],
    rhs_dummy: &[DVector<f64>],
    rhs_saturation: &[DVector<f64>],
    out_dummy: &mut [DVector<f64>],
    out_saturation: &mut [DVector<f64>],
) {
    for i in 0..dummy_traj.len() {
        for j in 0..sats.dim_saturation() {
            let d = dummy_traj[i][j];
            debug_assert!(
                d != 0.0,
                "saturation dummy variable reached zero at node {i}, component {j}"
            );
            out_dummy[i][j] = rhs_saturation[i][j] / (2.0 * d);
            out_saturation[i][j] = rhs_dummy[i][j] / (2.0 * d)
                - rhs_saturation[i][j] * multiplier_traj[i][j] / (2.0 * d * d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_saturation() -> SaturationList {
        let mut sats = SaturationList::new();
        sats.append(0, -10.0, 10.0, 0.001).expect("valid saturation");
        sats
    }

    fn node_buffers(dim: usize, n: usize) -> Vec<DVector<f64>> {
        (0..n).map(|_| DVector::zeros(dim)).collect()
    }

    #[test]
    fn test_saturation_residual_vanishes_on_the_constraint_circle() {
        // For u strictly inside (min, max) there is a unique positive dummy
        // with (u - mid)^2 + d^2 = half_range^2; at that pair the
        // constraint-satisfaction row is zero for any multiplier.
        let sats = single_saturation();
        let u = 3.7;
        let d = (10.0_f64.powi(2) - u * u).sqrt();

        let uc_seq = DVector::from_vec(vec![u]);
        let dummy = vec![DVector::from_vec(vec![d])];
        let multiplier = vec![DVector::from_vec(vec![42.0])];
        let mut out_dummy = node_buffers(1, 1);
        let mut out_sat = node_buffers(1, 1);
        saturation_residual(
            &sats,
            1,
            &uc_seq,
            &dummy,
            &multiplier,
            &mut out_dummy,
            &mut out_sat,
        );
        assert!(
            out_sat[0][0].abs() < 1e-12,
            "constraint row should vanish on the circle, got {}",
            out_sat[0][0]
        );

        // The dummy row vanishes exactly when 2 mu d = w.
        let consistent_mu = vec![DVector::from_vec(vec![0.001 / (2.0 * d)])];
        saturation_residual(
            &sats,
            1,
            &uc_seq,
            &dummy,
            &consistent_mu,
            &mut out_dummy,
            &mut out_sat,
        );
        assert!(
            out_dummy[0][0].abs() < 1e-15,
            "dummy row should vanish at mu = w / (2 d), got {}",
            out_dummy[0][0]
        );
    }

    #[test]
    fn test_inverse_undoes_self_derivative() {
        // The self-derivative block per component is
        //   [ 2 mu   2 d ]   (dummy row:       d/dd, d/dmu)
        //   [ 2 d    0   ]   (saturation row:  d/dd, d/dmu)
        // Applying it and then `multiply_saturation_inverse` must give back
        // the original (delta_d, delta_mu).
        let sats = single_saturation();
        let d = 4.0;
        let mu = 0.3;
        let dummy = vec![DVector::from_vec(vec![d])];
        let multiplier = vec![DVector::from_vec(vec![mu])];

        let delta_d = 0.7;
        let delta_mu = -0.2;
        let rhs_dummy = vec![DVector::from_vec(vec![2.0 * mu * delta_d + 2.0 * d * delta_mu])];
        let rhs_sat = vec![DVector::from_vec(vec![2.0 * d * delta_d])];

        let mut out_dummy = node_buffers(1, 1);
        let mut out_sat = node_buffers(1, 1);
        multiply_saturation_inverse(
            &sats,
            &dummy,
            &multiplier,
            &rhs_dummy,
            &rhs_sat,
            &mut out_dummy,
            &mut out_sat,
        );

        assert!(
            (out_dummy[0][0] - delta_d).abs() < 1e-12,
            "inverse should recover the dummy perturbation: got {}",
            out_dummy[0][0]
        );
        assert!(
            (out_sat[0][0] - delta_mu).abs() < 1e-12,
            "inverse should recover the multiplier perturbation: got {}",
            out_sat[0][0]
        );
    }

    #[test]
    fn test_directional_derivative_matches_residual_difference() {
        // multiply_saturation_derivative is the exact derivative of the
        // saturation rows with respect to the control sequence, so it must
        // match a finite difference of saturation_residual to first order.
        let sats = single_saturation();
        let duc = 2;
        let n = 3;
        let uc_seq = DVector::from_vec(vec![1.0, 0.0, -2.5, 0.0, 4.0, 0.0]);
        let direction = DVector::from_vec(vec![0.3, 0.0, -0.8, 0.0, 0.1, 0.0]);
        let dummy: Vec<_> = (0..n).map(|i| DVector::from_vec(vec![3.0 + i as f64])).collect();
        let multiplier: Vec<_> = (0..n).map(|_| DVector::from_vec(vec![0.05])).collect();

        let mut exact_dummy = node_buffers(1, n);
        let mut exact_sat = node_buffers(1, n);
        multiply_saturation_derivative(
            &sats,
            duc,
            &uc_seq,
            &direction,
            &mut exact_dummy,
            &mut exact_sat,
        );

        let h = 1e-7;
        let perturbed = &uc_seq + h * &direction;
        let mut base_dummy = node_buffers(1, n);
        let mut base_sat = node_buffers(1, n);
        let mut pert_dummy = node_buffers(1, n);
        let mut pert_sat = node_buffers(1, n);
        saturation_residual(&sats, duc, &uc_seq, &dummy, &multiplier, &mut base_dummy, &mut base_sat);
        saturation_residual(
            &sats,
            duc,
            &perturbed,
            &dummy,
            &multiplier,
            &mut pert_dummy,
            &mut pert_sat,
        );

        for i in 0..n {
            let fd = (pert_sat[i][0] - base_sat[i][0]) / h;
            assert!(
                (exact_dummy[i][0]).abs() < 1e-15,
                "dummy rows do not depend on the control sequence"
            );
            assert!(
                (fd - exact_sat[i][0]).abs() < 1e-5,
                "analytic and finite-difference directional derivatives should agree at node {i}: {fd} vs {}",
                exact_sat[i][0]
            );
        }
    }
}
