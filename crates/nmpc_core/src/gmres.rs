use anyhow::{bail, Result};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

/// Residual hooks through which the matrix-free GMRES engine sees a problem.
///
/// The engine never forms a Jacobian: `residual` supplies the right-hand
/// side `b` of the Newton system (evaluated consistently with the current
/// update guess, so the solve is warm-started), and `directional_residual`
/// realizes the product `A * direction` as a forward-difference directional
/// derivative.
pub trait MatrixFreeProblem {
    /// Writes the right-hand side of `A x = b` into `out`.
    fn residual(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        update_guess: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()>;

    /// Writes `A * direction` into `out`.
    fn directional_residual(
        &mut self,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        direction: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()>;
}

/// Fixed-size matrix-free GMRES with a Givens-rotation QR of the Hessenberg
/// least-squares problem. All buffers are allocated once; one `solve` call
/// performs at most `kmax` hook evaluations and never iterates to
/// convergence, which is what keeps the per-tick work of the continuation
/// method bounded.
pub struct MatrixFreeGmres {
    dim: usize,
    kmax: usize,
    basis: DMatrix<f64>,
    hessenberg: DMatrix<f64>,
    b: DVector<f64>,
    v: DVector<f64>,
    w: DVector<f64>,
    givens_c: DVector<f64>,
    givens_s: DVector<f64>,
    g: DVector<f64>,
    y: DVector<f64>,
}

impl MatrixFreeGmres {
    /// `dim` is the unknown dimension, `kmax` the Krylov subspace dimension
    /// (capped at `dim`).
    pub fn new(dim: usize, kmax: usize) -> Self {
        let kmax = kmax.min(dim);
        Self {
            dim,
            kmax,
            basis: DMatrix::zeros(dim, kmax + 1),
            hessenberg: DMatrix::zeros(kmax + 1, kmax),
            b: DVector::zeros(dim),
            v: DVector::zeros(dim),
            w: DVector::zeros(dim),
            givens_c: DVector::zeros(kmax + 1),
            givens_s: DVector::zeros(kmax + 1),
            g: DVector::zeros(kmax + 1),
            y: DVector::zeros(kmax),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Runs one fixed-size GMRES pass and accumulates the resulting Krylov
    /// correction into `update`. Because the `residual` hook sees the
    /// incoming `update` as its warm-start guess, the correction is relative
    /// to it rather than to zero.
    pub fn solve<P: MatrixFreeProblem>(
        &mut self,
        problem: &mut P,
        t: f64,
        state: &DVector<f64>,
        solution: &DVector<f64>,
        update: &mut DVector<f64>,
    ) -> Result<()> {
        problem.residual(t, state, solution, update, &mut self.b)?;

        let beta = self.b.norm();
        if !beta.is_finite() {
            bail!("GMRES right-hand side is not finite (norm = {beta}).");
        }
        if beta <= f64::MIN_POSITIVE {
            // Warm-start guess already solves the system.
            return Ok(());
        }

        self.givens_c.fill(0.0);
        self.givens_s.fill(0.0);
        self.g.fill(0.0);
        self.g[0] = beta;
        let mut first = self.basis.column_mut(0);
        first.copy_from(&self.b);
        first /= beta;

        let mut columns = 0;
        for k in 0..self.kmax {
            self.v.copy_from(&self.basis.column(k));
            problem.directional_residual(t, state, solution, &self.v, &mut self.w)?;

            // Modified Gram-Schmidt against the existing basis.
            for j in 0..=k {
                let hjk = self.w.dot(&self.basis.column(j));
                self.hessenberg[(j, k)] = hjk;
                self.w.axpy(-hjk, &self.basis.column(j), 1.0);
            }
            let wnorm = self.w.norm();
            self.hessenberg[(k + 1, k)] = wnorm;
            let breakdown = wnorm < 1e-14 * beta.max(1.0);
            if !breakdown {
                let mut next = self.basis.column_mut(k + 1);
                next.copy_from(&self.w);
                next /= wnorm;
            }

            // Apply the accumulated rotations to the new Hessenberg column,
            // then eliminate its subdiagonal entry.
            for j in 0..k {
                let h0 = self.hessenberg[(j, k)];
                let h1 = self.hessenberg[(j + 1, k)];
                self.hessenberg[(j, k)] = self.givens_c[j] * h0 - self.givens_s[j] * h1;
                self.hessenberg[(j + 1, k)] = self.givens_s[j] * h0 + self.givens_c[j] * h1;
            }
            let hkk = self.hessenberg[(k, k)];
            let hk1k = self.hessenberg[(k + 1, k)];
            let nu = hkk.hypot(hk1k);
            if nu < 1e-30 {
                warn!("GMRES lost orthogonality of the Krylov basis at column {k}");
                break;
            }
            self.givens_c[k] = hkk / nu;
            self.givens_s[k] = -hk1k / nu;
            self.hessenberg[(k, k)] = nu;
            self.hessenberg[(k + 1, k)] = 0.0;
            let g0 = self.g[k];
            let g1 = self.g[k + 1];
            self.g[k] = self.givens_c[k] * g0 - self.givens_s[k] * g1;
            self.g[k + 1] = self.givens_s[k] * g0 + self.givens_c[k] * g1;

            columns = k + 1;
            if breakdown {
                debug!("GMRES happy breakdown at column {k}");
                break;
            }
        }

        // Back substitution of the triangularized least-squares problem.
        for i in (0..columns).rev() {
            let mut tmp = self.g[i];
            for j in (i + 1)..columns {
                tmp -= self.hessenberg[(i, j)] * self.y[j];
            }
            self.y[i] = tmp / self.hessenberg[(i, i)];
        }
        for j in 0..columns {
            update.axpy(self.y[j], &self.basis.column(j), 1.0);
        }

        Ok(())
    }
}
