use thiserror::Error;

/// Failure classes a caller may need to match on.
///
/// Everything else in the crate surfaces as a plain `anyhow` error with
/// context; these variants cover the cases where the distinction changes
/// caller behavior (re-seeding, rejecting configuration, fixing call order).
#[derive(Debug, Error)]
pub enum SolverError {
    /// A collaborator buffer does not match the model-declared dimensions.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The zero-horizon bootstrap solver failed to reach the convergence
    /// radius; the controller stays uninitialized.
    #[error("bootstrap solver diverged: residual norm {residual_norm} after {iterations} iterations")]
    BootstrapDiverged {
        iterations: usize,
        residual_norm: f64,
    },

    /// `control_update` or `error_norm` was called before `initialize`.
    #[error("solver used before initialization")]
    NotInitialized,
}
