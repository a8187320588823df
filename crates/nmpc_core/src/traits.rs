/// Represents an optimal control problem: plant dynamics plus the partial
/// derivatives of its Hamiltonian `H = L + lambda' f`.
///
/// All callbacks write into caller-supplied buffers sized by the `dim_*`
/// accessors. `control_input` carries only the control components for
/// `state_func`; `hu_func` and `hx_func` receive the full
/// control-and-constraints segment of a horizon node.
pub trait OcpModel {
    /// Dimension of the state space.
    fn dim_state(&self) -> usize;

    /// Dimension of the control input.
    fn dim_control_input(&self) -> usize;

    /// Dimension of the generic equality constraints appended to the
    /// control input at each horizon node.
    fn dim_constraints(&self) -> usize;

    /// Evaluates the state equation dx/dt = f(t, x, u).
    fn state_func(&self, t: f64, state: &[f64], control_input: &[f64], out: &mut [f64]);

    /// Evaluates dH/du, the Hamiltonian gradient with respect to the
    /// control input and constraint variables.
    fn hu_func(
        &self,
        t: f64,
        state: &[f64],
        control_and_constraints: &[f64],
        lambda: &[f64],
        out: &mut [f64],
    );

    /// Evaluates dH/dx, the Hamiltonian gradient with respect to the state.
    fn hx_func(
        &self,
        t: f64,
        state: &[f64],
        control_and_constraints: &[f64],
        lambda: &[f64],
        out: &mut [f64],
    );

    /// Evaluates dphi/dx, the terminal cost gradient anchoring the costate
    /// at the end of the horizon.
    fn phix_func(&self, t: f64, state: &[f64], out: &mut [f64]);

    /// Combined dimension of the control input and constraint variables
    /// owned by one horizon node.
    fn dim_control_and_constraints(&self) -> usize {
        self.dim_control_input() + self.dim_constraints()
    }
}
