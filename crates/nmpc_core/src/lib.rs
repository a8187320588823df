//! Real-time nonlinear model predictive control by the multiple-shooting
//! continuation/GMRES method with control-saturation elimination.
//!
//! The controller tracks the root of the discretized optimality system
//! across sampling instants instead of re-solving it: each tick performs a
//! single matrix-free GMRES solve for the time-derivative of the
//! control-and-constraints sequence and integrates it forward. Per-node
//! states, costates, and the dummy/multiplier pairs introduced by box
//! saturations are condensed out analytically, so the Krylov unknown stays
//! the size of the control sequence alone.
//!
//! Typical use: implement [`OcpModel`] for the optimal-control problem,
//! describe the input bounds with a [`SaturationList`], construct a
//! [`MultipleShootingNmpc`], call [`MultipleShootingNmpc::initialize`] once
//! at the initial state, then call [`MultipleShootingNmpc::control_update`]
//! every sampling period.

pub mod bootstrap;
pub mod error;
pub mod gmres;
pub mod horizon;
pub mod saturation;
pub mod simulation;
pub mod solver;
pub mod traits;

pub use bootstrap::{MultiplierGuess, ZeroHorizonSolution};
pub use error::SolverError;
pub use gmres::{MatrixFreeGmres, MatrixFreeProblem};
pub use horizon::HorizonSchedule;
pub use saturation::{ControlInputSaturation, SaturationList};
pub use simulation::{run_closed_loop, Rk4, SimulationRecord};
pub use solver::{MultipleShootingNmpc, SolverSettings};
pub use traits::OcpModel;
