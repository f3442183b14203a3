//! Optimal policies for a stochastic grid world.
//!
//! The agent moves in the intended direction with probability 0.8 and drifts
//! to either orthogonal direction with probability 0.1. Three solvers share
//! that model: exact policy iteration, value iteration and Q-learning.

pub mod config;
pub mod error;
pub mod grid;
pub mod linear;
pub mod mdp;
pub mod policy;
pub mod policy_iteration;
pub mod q_learning;
pub mod trace;
pub mod value_iteration;

pub use error::MdpError;
pub use grid::{Cell, Grid};
pub use mdp::Action;
pub use policy::Policy;
