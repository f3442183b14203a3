use ndarray::{Array1, Array2};
use tracing::debug;

use crate::error::MdpError;
use crate::grid::Grid;
use crate::linear;
use crate::mdp::Action;
use crate::policy::{action_values, first_greedy, Policy};
use crate::trace::Trace;

/// An improvement must beat the current action by more than this to count.
pub const IMPROVEMENT_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyIterationSettings {
    /// Discount rate
    pub gamma: f64,
}

#[derive(Debug, Clone)]
pub struct PolicyIterationResult {
    pub policy: Policy,
    /// Utilities of the final policy, indexed by state. Zero off free cells.
    pub utilities: Array1<f64>,
    /// Index of the iteration that left the policy unchanged.
    pub iterations: usize,
}


/// Exact policy evaluation followed by greedy improvement, repeated until
/// the policy is stable.
pub struct PolicyIteration<'a> {
    grid: &'a Grid,
    gamma: f64,
    free: Vec<usize>,
    /// Row of each free state in the linear system.
    index: Vec<Option<usize>>,
}

impl<'a> PolicyIteration<'a> {
    pub fn new(grid: &'a Grid, settings: PolicyIterationSettings) -> PolicyIteration<'a> {
        let free = grid.free_states();
        let mut index = vec![None; grid.num_states()];
        for (i, &s) in free.iter().enumerate() {
            index[s] = Some(i);
        }
        PolicyIteration { grid, gamma: settings.gamma, free, index }
    }

    /// Build `A * U = b` for a fixed policy.
    ///
    /// Row i is `U[s] - sum gamma * p * U[s'] = sum p * R(s')` over the
    /// outcomes of `pi(s)`. Terminal and wall destinations only contribute
    /// their reward.
    pub fn linear_system(&self, policy: &Policy) -> (Array2<f64>, Array1<f64>) {
        let n = self.free.len();
        let mut a = Array2::<f64>::eye(n);
        let mut b = Array1::<f64>::zeros(n);
        for (i, &s) in self.free.iter().enumerate() {
            let action = policy.get(s).unwrap_or(Action::Up);
            for outcome in self.grid.outcomes(s, action) {
                b[i] += outcome.prob * self.grid.reward(outcome.state);
                if let Some(j) = self.index[outcome.state] {
                    a[[i, j]] -= self.gamma * outcome.prob;
                }
            }
        }
        (a, b)
    }

    /// Utilities of `policy`, solved exactly. Indexed by state.
    pub fn evaluate(&self, policy: &Policy) -> Result<Array1<f64>, MdpError> {
        let (a, b) = self.linear_system(policy);
        let solution = linear::solve(&a, &b)?;
        let mut utilities = Array1::<f64>::zeros(self.grid.num_states());
        for (i, &s) in self.free.iter().enumerate() {
            utilities[s] = solution[i];
        }
        Ok(utilities)
    }

    /// Greedy improvement against `utilities`. Returns the new policy and
    /// whether any cell changed action.
    pub fn improve<T: Trace + ?Sized>(
        &self, policy: &Policy, utilities: &Array1<f64>, trace: &mut T,
    ) -> Result<(Policy, bool), MdpError> {
        let mut improved = policy.clone();
        let mut changed = false;
        for &s in &self.free {
            let current = policy.get(s).unwrap_or(Action::Up);
            let values = action_values(self.grid, s, self.gamma, |t| utilities[t]);
            let best = first_greedy(&values);
            let chosen =
                if values[best.index()] > values[current.index()] + IMPROVEMENT_EPSILON {
                    improved.set(s, best);
                    changed = true;
                    best
                } else {
                    current
                };
            trace.pi_improved(self.grid, s, current, &values, chosen)?;
        }
        Ok((improved, changed))
    }

    /// Run from an all-`Up` policy until no cell changes action.
    pub fn run<T: Trace + ?Sized>(&self, trace: &mut T) -> Result<PolicyIterationResult, MdpError> {
        let mut policy = Policy::uniform(self.grid, Action::Up);
        trace.pi_start(self.grid, &policy)?;
        let mut iteration = 0;
        loop {
            let utilities = self.evaluate(&policy)?;
            trace.pi_evaluated(iteration, self.grid, &policy, &utilities)?;
            let (improved, changed) = self.improve(&policy, &utilities, trace)?;
            policy = improved;
            trace.pi_iteration_end(iteration, self.grid, &policy, changed)?;
            debug!(iteration, changed, "policy iteration step");
            if !changed {
                return Ok(PolicyIterationResult { policy, utilities, iterations: iteration });
            }
            iteration += 1;
        }
    }
}
