use ndarray::Array1;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::MdpError;
use crate::grid::Grid;
use crate::mdp::Action;
use crate::policy::{self, action_values, greedy, Plan, Policy};
use crate::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueIterationSettings {
    /// Discount rate
    pub gamma: f64,
    /// Stop once the L1 change of a sweep drops below this.
    pub tolerance: f64,
    /// Optional cap on the number of sweeps.
    pub max_sweeps: Option<usize>,
    /// Where the greedy plan starts.
    pub start: usize,
}

#[derive(Debug, Clone)]
pub struct ValueIterationResult {
    /// Indexed by state. Walls and terminals stay at zero.
    pub utilities: Array1<f64>,
    pub sweeps: usize,
    /// False when the sweep cap was hit first.
    pub converged: bool,
    pub policy: Policy,
    pub plan: Plan,
}


pub struct ValueIteration<'a> {
    grid: &'a Grid,
    settings: ValueIterationSettings,
    free: Vec<usize>,
}

impl<'a> ValueIteration<'a> {
    pub fn new(grid: &'a Grid, settings: ValueIterationSettings) -> ValueIteration<'a> {
        ValueIteration { grid, settings, free: grid.free_states() }
    }

    /// One synchronous Bellman sweep. Every backup reads the previous
    /// utilities. Returns the new utilities and the L1 change over free cells.
    pub fn sweep<T: Trace + ?Sized>(
        &self, sweep: usize, utilities: &Array1<f64>, trace: &mut T,
    ) -> Result<(Array1<f64>, f64), MdpError> {
        let gamma = self.settings.gamma;
        let mut next = utilities.clone();
        trace.vi_sweep_start(sweep)?;
        for &s in &self.free {
            let values = action_values(self.grid, s, gamma, |t| utilities[t]);
            next[s] = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            trace.vi_backup(sweep, self.grid, s, gamma, utilities, &values)?;
        }
        let delta = self.free.iter().map(|&s| (utilities[s] - next[s]).abs()).sum();
        Ok((next, delta))
    }

    /// Greedy policy for `utilities`, ties broken at random.
    pub fn extract<T, R>(
        &self, utilities: &Array1<f64>, rng: &mut R, trace: &mut T,
    ) -> Result<Policy, MdpError>
    where
        T: Trace + ?Sized,
        R: Rng + ?Sized,
    {
        let gamma = self.settings.gamma;
        let mut policy = Policy::uniform(self.grid, Action::Up);
        for &s in &self.free {
            let values = action_values(self.grid, s, gamma, |t| utilities[t]);
            let best = greedy(&values, rng);
            policy.set(s, best);
            trace.vi_extracted(self.grid, s, gamma, utilities, &values, best)?;
        }
        Ok(policy)
    }

    pub fn run<T, R>(&self, rng: &mut R, trace: &mut T) -> Result<ValueIterationResult, MdpError>
    where
        T: Trace + ?Sized,
        R: Rng + ?Sized,
    {
        let tolerance = self.settings.tolerance;
        let mut utilities = Array1::<f64>::zeros(self.grid.num_states());
        let mut sweep = 1;
        let converged = loop {
            let (next, delta) = self.sweep(sweep, &utilities, trace)?;
            trace.vi_sweep_end(sweep, self.grid, &next, delta)?;
            debug!(sweep, delta, "value iteration sweep");
            utilities = next;
            if delta < tolerance {
                trace.vi_stopped(sweep, tolerance, true)?;
                break true;
            }
            if self.settings.max_sweeps.is_some_and(|max| sweep >= max) {
                warn!(sweep, delta, tolerance, "sweep cap reached before convergence");
                trace.vi_stopped(sweep, tolerance, false)?;
                break false;
            }
            sweep += 1;
        };

        let policy = self.extract(&utilities, rng, trace)?;
        let plan = policy::plan(self.grid, &policy, self.settings.start);
        trace.vi_finished(self.grid, &policy, &plan)?;
        Ok(ValueIterationResult { utilities, sweeps: sweep, converged, policy, plan })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::classic;
    use crate::policy_iteration::{PolicyIteration, PolicyIterationSettings};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use test_case::test_case;

    fn settings(gamma: f64, tolerance: f64) -> ValueIterationSettings {
        ValueIterationSettings { gamma, tolerance, max_sweeps: None, start: 8 }
    }

    #[test]
    fn first_sweep_from_zero() {
        // Arrange
        let grid = classic();
        let vi = ValueIteration::new(&grid, settings(0.9, 1e-3));
        let zero = Array1::<f64>::zeros(grid.num_states());
        // Act
        let (u, delta) = vi.sweep(1, &zero, &mut ()).unwrap();
        // Assert: next to the goal the best move is right, elsewhere only living cost.
        assert_abs_diff_eq!(u[2], 0.8 - 0.008, epsilon = 1e-12);
        assert_abs_diff_eq!(u[0], -0.04, epsilon = 1e-12);
        assert_eq!(u[3], 0.0);
        assert_eq!(u[7], 0.0);
        assert_eq!(u[5], 0.0);
        let expected_delta: f64 = grid.free_states().iter().map(|&s| u[s].abs()).sum();
        assert_abs_diff_eq!(delta, expected_delta, epsilon = 1e-12);
    }

    #[test]
    fn sweep_is_synchronous() {
        // State 1 only sees the goal through state 2's previous value.
        let grid = classic();
        let vi = ValueIteration::new(&grid, settings(0.9, 1e-3));
        let zero = Array1::<f64>::zeros(grid.num_states());
        let (u, _) = vi.sweep(1, &zero, &mut ()).unwrap();
        assert_abs_diff_eq!(u[1], -0.04, epsilon = 1e-12);
    }

    #[test]
    fn deltas_shrink() {
        // Arrange
        let grid = classic();
        let vi = ValueIteration::new(&grid, settings(0.9, 1e-6));
        let mut u = Array1::<f64>::zeros(grid.num_states());
        let mut deltas = Vec::new();
        // Act
        for sweep in 1..=60 {
            let (next, delta) = vi.sweep(sweep, &u, &mut ()).unwrap();
            deltas.push(delta);
            u = next;
        }
        // Assert
        assert!(deltas[59] < 1e-3);
        for pair in deltas[20..].windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12);
        }
    }

    #[test_case(1e-2; "Loose tolerance")]
    #[test_case(1e-4; "Medium tolerance")]
    #[test_case(1e-8; "Tight tolerance")]
    fn terminates_for_positive_tolerance(tolerance: f64) {
        let grid = classic();
        let mut rng = StdRng::seed_from_u64(1);
        let result = ValueIteration::new(&grid, settings(0.9, tolerance))
            .run(&mut rng, &mut ()).unwrap();
        assert!(result.converged);
        assert!(result.sweeps > 1);
    }

    #[test]
    fn sweep_cap_stops_unconverged() {
        let grid = classic();
        let mut rng = StdRng::seed_from_u64(1);
        let capped = ValueIterationSettings { max_sweeps: Some(3), ..settings(0.9, 1e-12) };
        let result = ValueIteration::new(&grid, capped).run(&mut rng, &mut ()).unwrap();
        assert!(!result.converged);
        assert_eq!(result.sweeps, 3);
        assert_eq!(result.policy.len(), 9);
    }

    #[test]
    fn plan_reaches_goal() {
        // Act
        let grid = classic();
        let mut rng = StdRng::seed_from_u64(5);
        let result = ValueIteration::new(&grid, settings(0.9, 1e-6))
            .run(&mut rng, &mut ()).unwrap();
        // Assert
        assert!(result.plan.reaches_terminal);
        assert_eq!(result.plan.states, vec![8, 4, 0, 1, 2, 3]);
        assert_eq!(
            result.plan.actions,
            vec![Action::Up, Action::Up, Action::Right, Action::Right, Action::Right]
        );
    }

    #[test]
    fn agrees_with_policy_iteration() {
        // Arrange
        let grid = classic();
        let mut rng = StdRng::seed_from_u64(9);
        // Act
        let vi = ValueIteration::new(&grid, settings(0.9, 1e-9))
            .run(&mut rng, &mut ()).unwrap();
        let pi = PolicyIteration::new(&grid, PolicyIterationSettings { gamma: 0.9 })
            .run(&mut ()).unwrap();
        // Assert
        for s in grid.free_states() {
            assert_eq!(vi.policy.get(s), pi.policy.get(s), "state {}", s);
            assert_abs_diff_eq!(vi.utilities[s], pi.utilities[s], epsilon = 1e-6);
        }
        for s in [3, 5, 7] {
            assert_eq!(vi.policy.get(s), None);
        }
    }
}
