use rand::seq::SliceRandom;
use rand::Rng;

use crate::grid::Grid;
use crate::mdp::Action;

/// Action values for one state, indexed by `Action::index`.
pub type ActionValues = [f64; 4];


/// Deterministic policy over the free cells of a grid.
///
/// Walls and terminals have no entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    actions: Vec<Option<Action>>,
}

impl Policy {
    /// Same action in every free cell.
    pub fn uniform(grid: &Grid, a: Action) -> Policy {
        let actions = grid.states()
            .map(|s| if grid.is_free(s) { Some(a) } else { None })
            .collect();
        Policy { actions }
    }

    /// Build a policy by choosing an action for each free cell.
    pub fn from_fn<F>(grid: &Grid, mut choose: F) -> Policy
    where
        F: FnMut(usize) -> Action,
    {
        let actions = grid.states()
            .map(|s| if grid.is_free(s) { Some(choose(s)) } else { None })
            .collect();
        Policy { actions }
    }

    pub fn get(&self, s: usize) -> Option<Action> {
        self.actions.get(s).copied().flatten()
    }

    /// Change the action of a free cell. Returns false for walls and terminals.
    pub fn set(&mut self, s: usize, a: Action) -> bool {
        match self.actions.get_mut(s) {
            Some(slot @ Some(_)) => {
                *slot = Some(a);
                true
            }
            _ => false,
        }
    }

    /// (state, action) pairs in state order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Action)> + '_ {
        self.actions.iter().enumerate()
            .filter_map(|(s, a)| a.map(|a| (s, a)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


/// Every action whose value equals the maximum, in `Action::ALL` order.
pub fn maximizers(values: &ActionValues) -> Vec<Action> {
    let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Action::ALL.into_iter().filter(|a| values[a.index()] == best).collect()
}

/// Greedy action, taking the first maximizer on ties.
pub fn first_greedy(values: &ActionValues) -> Action {
    maximizers(values).first().copied().unwrap_or(Action::Up)
}

/// Greedy action, breaking ties uniformly at random among maximizers.
pub fn greedy<R: Rng + ?Sized>(values: &ActionValues, rng: &mut R) -> Action {
    maximizers(values).choose(rng).copied().unwrap_or(Action::Up)
}

/// Greedy policy over the free cells for a given action-value lookup.
pub fn extract_policy<F, R>(grid: &Grid, mut values: F, rng: &mut R) -> Policy
where
    F: FnMut(usize) -> ActionValues,
    R: Rng + ?Sized,
{
    Policy::from_fn(grid, |s| greedy(&values(s), rng))
}

/// One-step action values of every action in `s` under utilities `utility`.
pub fn action_values<F>(grid: &Grid, s: usize, gamma: f64, utility: F) -> ActionValues
where
    F: Fn(usize) -> f64,
{
    Action::ALL.map(|a| grid.lookahead(s, a, gamma, &utility))
}


/// Path obtained by following a policy with intended moves only.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// States visited, starting with the start state.
    pub states: Vec<usize>,
    /// True when the walk ended on a goal or pit rather than a repeat.
    pub reaches_terminal: bool,
}

/// Follow `policy` from `start` until a terminal or an already visited state.
pub fn plan(grid: &Grid, policy: &Policy, start: usize) -> Plan {
    let mut visited = vec![false; grid.num_states()];
    let mut actions = Vec::new();
    let mut states = vec![start];
    let mut s = start;
    while !grid.is_terminal(s) && !visited[s] {
        visited[s] = true;
        let Some(a) = policy.get(s) else { break };
        actions.push(a);
        s = grid.step(s, a);
        states.push(s);
    }
    Plan { actions, states, reaches_terminal: grid.is_terminal(s) }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::classic;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use test_case::test_case;

    #[test]
    fn build_uniform_policy() {
        // Act
        let grid = classic();
        let pi = Policy::uniform(&grid, Action::Up);
        // Assert
        assert_eq!(pi.len(), 9);
        assert_eq!(pi.get(0), Some(Action::Up));
        assert_eq!(pi.get(3), None);
        assert_eq!(pi.get(5), None);
        assert_eq!(pi.get(7), None);
        assert_eq!(pi.get(100), None);
    }

    #[test]
    fn set_ignores_terminals_and_walls() {
        let grid = classic();
        let mut pi = Policy::uniform(&grid, Action::Up);
        assert!(pi.set(0, Action::Right));
        assert!(!pi.set(3, Action::Right));
        assert!(!pi.set(5, Action::Right));
        assert_eq!(pi.get(0), Some(Action::Right));
        assert!(pi.iter().all(|(s, _)| grid.is_free(s)));
    }

    #[test_case([1.0, 0.0, 0.0, 0.0], vec![Action::Up]; "Single max")]
    #[test_case([0.0, 0.0, 0.0, 0.0], Action::ALL.to_vec(); "All tied")]
    #[test_case([-1.0, 0.5, -2.0, 0.5], vec![Action::Down, Action::Right]; "Two tied")]
    fn find_maximizers(values: ActionValues, expected: Vec<Action>) {
        assert_eq!(maximizers(&values), expected);
    }

    #[test]
    fn first_greedy_is_deterministic() {
        assert_eq!(first_greedy(&[0.0, 0.5, 0.5, 0.1]), Action::Down);
    }

    #[test]
    fn greedy_breaks_ties_uniformly() {
        // Arrange
        let mut rng = StdRng::seed_from_u64(3);
        let values = [0.0; 4];
        let mut counts = [0usize; 4];
        // Act
        for _ in 0..4000 {
            counts[greedy(&values, &mut rng).index()] += 1;
        }
        // Assert
        for count in counts {
            assert!(count > 850 && count < 1150, "count {}", count);
        }
    }

    #[test]
    fn greedy_never_picks_non_maximizer() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let a = greedy(&[0.2, -0.1, 0.2, 0.0], &mut rng);
            assert!(a == Action::Up || a == Action::Left);
        }
    }

    #[test]
    fn plan_follows_policy_to_goal() {
        // Arrange
        let grid = classic();
        let mut pi = Policy::uniform(&grid, Action::Up);
        for s in [0, 1, 2] {
            pi.set(s, Action::Right);
        }
        // Act
        let path = plan(&grid, &pi, 8);
        // Assert
        assert!(path.reaches_terminal);
        assert_eq!(path.states, vec![8, 4, 0, 1, 2, 3]);
        assert_eq!(path.actions.len(), 5);
    }

    #[test]
    fn plan_stops_on_cycle() {
        let grid = classic();
        let pi = Policy::uniform(&grid, Action::Up);
        let path = plan(&grid, &pi, 8);
        assert!(!path.reaches_terminal);
        // 8 -> 4 -> 0 -> 0 repeats.
        assert_eq!(path.states, vec![8, 4, 0, 0]);
    }
}
