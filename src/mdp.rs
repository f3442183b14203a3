use rand::Rng;

use crate::grid::{Cell, Grid};

/// Probability of moving in the intended direction.
pub const INTENDED_PROB: f64 = 0.8;
/// Probability of drifting to each of the two orthogonal directions.
pub const DRIFT_PROB: f64 = 0.1;

pub const GOAL_REWARD: f64 = 1.0;
pub const PIT_REWARD: f64 = -1.0;
/// Reward for landing anywhere that is not a terminal.
pub const LIVING_COST: f64 = -0.04;


/// Movement directions available in every free cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
}

impl Action {
    /// Fixed order used for action-value tables and tie-breaking.
    pub const ALL: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

    pub fn index(self) -> usize {
        match self {
            Action::Up => 0,
            Action::Down => 1,
            Action::Left => 2,
            Action::Right => 3,
        }
    }

    /// The two directions perpendicular to this one.
    pub fn orthogonal(self) -> [Action; 2] {
        match self {
            Action::Up | Action::Down => [Action::Left, Action::Right],
            Action::Left | Action::Right => [Action::Up, Action::Down],
        }
    }

    /// (row, col) offset.
    fn offset(self) -> (isize, isize) {
        match self {
            Action::Up => (-1, 0),
            Action::Down => (1, 0),
            Action::Left => (0, -1),
            Action::Right => (0, 1),
        }
    }
}


/// One destination of a stochastic move and its probability mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub state: usize,
    pub prob: f64,
}


impl Grid {
    /// Deterministic unit move. Moving off the grid or into a wall leaves
    /// the agent where it was.
    pub fn step(&self, s: usize, a: Action) -> usize {
        let (r, c) = self.coords(s);
        let (dr, dc) = a.offset();
        let (Some(nr), Some(nc)) = (r.checked_add_signed(dr), c.checked_add_signed(dc)) else {
            return s;
        };
        match self.cell_at(nr, nc) {
            None | Some(Cell::Wall) => s,
            Some(_) => self.state(nr, nc),
        }
    }

    /// Outcome distribution of taking `a` in `s`.
    ///
    /// Entries are in intended, first drift, second drift order. Drifts that
    /// land on an already listed state add their mass to that entry, so every
    /// destination appears once and the masses sum to 1.
    pub fn outcomes(&self, s: usize, a: Action) -> Vec<Outcome> {
        let [o1, o2] = a.orthogonal();
        let moves = [
            (self.step(s, a), INTENDED_PROB),
            (self.step(s, o1), DRIFT_PROB),
            (self.step(s, o2), DRIFT_PROB),
        ];
        let mut outcomes: Vec<Outcome> = Vec::with_capacity(3);
        for (state, prob) in moves {
            match outcomes.iter_mut().find(|o| o.state == state) {
                Some(existing) => existing.prob += prob,
                None => outcomes.push(Outcome { state, prob }),
            }
        }
        outcomes
    }

    /// Draw a single next state for taking `a` in `s`.
    pub fn sample<R: Rng + ?Sized>(&self, s: usize, a: Action, rng: &mut R) -> usize {
        let [o1, o2] = a.orthogonal();
        let u: f64 = rng.gen();
        let actual = if u < INTENDED_PROB {
            a
        } else if u < INTENDED_PROB + DRIFT_PROB {
            o1
        } else {
            o2
        };
        self.step(s, actual)
    }

    /// Reward for arriving in `s`.
    pub fn reward(&self, s: usize) -> f64 {
        match self.cell(s) {
            Cell::Goal => GOAL_REWARD,
            Cell::Pit => PIT_REWARD,
            Cell::Free | Cell::Wall => LIVING_COST,
        }
    }

    /// Expected one-step return of `a` in `s`: sum of p * (R(s') + gamma * U(s')).
    pub fn lookahead<F>(&self, s: usize, a: Action, gamma: f64, utility: F) -> f64
    where
        F: Fn(usize) -> f64,
    {
        self.outcomes(s, a)
            .iter()
            .map(|o| o.prob * (self.reward(o.state) + gamma * utility(o.state)))
            .sum()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::classic;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use test_case::test_case;

    #[test_case(Action::Up, [Action::Left, Action::Right]; "Up")]
    #[test_case(Action::Down, [Action::Left, Action::Right]; "Down")]
    #[test_case(Action::Left, [Action::Up, Action::Down]; "Left")]
    #[test_case(Action::Right, [Action::Up, Action::Down]; "Right")]
    fn orthogonal_actions(a: Action, expected: [Action; 2]) {
        assert_eq!(a.orthogonal(), expected);
    }

    #[test_case(8, Action::Down, 8; "Bottom edge")]
    #[test_case(8, Action::Left, 8; "Left edge")]
    #[test_case(0, Action::Up, 0; "Top edge")]
    #[test_case(3, Action::Right, 3; "Right edge")]
    #[test_case(4, Action::Right, 4; "Into wall")]
    #[test_case(9, Action::Up, 9; "Into wall from below")]
    #[test_case(8, Action::Up, 4; "Free move")]
    #[test_case(2, Action::Right, 3; "Onto goal")]
    fn step_bounces(s: usize, a: Action, expected: usize) {
        let grid = classic();
        assert_eq!(grid.step(s, a), expected);
        // Bouncing again changes nothing.
        if expected == s {
            assert_eq!(grid.step(grid.step(s, a), a), s);
        }
    }

    #[test]
    fn outcomes_sum_to_one() {
        let grid = classic();
        for s in grid.free_states() {
            for a in Action::ALL {
                let outcomes = grid.outcomes(s, a);
                let total: f64 = outcomes.iter().map(|o| o.prob).sum();
                assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
                assert!(outcomes.len() <= 3);
                for (i, o) in outcomes.iter().enumerate() {
                    assert!(outcomes[i + 1..].iter().all(|other| other.state != o.state));
                }
            }
        }
    }

    #[test]
    fn outcomes_collapse_at_corner() {
        // Arrange
        let grid = classic();
        // Act: bottom-left corner moving left bounces, drifts up or bounces down.
        let outcomes = grid.outcomes(8, Action::Left);
        // Assert
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].state, 8);
        assert_abs_diff_eq!(outcomes[0].prob, 0.9, epsilon = 1e-12);
        assert_eq!(outcomes[1].state, 4);
        assert_abs_diff_eq!(outcomes[1].prob, 0.1, epsilon = 1e-12);
    }

    #[test_case(3, 1.0; "Goal")]
    #[test_case(7, -1.0; "Pit")]
    #[test_case(0, -0.04; "Free")]
    #[test_case(5, -0.04; "Wall")]
    fn reward_by_destination(s: usize, r: f64) {
        assert_eq!(classic().reward(s), r);
    }

    #[test]
    fn lookahead_next_to_goal() {
        let grid = classic();
        // 0.8 to goal, 0.1 bounce up, 0.1 down to state 6.
        let q = grid.lookahead(2, Action::Right, 0.9, |_| 0.0);
        assert_abs_diff_eq!(q, 0.8 * 1.0 + 0.1 * -0.04 + 0.1 * -0.04, epsilon = 1e-12);
    }

    #[test]
    fn sample_matches_distribution() {
        // Arrange
        let grid = classic();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20000;
        let mut counts = vec![0usize; grid.num_states()];
        // Act
        for _ in 0..n {
            counts[grid.sample(6, Action::Up, &mut rng)] += 1;
        }
        // Assert: up to 2, left bounces off the wall, right into the pit.
        assert_abs_diff_eq!(counts[2] as f64 / n as f64, 0.8, epsilon = 0.02);
        assert_abs_diff_eq!(counts[6] as f64 / n as f64, 0.1, epsilon = 0.02);
        assert_abs_diff_eq!(counts[7] as f64 / n as f64, 0.1, epsilon = 0.02);
    }
}
