use ndarray::Array2;
use rand::Rng;
use tracing::debug;

use crate::error::MdpError;
use crate::grid::Grid;
use crate::mdp::Action;
use crate::policy::{extract_policy, greedy, ActionValues, Policy};
use crate::trace::Trace;

/// Default cap on moves per episode.
pub const MAX_STEPS_PER_EPISODE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QLearningSettings {
    /// Discount rate
    pub gamma: f64,
    /// Learning rate
    pub alpha: f64,
    pub episodes: usize,
    pub max_steps: usize,
    /// Every episode starts here.
    pub start: usize,
}

/// How an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeEnd {
    /// Landed on a goal or pit (or started on one).
    Terminal { steps: usize },
    StepLimit { steps: usize },
}

/// One temporal-difference update, as applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TdUpdate {
    pub state: usize,
    /// Q-values of `state` when the action was chosen.
    pub values: ActionValues,
    pub action: Action,
    pub next: usize,
    pub reward: f64,
    pub alpha: f64,
    pub gamma: f64,
    pub q_old: f64,
    /// Q-values of `next`, or None when `next` is terminal.
    pub next_values: Option<ActionValues>,
    /// Continuation value used in the target. Zero at terminals.
    pub next_max: f64,
    pub q_new: f64,
}


/// Episodic Q-learning with greedy action choice.
///
/// The grid is only used as a simulator: one sampled next state per step.
/// Exploration comes from ties among equal Q-values and from the drift of
/// the environment.
pub struct QLearner<'a, R: Rng> {
    grid: &'a Grid,
    settings: QLearningSettings,
    /// Indexes: state, action
    q: Array2<f64>,
    rng: R,
}

impl<'a, R: Rng> QLearner<'a, R> {
    pub fn new(grid: &'a Grid, settings: QLearningSettings, rng: R) -> QLearner<'a, R> {
        let q = Array2::<f64>::zeros((grid.num_states(), Action::ALL.len()));
        QLearner { grid, settings, q, rng }
    }

    pub fn q_table(&self) -> &Array2<f64> {
        &self.q
    }

    pub fn q_values(&self, s: usize) -> ActionValues {
        q_row(&self.q, s)
    }

    /// Greedy action with a uniform random tie-break.
    pub fn choose_action(&mut self, s: usize) -> Action {
        greedy(&self.q_values(s), &mut self.rng)
    }

    /// Apply the update for taking `action` in `s` and landing in `next`.
    pub fn update(&mut self, s: usize, action: Action, next: usize) -> TdUpdate {
        let QLearningSettings { gamma, alpha, .. } = self.settings;
        let values = self.q_values(s);
        let reward = self.grid.reward(next);
        let next_values = if self.grid.is_terminal(next) {
            None
        } else {
            Some(self.q_values(next))
        };
        let next_max = next_values
            .map_or(0.0, |v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        let q_old = self.q[[s, action.index()]];
        let q_new = q_old + alpha * (reward + gamma * next_max - q_old);
        self.q[[s, action.index()]] = q_new;
        TdUpdate {
            state: s, values, action, next, reward, alpha, gamma,
            q_old, next_values, next_max, q_new,
        }
    }

    /// Run one episode from the start state.
    pub fn episode<T: Trace + ?Sized>(
        &mut self, episode: usize, trace: &mut T,
    ) -> Result<EpisodeEnd, MdpError> {
        let mut s = self.settings.start;
        trace.ql_episode_start(episode, s)?;
        let mut steps = 0;
        let end = loop {
            if self.grid.is_terminal(s) {
                break EpisodeEnd::Terminal { steps };
            }
            if steps >= self.settings.max_steps {
                break EpisodeEnd::StepLimit { steps };
            }
            steps += 1;
            let action = self.choose_action(s);
            let next = self.grid.sample(s, action, &mut self.rng);
            let update = self.update(s, action, next);
            trace.ql_step(&update)?;
            s = next;
        };
        trace.ql_episode_end(episode, end)?;
        Ok(end)
    }

    /// Run every configured episode, then extract the greedy policy.
    pub fn run<T: Trace + ?Sized>(&mut self, trace: &mut T) -> Result<Policy, MdpError> {
        let mut capped = 0;
        for episode in 1..=self.settings.episodes {
            if let EpisodeEnd::StepLimit { .. } = self.episode(episode, trace)? {
                capped += 1;
            }
        }
        debug!(episodes = self.settings.episodes, capped, "q-learning finished");
        let policy = self.policy();
        trace.ql_finished(self.grid, &policy)?;
        Ok(policy)
    }

    /// Greedy policy from the current Q-table.
    pub fn policy(&mut self) -> Policy {
        extract_policy(self.grid, |s| q_row(&self.q, s), &mut self.rng)
    }
}

fn q_row(q: &Array2<f64>, s: usize) -> ActionValues {
    Action::ALL.map(|a| q[[s, a.index()]])
}
