use std::io::{self, Write};

use ndarray::Array1;

use crate::grid::{Cell, Grid};
use crate::mdp::Action;
use crate::policy::{ActionValues, Plan, Policy};
use crate::q_learning::{EpisodeEnd, TdUpdate};

/// Receives the intermediate computations of the solvers.
///
/// Every method defaults to doing nothing; `()` ignores everything.
#[allow(unused_variables)]
pub trait Trace {
    fn pi_start(&mut self, grid: &Grid, policy: &Policy) -> io::Result<()> {
        Ok(())
    }

    fn pi_evaluated(
        &mut self, iteration: usize, grid: &Grid, policy: &Policy, utilities: &Array1<f64>,
    ) -> io::Result<()> {
        Ok(())
    }

    fn pi_improved(
        &mut self, grid: &Grid, s: usize, current: Action, values: &ActionValues, chosen: Action,
    ) -> io::Result<()> {
        Ok(())
    }

    fn pi_iteration_end(
        &mut self, iteration: usize, grid: &Grid, policy: &Policy, changed: bool,
    ) -> io::Result<()> {
        Ok(())
    }

    fn vi_sweep_start(&mut self, sweep: usize) -> io::Result<()> {
        Ok(())
    }

    /// `utilities` are the ones the backup read from.
    fn vi_backup(
        &mut self, sweep: usize, grid: &Grid, s: usize, gamma: f64,
        utilities: &Array1<f64>, values: &ActionValues,
    ) -> io::Result<()> {
        Ok(())
    }

    fn vi_sweep_end(
        &mut self, sweep: usize, grid: &Grid, utilities: &Array1<f64>, delta: f64,
    ) -> io::Result<()> {
        Ok(())
    }

    fn vi_stopped(&mut self, sweep: usize, tolerance: f64, converged: bool) -> io::Result<()> {
        Ok(())
    }

    fn vi_extracted(
        &mut self, grid: &Grid, s: usize, gamma: f64, utilities: &Array1<f64>,
        values: &ActionValues, chosen: Action,
    ) -> io::Result<()> {
        Ok(())
    }

    fn vi_finished(&mut self, grid: &Grid, policy: &Policy, plan: &Plan) -> io::Result<()> {
        Ok(())
    }

    fn ql_episode_start(&mut self, episode: usize, start: usize) -> io::Result<()> {
        Ok(())
    }

    fn ql_step(&mut self, update: &TdUpdate) -> io::Result<()> {
        Ok(())
    }

    fn ql_episode_end(&mut self, episode: usize, end: EpisodeEnd) -> io::Result<()> {
        Ok(())
    }

    fn ql_finished(&mut self, grid: &Grid, policy: &Policy) -> io::Result<()> {
        Ok(())
    }
}

impl Trace for () {}


pub fn arrow(a: Action) -> &'static str {
    match a {
        Action::Up => "^",
        Action::Down => "v",
        Action::Left => "<",
        Action::Right => ">",
    }
}

pub fn name(a: Action) -> &'static str {
    match a {
        Action::Up => "up",
        Action::Down => "down",
        Action::Left => "left",
        Action::Right => "right",
    }
}

fn full_name(a: Action) -> String {
    format!("{} {}", arrow(a), name(a))
}

fn cell_label(grid: &Grid, s: usize) -> String {
    let (r, c) = grid.coords(s);
    format!("Grid_{}_{}", r, c)
}

/// Policy as rows of symbols: arrows on free cells, `G` goal, `P` pit, `#` wall.
pub fn render_policy(grid: &Grid, policy: &Policy) -> String {
    let mut out = String::new();
    for r in 0..grid.rows() {
        let symbols: Vec<&str> = (0..grid.cols())
            .map(|c| {
                let s = grid.state(r, c);
                match grid.cell(s) {
                    Cell::Wall => "#",
                    Cell::Goal => "G",
                    Cell::Pit => "P",
                    Cell::Free => policy.get(s).map_or("?", arrow),
                }
            })
            .collect();
        out.push_str(&format!("[{}]\n", symbols.join(", ")));
    }
    out
}

/// Action names joined into a route, ending with where the walk stopped.
pub fn render_plan(plan: &Plan) -> String {
    let mut steps: Vec<&str> = plan.actions.iter().map(|&a| name(a)).collect();
    steps.push(if plan.reaches_terminal { "end" } else { "loop" });
    steps.join(" -> ")
}


/// Writes the solver trace in a fixed, line-oriented text format.
pub struct TraceLog<W: Write> {
    out: W,
}

impl<W: Write> TraceLog<W> {
    pub fn new(out: W) -> TraceLog<W> {
        TraceLog { out }
    }

    /// Flush and hand back the writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn policy_grid(&mut self, grid: &Grid, policy: &Policy) -> io::Result<()> {
        writeln!(self.out, "--- Policy grid ---\n")?;
        writeln!(self.out, "{}", render_policy(grid, policy))
    }

    /// One action's backup as `p*[R+gamma*U]` terms.
    fn backup_line(
        &mut self, grid: &Grid, s: usize, a: Action, gamma: f64,
        utilities: &Array1<f64>, q: f64,
    ) -> io::Result<()> {
        let terms: Vec<String> = grid.outcomes(s, a)
            .iter()
            .map(|o| format!(
                "{:.1}*[{:.2}+{}*{:.3}]",
                o.prob, grid.reward(o.state), gamma, utilities[o.state]
            ))
            .collect();
        writeln!(self.out, "Q(S{},{}) = {} = {:.4}", s, name(a), terms.join(" + "), q)
    }

    fn value_list(values: &ActionValues) -> String {
        values.iter().map(|v| format!("{:.4}", v)).collect::<Vec<_>>().join(", ")
    }
}

impl<W: Write> Trace for TraceLog<W> {
    fn pi_start(&mut self, grid: &Grid, policy: &Policy) -> io::Result<()> {
        writeln!(self.out, "--- Initial policy ---\n")?;
        for (s, a) in policy.iter() {
            writeln!(self.out, "{} -> {} chosen initially", cell_label(grid, s), full_name(a))?;
        }
        writeln!(self.out)?;
        self.policy_grid(grid, policy)
    }

    fn pi_evaluated(
        &mut self, iteration: usize, grid: &Grid, policy: &Policy, utilities: &Array1<f64>,
    ) -> io::Result<()> {
        writeln!(self.out, "--- Iteration {} ---\n", iteration)?;
        writeln!(self.out, "--- Policy evaluation (exact linear solve) ---\n")?;
        for (s, a) in policy.iter() {
            writeln!(self.out, "{} (-> {}): {}", cell_label(grid, s), full_name(a), utilities[s])?;
        }
        writeln!(self.out, "\n--- Policy improvement ---\n")
    }

    fn pi_improved(
        &mut self, grid: &Grid, s: usize, current: Action, values: &ActionValues, chosen: Action,
    ) -> io::Result<()> {
        let label = cell_label(grid, s);
        writeln!(self.out, "    {}:", label)?;
        writeln!(self.out, "Current (-> {}) : {}", full_name(current), values[current.index()])?;
        for a in Action::ALL.into_iter().filter(|&a| a != current) {
            writeln!(self.out, "-> {} : {}", full_name(a), values[a.index()])?;
        }
        if chosen != current {
            writeln!(self.out, "\n Policy change: {} -> {}\n", label, full_name(chosen))
        } else {
            writeln!(self.out, "\n Policy kept: {} -> {}\n", label, full_name(current))
        }
    }

    fn pi_iteration_end(
        &mut self, iteration: usize, grid: &Grid, policy: &Policy, changed: bool,
    ) -> io::Result<()> {
        self.policy_grid(grid, policy)?;
        if !changed {
            writeln!(self.out, "No change: policy iteration finished")?;
            writeln!(self.out, "Final iteration count: {}", iteration)?;
        }
        Ok(())
    }

    fn vi_sweep_start(&mut self, sweep: usize) -> io::Result<()> {
        writeln!(self.out, "Iteration {} :", sweep)
    }

    fn vi_backup(
        &mut self, _sweep: usize, grid: &Grid, s: usize, gamma: f64,
        utilities: &Array1<f64>, values: &ActionValues,
    ) -> io::Result<()> {
        writeln!(self.out, "U'{}:", s)?;
        for a in Action::ALL {
            self.backup_line(grid, s, a, gamma, utilities, values[a.index()])?;
        }
        let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        writeln!(self.out, "U'{} = max{{{}}} = {:.4}\n", s, Self::value_list(values), best)
    }

    fn vi_sweep_end(
        &mut self, sweep: usize, grid: &Grid, utilities: &Array1<f64>, delta: f64,
    ) -> io::Result<()> {
        writeln!(self.out, "UTILITIES AFTER ITERATION {}:", sweep)?;
        for r in 0..grid.rows() {
            let mut row = String::new();
            for c in 0..grid.cols() {
                let s = grid.state(r, c);
                let shown = match grid.cell(s) {
                    Cell::Wall => 0.0,
                    Cell::Goal => 1.0,
                    Cell::Pit => -1.0,
                    Cell::Free => utilities[s],
                };
                row.push_str(&format!("{:7.3} ", shown));
            }
            writeln!(self.out, "{}", row)?;
        }
        writeln!(self.out, "\nSum of differences |U(s) - U'(s)| = {:.6}\n", delta)
    }

    fn vi_stopped(&mut self, sweep: usize, tolerance: f64, converged: bool) -> io::Result<()> {
        if converged {
            writeln!(self.out, "Difference < {} . Stopping iterations\n", tolerance)?;
        } else {
            writeln!(self.out, "Sweep limit {} reached before difference < {}\n", sweep, tolerance)?;
        }
        writeln!(self.out, "Searching for optimal actions:\n")
    }

    fn vi_extracted(
        &mut self, grid: &Grid, s: usize, gamma: f64, utilities: &Array1<f64>,
        values: &ActionValues, chosen: Action,
    ) -> io::Result<()> {
        writeln!(self.out, "S{}:", s)?;
        for a in Action::ALL {
            self.backup_line(grid, s, a, gamma, utilities, values[a.index()])?;
        }
        writeln!(self.out, "Best action = argmax{{{}}} = {}\n", Self::value_list(values), name(chosen))
    }

    fn vi_finished(&mut self, grid: &Grid, policy: &Policy, plan: &Plan) -> io::Result<()> {
        writeln!(self.out, "Best action per cell:")?;
        for r in 0..grid.rows() {
            let mut row = String::new();
            for c in 0..grid.cols() {
                let s = grid.state(r, c);
                let label = match grid.cell(s) {
                    Cell::Wall => "WALL",
                    Cell::Goal => "GOAL",
                    Cell::Pit => "PIT",
                    Cell::Free => policy.get(s).map_or("?", name),
                };
                row.push_str(&format!("{:<9}", label));
            }
            writeln!(self.out, "{}", row)?;
        }
        writeln!(self.out, "\nOptimal plan:")?;
        writeln!(self.out, "{}", render_plan(plan))
    }

    fn ql_episode_start(&mut self, episode: usize, start: usize) -> io::Result<()> {
        writeln!(self.out, "Episode {}", episode)?;
        writeln!(self.out, "Start from state S{}\n", start)
    }

    fn ql_step(&mut self, u: &TdUpdate) -> io::Result<()> {
        let s = u.state;
        let a = name(u.action);
        let choices: Vec<String> =
            Action::ALL.iter().map(|&b| format!("Q(S{}, {})", s, name(b))).collect();
        let values: Vec<String> = u.values.iter().map(|v| v.to_string()).collect();
        writeln!(self.out, "Action to take pi(S{}) = argmax{{ {} }}", s, choices.join(", "))?;
        writeln!(self.out, "\t\t\t= argmax{{ {} }}", values.join(", "))?;
        writeln!(self.out, "\t\t\t= {}", a)?;
        writeln!(self.out, "S{} -> S{}\n", s, u.next)?;

        let next_terms = match u.next_values {
            Some(_) => Action::ALL.iter()
                .map(|&b| format!("Q(S{}, {})", u.next, name(b)))
                .collect::<Vec<_>>()
                .join(", "),
            None => format!("Q(S{}, None)", u.next),
        };
        writeln!(
            self.out,
            "Q(S{s},{a}) <- Q(S{s},{a}) + alpha * (R(S{n}) + gamma * max{{ {t} }} - Q(S{s},{a}))",
            s = s, a = a, n = u.next, t = next_terms,
        )?;
        writeln!(
            self.out, "\t\t\t = {} + {} * ({} + {} * {} - {})",
            u.q_old, u.alpha, u.reward, u.gamma, u.next_max, u.q_old,
        )?;
        writeln!(self.out, "\t\t\t = {}\n", u.q_new)
    }

    fn ql_episode_end(&mut self, _episode: usize, end: EpisodeEnd) -> io::Result<()> {
        match end {
            EpisodeEnd::Terminal { .. } => writeln!(self.out, "End of episode\n\n"),
            EpisodeEnd::StepLimit { steps } => writeln!(
                self.out, "Episode cut short (limit of {} moves reached).\n\n", steps
            ),
        }
    }

    fn ql_finished(&mut self, grid: &Grid, policy: &Policy) -> io::Result<()> {
        writeln!(self.out, "/**************************/")?;
        writeln!(self.out, "Best action for each state:")?;
        for r in 0..grid.rows() {
            let mut row = String::new();
            for c in 0..grid.cols() {
                let label = policy.get(grid.state(r, c)).map_or("None", name);
                row.push_str(&format!("{:<11}", label));
            }
            writeln!(self.out, "{}", row)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::classic;
    use crate::policy_iteration::{PolicyIteration, PolicyIterationSettings};
    use crate::q_learning::{QLearner, QLearningSettings};
    use crate::value_iteration::{ValueIteration, ValueIterationSettings};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn render_uniform_policy() {
        let grid = classic();
        let policy = Policy::uniform(&grid, Action::Up);
        assert_eq!(render_policy(&grid, &policy), "[^, ^, ^, G]\n[^, #, ^, P]\n[^, ^, ^, ^]\n");
    }

    #[test]
    fn render_route() {
        let plan = Plan {
            actions: vec![Action::Up, Action::Right],
            states: vec![8, 4, 5],
            reaches_terminal: true,
        };
        assert_eq!(render_plan(&plan), "up -> right -> end");
    }

    #[test]
    fn policy_iteration_log() {
        // Arrange
        let grid = classic();
        let mut log = TraceLog::new(Vec::new());
        // Act
        let result = PolicyIteration::new(&grid, PolicyIterationSettings { gamma: 0.9 })
            .run(&mut log).unwrap();
        let text = String::from_utf8(log.finish().unwrap()).unwrap();
        // Assert
        assert!(text.starts_with("--- Initial policy ---"));
        assert!(text.contains("Grid_0_0 -> ^ up chosen initially"));
        assert!(text.contains("--- Iteration 0 ---"));
        assert!(text.contains("Policy change: Grid_0_2 -> > right"));
        assert!(text.ends_with(&format!("Final iteration count: {}\n", result.iterations)));
    }

    #[test]
    fn value_iteration_log() {
        let grid = classic();
        let mut log = TraceLog::new(Vec::new());
        let mut rng = StdRng::seed_from_u64(3);
        let settings = ValueIterationSettings {
            gamma: 0.9, tolerance: 1e-3, max_sweeps: None, start: 8,
        };
        ValueIteration::new(&grid, settings).run(&mut rng, &mut log).unwrap();
        let text = String::from_utf8(log.finish().unwrap()).unwrap();
        assert!(text.starts_with("Iteration 1 :\nU'0:\n"));
        assert!(text.contains("Q(S2,right) = 0.8*[1.00+0.9*0.000] + 0.1*[-0.04+0.9*0.000] + 0.1*[-0.04+0.9*0.000] = 0.7920"));
        assert!(text.contains("Difference < 0.001 . Stopping iterations"));
        assert!(text.contains("Best action per cell:\nright    right    right    GOAL"));
        assert!(text.ends_with("Optimal plan:\nup -> up -> right -> right -> right -> end\n"));
    }

    #[test]
    fn q_learning_log() {
        let grid = classic();
        let mut log = TraceLog::new(Vec::new());
        let settings = QLearningSettings {
            gamma: 0.9, alpha: 0.2, episodes: 3, max_steps: 200, start: 8,
        };
        QLearner::new(&grid, settings, StdRng::seed_from_u64(8)).run(&mut log).unwrap();
        let text = String::from_utf8(log.finish().unwrap()).unwrap();
        assert!(text.starts_with("Episode 1\nStart from state S8\n"));
        assert!(text.contains("Episode 3\n"));
        assert!(text.contains("= argmax{ 0, 0, 0, 0 }"));
        assert!(text.contains("Best action for each state:"));
    }
}
