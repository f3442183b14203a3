use std::path::{Path, PathBuf};

use config_file::FromConfigFile;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::warn;

use crate::error::MdpError;
use crate::grid::{Cell, Grid};
use crate::policy_iteration::PolicyIterationSettings;
use crate::q_learning::{QLearningSettings, MAX_STEPS_PER_EPISODE};
use crate::value_iteration::ValueIterationSettings;

/// Hold information read from a grid world configuration file.
///
/// Every scalar is a named field. Fields a solver does not use are ignored.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MdpConfig {
    /// Discount rate
    pub gamma: f64,
    /// Rows of cell codes given inline.
    #[serde(default)]
    pub grid: Option<Vec<Vec<u8>>>,
    /// CSV file of cell codes, relative to the configuration file.
    #[serde(default)]
    pub grid_path: Option<PathBuf>,
    /// [row, col] of the start cell. Defaults to the bottom-left cell.
    #[serde(default)]
    pub start: Option<[usize; 2]>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Value iteration stopping threshold on the L1 change of a sweep.
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub max_sweeps: Option<usize>,
    /// Q-learning learning rate
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub episodes: Option<usize>,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

impl MdpConfig {
    /// Read a configuration file. The format follows the file extension.
    pub fn load(path: &Path) -> Result<MdpConfig, MdpError> {
        let mut config = MdpConfig::from_config_file(path)
            .map_err(|e| MdpError::Config(format!("{}: {}", path.display(), e)))?;
        if let (Some(grid_path), Some(dir)) = (config.grid_path.as_mut(), path.parent()) {
            if grid_path.is_relative() {
                *grid_path = dir.join(grid_path.as_path());
            }
        }
        Ok(config)
    }

    pub fn load_grid(&self) -> Result<Grid, MdpError> {
        match (&self.grid, &self.grid_path) {
            (Some(rows), None) => Grid::from_rows(rows),
            (None, Some(path)) => Grid::from_csv_path(path),
            (Some(_), Some(_)) => Err(MdpError::Config(
                String::from("set only one of `grid` and `grid_path`"))),
            (None, None) => Err(MdpError::Config(
                String::from("missing `grid` or `grid_path`"))),
        }
    }

    /// Start state. Walls and cells outside the grid are rejected. A terminal
    /// start is allowed: episodes end at once and the plan has no moves.
    pub fn start_state(&self, grid: &Grid) -> Result<usize, MdpError> {
        let [row, col] = self.start.unwrap_or([grid.rows() - 1, 0]);
        match grid.cell_at(row, col) {
            Some(Cell::Wall) | None => Err(MdpError::InvalidStart { row, col }),
            Some(_) => Ok(grid.state(row, col)),
        }
    }

    /// Seeded when `seed` is set, from OS entropy otherwise.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn gamma(&self) -> Result<f64, MdpError> {
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(MdpError::Config(format!("gamma must be in [0, 1], got {}", self.gamma)));
        }
        if self.gamma == 1.0 {
            warn!("gamma is 1; policy evaluation may be singular");
        }
        Ok(self.gamma)
    }

    pub fn policy_iteration(&self) -> Result<PolicyIterationSettings, MdpError> {
        Ok(PolicyIterationSettings { gamma: self.gamma()? })
    }

    pub fn value_iteration(&self, grid: &Grid) -> Result<ValueIterationSettings, MdpError> {
        let tolerance = require(self.tolerance, "tolerance")?;
        if !(tolerance > 0.0) {
            return Err(MdpError::Config(format!("tolerance must be positive, got {}", tolerance)));
        }
        Ok(ValueIterationSettings {
            gamma: self.gamma()?,
            tolerance,
            max_sweeps: self.max_sweeps,
            start: self.start_state(grid)?,
        })
    }

    pub fn q_learning(&self, grid: &Grid) -> Result<QLearningSettings, MdpError> {
        let alpha = require(self.alpha, "alpha")?;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(MdpError::Config(format!("alpha must be in (0, 1], got {}", alpha)));
        }
        Ok(QLearningSettings {
            gamma: self.gamma()?,
            alpha,
            episodes: require(self.episodes, "episodes")?,
            max_steps: self.max_steps.unwrap_or(MAX_STEPS_PER_EPISODE),
            start: self.start_state(grid)?,
        })
    }
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, MdpError> {
    value.ok_or_else(|| MdpError::Config(format!("missing `{}`", field)))
}
