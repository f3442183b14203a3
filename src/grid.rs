use std::fmt;
use std::io;
use std::ops::Range;
use std::path::Path;

use ndarray::Array2;

use crate::error::MdpError;

/// Cell type codes used by grid files: 0 free, 1 goal, 2 pit, 3 wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cell {
    Free,
    Goal,
    Pit,
    Wall,
}

impl Cell {
    pub fn code(self) -> u8 {
        match self {
            Cell::Free => 0,
            Cell::Goal => 1,
            Cell::Pit => 2,
            Cell::Wall => 3,
        }
    }

    /// Goal and pit cells end an episode.
    pub fn is_terminal(self) -> bool {
        matches!(self, Cell::Goal | Cell::Pit)
    }
}

impl TryFrom<u8> for Cell {
    type Error = MdpError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Cell::Free),
            1 => Ok(Cell::Goal),
            2 => Ok(Cell::Pit),
            3 => Ok(Cell::Wall),
            _ => Err(MdpError::Grid(format!("unknown cell code {}", code))),
        }
    }
}

/// Rectangular grid world. Immutable once loaded.
///
/// States are numbered row-major: `s = row * cols + col`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    cells: Array2<Cell>,
}

impl Grid {
    /// Build a grid from rows of cell codes.
    pub fn from_rows(rows: &[Vec<u8>]) -> Result<Grid, MdpError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        if n_rows == 0 || n_cols == 0 {
            return Err(MdpError::Grid(String::from("grid has no cells")));
        }
        let mut codes = Vec::with_capacity(n_rows * n_cols);
        for (r, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(MdpError::Grid(format!(
                    "row {} has {} cells, expected {}", r, row.len(), n_cols
                )));
            }
            for &code in row {
                codes.push(Cell::try_from(code)?);
            }
        }
        let cells = Array2::from_shape_vec((n_rows, n_cols), codes)
            .map_err(|e| MdpError::Grid(e.to_string()))?;
        Ok(Grid { cells })
    }

    /// Read comma-separated rows of cell codes.
    pub fn from_reader<R: io::Read>(rdr: R) -> Result<Grid, MdpError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let mut rows: Vec<Vec<u8>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = Vec::with_capacity(record.len());
            for field in record.iter() {
                let code = field.parse::<u8>().map_err(|_| {
                    MdpError::Grid(format!(
                        "row {}: '{}' is not a cell code", rows.len(), field
                    ))
                })?;
                row.push(code);
            }
            rows.push(row);
        }
        Grid::from_rows(&rows)
    }

    pub fn from_csv_path(path: &Path) -> Result<Grid, MdpError> {
        let file = std::fs::File::open(path).map_err(|e| {
            MdpError::Config(format!("{}: {}", path.display(), e))
        })?;
        Grid::from_reader(file)
    }

    pub fn rows(&self) -> usize {
        self.cells.nrows()
    }

    pub fn cols(&self) -> usize {
        self.cells.ncols()
    }

    pub fn num_states(&self) -> usize {
        self.cells.len()
    }

    /// All state indices, row-major.
    pub fn states(&self) -> Range<usize> {
        0..self.num_states()
    }

    pub fn state(&self, row: usize, col: usize) -> usize {
        row * self.cols() + col
    }

    pub fn coords(&self, s: usize) -> (usize, usize) {
        (s / self.cols(), s % self.cols())
    }

    pub fn cell(&self, s: usize) -> Cell {
        let (r, c) = self.coords(s);
        self.cells[[r, c]]
    }

    pub fn cell_at(&self, row: usize, col: usize) -> Option<Cell> {
        self.cells.get([row, col]).copied()
    }

    pub fn is_wall(&self, s: usize) -> bool {
        self.cell(s) == Cell::Wall
    }

    pub fn is_terminal(&self, s: usize) -> bool {
        self.cell(s).is_terminal()
    }

    /// Free cells are the only decision points.
    pub fn is_free(&self, s: usize) -> bool {
        self.cell(s) == Cell::Free
    }

    pub fn free_states(&self) -> Vec<usize> {
        self.states().filter(|&s| self.is_free(s)).collect()
    }

    /// Bottom-left cell, the default starting point for episodes and plans.
    pub fn default_start(&self) -> usize {
        self.state(self.rows() - 1, 0)
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row in self.cells.rows() {
            let codes: Vec<String> =
                row.iter().map(|cell| cell.code().to_string()).collect();
            writeln!(f, "{}", codes.join(","))?;
        }
        Ok(())
    }
}
