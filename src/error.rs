use thiserror::Error;

/// Errors raised while loading a grid world or solving it.
#[derive(Error, Debug)]
pub enum MdpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to read grid file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid grid: {0}")]
    Grid(String),

    #[error("Start cell ({row}, {col}) is not a free cell")]
    InvalidStart { row: usize, col: usize },

    /// Policy evaluation produced a linear system with no unique solution.
    #[error("Singular linear system while evaluating a {size}x{size} policy")]
    Singular { size: usize },

    #[error("Trace write failed: {0}")]
    Io(#[from] std::io::Error),
}
