use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridmdp::config::MdpConfig;
use gridmdp::policy_iteration::PolicyIteration;
use gridmdp::q_learning::QLearner;
use gridmdp::trace::{render_plan, render_policy, TraceLog};
use gridmdp::value_iteration::ValueIteration;
use gridmdp::{Grid, MdpError};


/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve a stochastic grid world MDP", long_about = None)]
pub struct Args {
    /// Path to the grid world configuration TOML file.
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}


#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the grid, its state numbering and cell types.
    Show,
    /// Exact policy evaluation and greedy improvement.
    PolicyIteration {
        /// Trace log destination.
        #[arg(short, long, default_value = "log-file_PI.txt")]
        output: PathBuf,
    },
    /// Bellman backups until the L1 change drops below the tolerance.
    ValueIteration {
        #[arg(short, long, default_value = "log-file_VI.txt")]
        output: PathBuf,
    },
    /// Episodic Q-learning against the simulated grid.
    QLearning {
        #[arg(short, long, default_value = "log-file_QL.txt")]
        output: PathBuf,
    },
}


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gridmdp=info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
    }
}


fn run(args: &Args) -> Result<(), MdpError> {
    info!("Reading config file: {}", args.config_path.display());
    let config = MdpConfig::load(&args.config_path)?;
    let grid = config.load_grid()?;
    info!("Loaded {}x{} grid with {} free cells",
        grid.rows(), grid.cols(), grid.free_states().len());

    match &args.command {
        Commands::Show => show_grid(&grid),
        Commands::PolicyIteration { output } => {
            let settings = config.policy_iteration()?;
            let mut log = open_log(output)?;
            let result = PolicyIteration::new(&grid, settings).run(&mut log)?;
            log.finish()?;
            info!("Policy stable after iteration {}", result.iterations);
            print!("{}", render_policy(&grid, &result.policy));
        }
        Commands::ValueIteration { output } => {
            let settings = config.value_iteration(&grid)?;
            let mut rng = config.rng();
            let mut log = open_log(output)?;
            let result = ValueIteration::new(&grid, settings).run(&mut rng, &mut log)?;
            log.finish()?;
            info!("Stopped after {} sweeps (converged: {})", result.sweeps, result.converged);
            print!("{}", render_policy(&grid, &result.policy));
            println!("{}", render_plan(&result.plan));
        }
        Commands::QLearning { output } => {
            let settings = config.q_learning(&grid)?;
            let mut log = open_log(output)?;
            let mut learner = QLearner::new(&grid, settings, config.rng());
            let policy = learner.run(&mut log)?;
            log.finish()?;
            info!("Ran {} episodes", settings.episodes);
            print!("{}", render_policy(&grid, &policy));
        }
    }
    if let Some(output) = args.command.output() {
        info!("Trace written to {}", output.display());
    }
    Ok(())
}

impl Commands {
    fn output(&self) -> Option<&Path> {
        match self {
            Commands::Show => None,
            Commands::PolicyIteration { output }
            | Commands::ValueIteration { output }
            | Commands::QLearning { output } => Some(output.as_path()),
        }
    }
}


/// Only called once the configuration is known to be valid.
fn open_log(path: &Path) -> Result<TraceLog<BufWriter<File>>, MdpError> {
    let file = File::create(path)?;
    Ok(TraceLog::new(BufWriter::new(file)))
}


fn show_grid(grid: &Grid) {
    println!("=== Cell codes ===");
    print!("{}", grid);
    println!("\n=== States ===");
    for r in 0..grid.rows() {
        let row: Vec<String> = (0..grid.cols())
            .map(|c| {
                let s = grid.state(r, c);
                format!("{:>3}:{:<5}", s, format!("{:?}", grid.cell(s)))
            })
            .collect();
        println!("{}", row.join(" "));
    }
}
