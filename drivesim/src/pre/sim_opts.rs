use crate::ai::fitness::FitnessMode;
use crate::core::controller::OutputMapping;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// DriverKind selects the controller of one entrant from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Heuristic,
    Constant,
    Neural,
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(DriverKind::Heuristic),
            "constant" => Ok(DriverKind::Constant),
            "neural" => Ok(DriverKind::Neural),
            _ => Err(format!(
                "unknown driver {}, use heuristic, constant or neural",
                s
            )),
        }
    }
}

impl FromStr for OutputMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(OutputMapping::Direct),
            "split" | "split-steer" => Ok(OutputMapping::SplitSteer),
            _ => Err(format!("unknown output mapping {}, use direct or split", s)),
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "drivesim",
    about = "A tile-track vehicle simulator with evolvable drivers"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Observe the session - it is simulated in real time and snapshots are printed
    #[clap(short, long)]
    pub observe: bool,

    /// Train a population of neural drivers instead of running a race
    #[clap(long)]
    pub train: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set path to the track file
    #[clap(short = 'k', long, default_value = "input/tracks/oval.csv")]
    pub track_path: PathBuf,

    /// Set path to the simulation parameter file (OPTIONAL: defaults are used if not set)
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Set path to a genome file (neural drivers load it, training saves the champion to it)
    #[clap(short, long)]
    pub genome_path: Option<PathBuf>,

    /// Add a driver to the race (heuristic, constant or neural), may be repeated
    #[clap(short = 'D', long = "driver", default_value = "heuristic")]
    pub drivers: Vec<DriverKind>,

    /// Set output mapping of neural drivers (direct or split)
    #[clap(long, default_value = "direct")]
    pub mapping: OutputMapping,

    /// Set population size for training (overrides the parameter file)
    #[clap(long)]
    pub pop_size: Option<usize>,

    /// Set number of generations for training
    #[clap(long, default_value = "10")]
    pub generations: u32,

    /// Set simulated time per genome evaluation in seconds
    #[clap(long, default_value = "20.0")]
    pub eval_time: f64,

    /// Set fitness function for training (lap-time or shaped)
    #[clap(long, default_value = "lap-time")]
    pub fitness: FitnessMode,

    /// Set seed of the genetic algorithm (OPTIONAL: random if not set)
    #[clap(long)]
    pub seed: Option<u64>,

    /// Set path of the JSON result file (OPTIONAL)
    #[clap(short = 'j', long)]
    pub json_path: Option<PathBuf>,

    /// Set real-time factor (only relevant in observer mode)
    #[clap(short, long, default_value = "1.0")]
    pub realtime_factor: f64,

    /// Set simulation timestep size in seconds, should be in the range [0.001, 0.1]
    #[clap(short, long, default_value = "0.016666")]
    pub timestep_size: f64,
}
