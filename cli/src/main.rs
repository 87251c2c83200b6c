use anyhow::Context;
use clap::Parser;
use drivesim::ai::fitness::{evaluate_genome, EvalSetup};
use drivesim::ai::ga::Ga;
use drivesim::ai::neural::{Genome, NeuralNet};
use drivesim::core::controller::{
    no_neural_inputs, ConstantController, Controller, HeuristicController, NeuralController,
};
use drivesim::core::handle_session::handle_session;
use drivesim::core::session::{EntrantSpec, Session};
use drivesim::core::surface::Palette;
use drivesim::core::track::Track;
use drivesim::interfaces::observer::SessionState;
use drivesim::post::session_result::SessionResult;
use drivesim::pre::read_sim_pars::{read_sim_pars, SimPars};
use drivesim::pre::sim_opts::{DriverKind, SimOpts};
use rayon::prelude::*;
use std::path::Path;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Colour and sprite key per start position.
const CAR_LIVERIES: [(&str, &str); 4] = [
    ("red", "car_red"),
    ("blue", "car_blue"),
    ("yellow", "car_yellow"),
    ("purple", "car_purple"),
];

fn build_controller(
    kind: DriverKind,
    sim_opts: &SimOpts,
    sim_pars: &SimPars,
) -> anyhow::Result<Box<dyn Controller>> {
    let controller: Box<dyn Controller> = match kind {
        DriverKind::Heuristic => Box::new(HeuristicController::default()),
        DriverKind::Constant => Box::new(ConstantController::new(0.5, 0.0, 0.0)),
        DriverKind::Neural => {
            let genome_path = sim_opts
                .genome_path
                .as_ref()
                .context("Neural drivers require a genome file (-g <path>)!")?;
            let lidar = &sim_pars.sensor_pars.lidar;
            let net = NeuralNet::new(
                Genome::load(genome_path)?,
                no_neural_inputs(lidar),
                sim_opts.mapping.no_outputs(),
            )?;
            Box::new(NeuralController::new(Box::new(net), sim_opts.mapping, lidar)?)
        }
    };
    Ok(controller)
}

fn build_session(
    sim_opts: &SimOpts,
    sim_pars: &SimPars,
    palette: &Palette,
    track: Track,
) -> anyhow::Result<Session> {
    let mut entrant_specs = Vec::with_capacity(sim_opts.drivers.len());

    for (i, kind) in sim_opts.drivers.iter().enumerate() {
        let (color, sprite) = CAR_LIVERIES[i % CAR_LIVERIES.len()];
        entrant_specs.push(EntrantSpec {
            name: format!("{:?} {}", kind, i + 1).to_lowercase(),
            color: color.to_owned(),
            sprite: Some(sprite.to_owned()),
            controller: build_controller(*kind, sim_opts, sim_pars)?,
        });
    }

    Session::new(
        &sim_pars.session_pars,
        &sim_pars.vehicle_pars,
        &sim_pars.terrain_pars,
        palette,
        track,
        entrant_specs,
        sim_opts.timestep_size,
    )
}

fn print_state(state: &SessionState) {
    for car in state.car_states.iter() {
        println!(
            "OBSERVE: {:7.2}s {:>12} at ({:6.1}, {:6.1}) heading {:6.1}deg, {:6.1}px/s, lap {} checkpoint {}{}",
            state.sim_time,
            car.name,
            car.position.x,
            car.position.y,
            car.heading_deg,
            car.velocity,
            car.laps,
            car.next_checkpoint,
            if car.finished { " (finished)" } else { "" }
        );
    }
}

fn run_race(
    sim_opts: &SimOpts,
    sim_pars: &SimPars,
    palette: &Palette,
    track: Track,
) -> anyhow::Result<SessionResult> {
    if !sim_opts.observe {
        let session = build_session(sim_opts, sim_pars, palette, track)?;
        return handle_session(session, None, 1.0);
    }

    // OBSERVER CASE - controllers are not Send, the session is created in the simulation thread
    let (tx, rx) = flume::unbounded();
    let sim_opts_thread = sim_opts.clone();
    let sim_pars_thread = sim_pars.clone();
    let palette_thread = palette.clone();

    let sim_thread = thread::spawn(move || -> anyhow::Result<SessionResult> {
        let session = build_session(&sim_opts_thread, &sim_pars_thread, &palette_thread, track)?;
        handle_session(session, Some(&tx), sim_opts_thread.realtime_factor)
    });

    let mut final_result = None;
    for state in rx.iter() {
        print_state(&state);
        if state.final_result.is_some() {
            final_result = state.final_result;
        }
    }

    let result = sim_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Simulation thread panicked!"))??;

    if final_result.is_none() {
        warn!("Observer did not receive the final result!");
    }
    Ok(result)
}

fn train(sim_opts: &SimOpts, sim_pars: &SimPars, track: &Track) -> anyhow::Result<()> {
    let mut ga_pars = sim_pars.ga_pars.to_owned();
    if let Some(pop_size) = sim_opts.pop_size {
        ga_pars.pop_size = pop_size;
    }

    let lidar = &sim_pars.sensor_pars.lidar;
    let genome_length =
        NeuralNet::genome_length(no_neural_inputs(lidar), sim_opts.mapping.no_outputs());
    let mut ga = Ga::new(&ga_pars, genome_length, sim_opts.seed)?;

    let setup = EvalSetup {
        track,
        sim_pars,
        mapping: sim_opts.mapping,
        eval_time: sim_opts.eval_time,
        timestep_size: sim_opts.timestep_size,
        mode: sim_opts.fitness,
    };

    info!(
        "Training {} genomes of length {} for {} generations ({:?} fitness)",
        ga_pars.pop_size, genome_length, sim_opts.generations, sim_opts.fitness
    );

    let mut champion: Option<(Genome, f64)> = None;

    for _ in 0..sim_opts.generations {
        let t_start = Instant::now();

        // every genome runs its own session
        let fitness = ga
            .population
            .par_iter()
            .map(|genome| evaluate_genome(genome, &setup))
            .collect::<anyhow::Result<Vec<f64>>>()?;

        if let Some(best) = ga.best(&fitness) {
            let best_fitness = fitness.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean_fitness = fitness.iter().sum::<f64>() / fitness.len() as f64;
            info!(
                "Generation {}: best fitness {:.2}, mean fitness {:.2} ({}ms)",
                ga.generation,
                best_fitness,
                mean_fitness,
                t_start.elapsed().as_millis()
            );

            if champion.as_ref().map_or(true, |(_, f)| best_fitness > *f) {
                champion = Some((best.to_owned(), best_fitness));
            }
        }

        ga.evolve(&fitness)?;
    }

    let (genome, fitness) = champion.context("Training did not evaluate any genome!")?;
    let out_path = match &sim_opts.genome_path {
        Some(p) => p.to_owned(),
        None => {
            let out_dir = Path::new("output");
            std::fs::create_dir_all(out_dir).context("Failed to create output directory!")?;
            out_dir.join("best_genome.json")
        }
    };
    genome.save(&out_path)?;
    println!(
        "RESULT: Best genome (fitness {:.2}) saved to {}",
        fitness,
        out_path.to_string_lossy()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();

    let default_level = if sim_opts.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    // get simulation parameters
    let sim_pars = match &sim_opts.parfile_path {
        Some(parfile_path) => {
            info!("Reading simulation parameters from {:?}", parfile_path);
            read_sim_pars(parfile_path)?
        }
        None => {
            info!("No parameter file set, using default parameters");
            SimPars::default()
        }
    };
    let palette = sim_pars.validate()?;

    // get track
    let track = Track::from_csv(&sim_opts.track_path, sim_pars.session_pars.screen_size)?;
    info!(
        "Loaded track {} ({}x{} cells, {} checkpoints) with a time step size of {:.3}s",
        track.name,
        track.grid_size,
        track.grid_size,
        track.checkpoints.len(),
        sim_opts.timestep_size
    );

    // EXECUTION -----------------------------------------------------------------------------------
    if sim_opts.train {
        return train(&sim_opts, &sim_pars, &track);
    }

    let t_start = Instant::now();
    let result = run_race(&sim_opts, &sim_pars, &palette, track)?;
    info!("Execution time: {}ms", t_start.elapsed().as_millis());

    // POST-PROCESSING -----------------------------------------------------------------------------
    result.print_lap_times();
    let txt_path = result.write_lap_times_to_file(None)?;
    info!("Lap times written to {}", txt_path.to_string_lossy());

    if let Some(json_path) = &sim_opts.json_path {
        result.write_json(json_path)?;
        info!("Result written to {}", json_path.to_string_lossy());
    }

    Ok(())
}
