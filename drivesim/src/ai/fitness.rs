use crate::ai::neural::{Genome, NeuralNet};
use crate::core::controller::{no_neural_inputs, NeuralController, OutputMapping};
use crate::core::race_state::RaceEvent;
use crate::core::session::{EntrantSpec, Session, SessionPars};
use crate::core::surface::Palette;
use crate::core::track::Track;
use crate::pre::read_sim_pars::SimPars;
use serde::Deserialize;
use std::str::FromStr;

/// Score awarded per completed lap by the lap-time fitness.
const LAP_SCORE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessMode {
    /// Completed laps first, less time is better.
    LapTime,
    /// Dense per-frame reward as used for live neuro-evolution.
    Shaped,
}

impl FromStr for FitnessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lap-time" | "laptime" => Ok(FitnessMode::LapTime),
            "shaped" => Ok(FitnessMode::Shaped),
            _ => Err(format!("unknown fitness {}, use lap-time or shaped", s)),
        }
    }
}

/// lap_time_fitness ranks by completed laps first and by time second. Without a completed lap
/// the elapsed simulation time is used instead of the lap time.
pub fn lap_time_fitness(laps: u32, total_lap_time: f64, sim_time: f64) -> f64 {
    if laps > 0 {
        laps as f64 * LAP_SCORE - total_lap_time
    } else {
        -sim_time
    }
}

/// RewardPars contains the weights of the shaped reward. Distances and speeds enter in blocks
/// (resp. blocks per second) such that the weights do not depend on the screen size.
/// * `crash_penalty` - Penalty per wall contact
/// * `idle_penalty_rate` - (1/s) Penalty rate while standing still
/// * `max_idle_speed` - (px/s) Below this speed the car counts as standing still
/// * `proximity_scale` - Reward per block of approach towards the next gate
/// * `lap_bonus` - Bonus per completed lap
/// * `heading_scale` - (1/s) Reward rate for heading towards the next gate
/// * `speed_scale` - Reward per block driven forward
/// * `wall_thresh_blocks` - LIDAR distance (in blocks) below which walls are penalized
/// * `wall_scale` - (1/s) Penalty rate per block below the wall threshold
/// * `checkpoint_bonus` - Bonus per crossed checkpoint
/// * `steer_penalty` - (1/(rad s)) Penalty rate of the steering target magnitude
/// * `straight_bonus` - (1/s) Reward rate for driving with centred steering
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RewardPars {
    pub crash_penalty: f64,
    pub idle_penalty_rate: f64,
    pub max_idle_speed: f64,
    pub proximity_scale: f64,
    pub lap_bonus: f64,
    pub heading_scale: f64,
    pub speed_scale: f64,
    pub wall_thresh_blocks: f64,
    pub wall_scale: f64,
    pub checkpoint_bonus: f64,
    pub steer_penalty: f64,
    pub straight_bonus: f64,
}

impl Default for RewardPars {
    fn default() -> Self {
        RewardPars {
            crash_penalty: 50.0,
            idle_penalty_rate: 10.0,
            max_idle_speed: 0.1,
            proximity_scale: 200.0,
            lap_bonus: 1000.0,
            heading_scale: 100.0,
            speed_scale: 20.0,
            wall_thresh_blocks: 0.3,
            wall_scale: 200.0,
            checkpoint_bonus: 200.0,
            steer_penalty: 5.0,
            straight_bonus: 10.0,
        }
    }
}

/// FrameObservation is what the shaped reward sees of one car after a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameObservation<'a> {
    pub dt: f64,
    pub block_size: f64,
    pub target_dist: f64,
    pub target_bearing: f64,
    pub velocity: f64,
    pub min_lidar: f64,
    pub steer: f64,
    pub steer_target: f64,
    pub max_steer: f64,
    pub events: &'a [RaceEvent],
    pub wall_hits: u32,
}

#[derive(Debug, Clone)]
pub struct ShapedReward {
    pars: RewardPars,
    prev_dist: Option<f64>,
    pub score: f64,
}

impl ShapedReward {
    pub fn new(pars: &RewardPars) -> ShapedReward {
        ShapedReward {
            pars: pars.to_owned(),
            prev_dist: None,
            score: 0.0,
        }
    }

    /// update accumulates the reward of one frame and returns the frame's contribution.
    pub fn update(&mut self, obs: &FrameObservation) -> f64 {
        let p = &self.pars;
        let bs = obs.block_size.max(1.0);
        let mut reward = 0.0;

        // approach towards the next gate, the distance jumps when the target changes
        if let Some(prev_dist) = self.prev_dist {
            if obs.events.is_empty() {
                reward += (prev_dist - obs.target_dist) / bs * p.proximity_scale;
            }
        }
        self.prev_dist = Some(obs.target_dist);

        if obs.velocity.abs() < p.max_idle_speed {
            reward -= p.idle_penalty_rate * obs.dt;
        }

        for event in obs.events.iter() {
            match event {
                RaceEvent::CheckpointCrossed { .. } => reward += p.checkpoint_bonus,
                RaceEvent::LapCompleted { .. } => reward += p.lap_bonus,
            }
        }

        reward -= obs.wall_hits as f64 * p.crash_penalty;
        reward += obs.target_bearing.cos().max(0.0) * p.heading_scale * obs.dt;
        reward += obs.velocity.max(0.0) / bs * p.speed_scale * obs.dt;

        let wall_thresh = p.wall_thresh_blocks * bs;
        if obs.min_lidar < wall_thresh {
            reward -= (wall_thresh - obs.min_lidar) / bs * p.wall_scale * obs.dt;
        }

        reward -= obs.steer_target.abs() * p.steer_penalty * obs.dt;
        if obs.max_steer > 0.0 {
            reward += (1.0 - obs.steer.abs() / obs.max_steer) * p.straight_bonus * obs.dt;
        }

        self.score += reward;
        reward
    }
}

/// EvalSetup is shared by all evaluations of one generation.
pub struct EvalSetup<'a> {
    pub track: &'a Track,
    pub sim_pars: &'a SimPars,
    pub mapping: OutputMapping,
    pub eval_time: f64,
    pub timestep_size: f64,
    pub mode: FitnessMode,
}

/// evaluate_genome drives one single-lap session with the genome's network and returns its
/// fitness. The session ends after the first lap or after the evaluation time.
pub fn evaluate_genome(genome: &Genome, setup: &EvalSetup) -> anyhow::Result<f64> {
    let lidar = &setup.sim_pars.sensor_pars.lidar;
    let net = NeuralNet::new(
        genome.to_owned(),
        no_neural_inputs(lidar),
        setup.mapping.no_outputs(),
    )?;
    let controller = NeuralController::new(Box::new(net), setup.mapping, lidar)?;

    let session_pars = SessionPars {
        tot_no_laps: 1,
        max_sim_time: setup.eval_time,
        car_collisions: false,
        ..setup.sim_pars.session_pars.to_owned()
    };
    let palette = Palette::from_pars(&setup.sim_pars.sensor_pars.palette)?;

    let mut session = Session::new(
        &session_pars,
        &setup.sim_pars.vehicle_pars,
        &setup.sim_pars.terrain_pars,
        &palette,
        setup.track.to_owned(),
        vec![EntrantSpec {
            name: String::from("genome"),
            color: setup.sim_pars.sensor_pars.palette.checkpoint.to_owned(),
            sprite: None,
            controller: Box::new(controller),
        }],
        setup.timestep_size,
    )?;

    let mut reward = ShapedReward::new(&setup.sim_pars.reward_pars);
    let block_size = session.track.block_size as f64;

    while !session.get_all_finished() && !session.timed_out() {
        session.simulate_timestep();

        if setup.mode == FitnessMode::Shaped {
            let entrant = &session.entrants[0];
            let vehicle = &entrant.vehicle;
            let (target_dist, target_bearing) = entrant.race_state.next_checkpoint_info(
                vehicle.position(),
                vehicle.yaw(),
                session.gates(),
            );
            let min_lidar = entrant
                .sensors
                .get_lidar(
                    vehicle,
                    session.surface(),
                    lidar.num_rays,
                    lidar.fov_deg.to_radians(),
                    vehicle.width * lidar.max_dist_car_widths,
                    lidar.step,
                )
                .into_iter()
                .fold(f64::INFINITY, f64::min);

            reward.update(&FrameObservation {
                dt: session.timestep_size,
                block_size,
                target_dist,
                target_bearing,
                velocity: vehicle.velocity(),
                min_lidar,
                steer: vehicle.steer(),
                steer_target: vehicle.steer_target(),
                max_steer: vehicle.max_steer(),
                events: &entrant.frame_events,
                wall_hits: entrant.frame_wall_hits,
            });
        }
    }

    let fitness = match setup.mode {
        FitnessMode::LapTime => {
            let race_state = &session.entrants[0].race_state;
            lap_time_fitness(
                race_state.laps(),
                race_state.total_lap_time(),
                session.cur_time,
            )
        }
        FitnessMode::Shaped => reward.score,
    };
    Ok(fitness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn observation(events: &[RaceEvent]) -> FrameObservation {
        FrameObservation {
            dt: 0.1,
            block_size: 100.0,
            target_dist: 400.0,
            target_bearing: 0.0,
            velocity: 0.0,
            min_lidar: 500.0,
            steer: 0.0,
            steer_target: 0.0,
            max_steer: 0.5,
            events,
            wall_hits: 0,
        }
    }

    #[test]
    fn lap_time_fitness_prefers_laps_then_time() {
        assert!(lap_time_fitness(1, 30.0, 31.0) > lap_time_fitness(0, 0.0, 5.0));
        assert!(lap_time_fitness(1, 20.0, 20.0) > lap_time_fitness(1, 25.0, 25.0));
        assert_abs_diff_eq!(lap_time_fitness(0, 0.0, 12.5), -12.5);
        assert_abs_diff_eq!(lap_time_fitness(2, 40.0, 41.0), 1960.0);
    }

    #[test]
    fn idle_car_heading_for_the_gate() {
        let mut reward = ShapedReward::new(&RewardPars::default());

        // first frame: no approach term, idle penalty 1.0, heading bonus 10.0, straight 1.0
        let r = reward.update(&observation(&[]));
        assert_abs_diff_eq!(r, -1.0 + 10.0 + 1.0, epsilon = 1e-9);

        // half a block closer: + 100
        let obs = FrameObservation {
            target_dist: 350.0,
            ..observation(&[])
        };
        let r = reward.update(&obs);
        assert_abs_diff_eq!(r, 100.0 - 1.0 + 10.0 + 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(reward.score, 10.0 + 110.0, epsilon = 1e-9);
    }

    #[test]
    fn events_and_walls() {
        let mut reward = ShapedReward::new(&RewardPars::default());
        reward.update(&observation(&[]));

        // the gate switched: the distance jump is ignored, the bonus counts
        let events = [RaceEvent::CheckpointCrossed { idx: 0 }];
        let obs = FrameObservation {
            target_dist: 900.0,
            ..observation(&events)
        };
        let r = reward.update(&obs);
        assert_abs_diff_eq!(r, 200.0 - 1.0 + 10.0 + 1.0, epsilon = 1e-9);

        // wall contact facing away with the wheels at full lock
        let obs = FrameObservation {
            target_dist: 900.0,
            target_bearing: std::f64::consts::PI,
            min_lidar: 10.0,
            steer: 0.5,
            steer_target: 0.5,
            wall_hits: 2,
            ..observation(&[])
        };
        let r = reward.update(&obs);
        // crash -100, idle -1, wall -(30 - 10) / 100 * 200 * 0.1 = -4, steer -0.25
        assert_abs_diff_eq!(r, -100.0 - 1.0 - 4.0 - 0.25, epsilon = 1e-9);
    }

    #[test]
    fn fitness_mode_from_str() {
        assert_eq!("lap-time".parse::<FitnessMode>(), Ok(FitnessMode::LapTime));
        assert_eq!("Shaped".parse::<FitnessMode>(), Ok(FitnessMode::Shaped));
        assert!("fast".parse::<FitnessMode>().is_err());
    }

    #[test]
    fn genome_evaluation_is_deterministic() {
        let track = Track::from_reader(
            "straight",
            "8\nspawn,1,1\nfinish,6,0,6,2\n0,1,0,0\n1,1,0,0\n2,1,0,0\n3,1,0,0\n".as_bytes(),
            800,
        )
        .unwrap();
        let sim_pars = SimPars::default();
        let length = NeuralNet::genome_length(
            no_neural_inputs(&sim_pars.sensor_pars.lidar),
            OutputMapping::Direct.no_outputs(),
        );
        let genome = Genome {
            weights: vec![0.1; length],
        };

        for mode in [FitnessMode::LapTime, FitnessMode::Shaped] {
            let setup = EvalSetup {
                track: &track,
                sim_pars: &sim_pars,
                mapping: OutputMapping::Direct,
                eval_time: 2.0,
                timestep_size: 0.05,
                mode,
            };
            let a = evaluate_genome(&genome, &setup).unwrap();
            let b = evaluate_genome(&genome, &setup).unwrap();
            assert_abs_diff_eq!(a, b);
        }

        let wrong = Genome {
            weights: vec![0.1; length - 1],
        };
        let setup = EvalSetup {
            track: &track,
            sim_pars: &sim_pars,
            mapping: OutputMapping::Direct,
            eval_time: 1.0,
            timestep_size: 0.05,
            mode: FitnessMode::LapTime,
        };
        assert!(evaluate_genome(&wrong, &setup).is_err());
    }
}
