use crate::core::collision::{apply_response, check_car_collision, classify, SurfaceResponse, TerrainPars};
use crate::core::controller::{ControlContext, ControlInput, Controller};
use crate::core::race_state::{RaceEvent, RaceState};
use crate::core::sensors::SensorArray;
use crate::core::surface::{FrameBuffer, Palette, RgbColor, Surface, TileGrid};
use crate::core::track::{Gates, Track};
use crate::core::vehicle::{Vehicle, VehiclePars};
use crate::interfaces::observer::{CarState, SessionState};
use crate::post::session_result::{EntrantResult, SessionResult};
use helpers::general::InputValueError;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceBackend {
    Geometric,
    Raster,
}

/// * `tot_no_laps` - Number of laps after which a car has finished
/// * `screen_size` - (px) Edge length of the square track surface
/// * `substep_cell_fraction` - Maximum distance a car may travel per sub-step as a fraction of
/// the block size
/// * `max_substeps` - Upper limit for the number of sub-steps per frame
/// * `car_collisions` - Check collisions between cars
/// * `backend` - Sensing backend (geometric tile evaluation or rendered pixels)
/// * `max_sim_time` - (s) The session ends after this time even if not all cars finished
/// * `spawn_yaw_deg` - (deg) Initial heading of all cars
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionPars {
    pub tot_no_laps: u32,
    pub screen_size: u32,
    pub substep_cell_fraction: f64,
    pub max_substeps: u32,
    pub car_collisions: bool,
    pub backend: SurfaceBackend,
    pub max_sim_time: f64,
    pub spawn_yaw_deg: f64,
}

impl Default for SessionPars {
    fn default() -> Self {
        SessionPars {
            tot_no_laps: 1,
            screen_size: 800,
            substep_cell_fraction: 0.1,
            max_substeps: 32,
            car_collisions: false,
            backend: SurfaceBackend::Geometric,
            max_sim_time: 120.0,
            spawn_yaw_deg: 0.0,
        }
    }
}

impl SessionPars {
    pub fn validate(&self) -> Result<(), InputValueError> {
        if self.tot_no_laps == 0 {
            return Err(InputValueError::new("tot_no_laps", "must be at least 1"));
        }
        if self.substep_cell_fraction <= 0.0 {
            return Err(InputValueError::new(
                "substep_cell_fraction",
                "must be positive",
            ));
        }
        if self.max_substeps == 0 {
            return Err(InputValueError::new("max_substeps", "must be at least 1"));
        }
        if self.max_sim_time <= 0.0 {
            return Err(InputValueError::new("max_sim_time", "must be positive"));
        }
        Ok(())
    }
}

/// Presentation holds what a renderer needs to draw an entrant. The simulation never reads it.
#[derive(Debug, Clone, Default)]
pub struct Presentation {
    pub color: RgbColor,
    pub sprite: Option<String>,
}

/// EntrantSpec describes a participant before the session is created.
pub struct EntrantSpec {
    pub name: String,
    pub color: String,
    pub sprite: Option<String>,
    pub controller: Box<dyn Controller>,
}

pub struct Entrant {
    pub name: String,
    pub presentation: Presentation,
    pub vehicle: Vehicle,
    pub sensors: SensorArray,
    pub race_state: RaceState,
    pub last_input: ControlInput,
    pub wall_hits: u32,
    pub finished: bool,
    pub frame_events: Vec<RaceEvent>,
    pub frame_wall_hits: u32,
    controller: Box<dyn Controller>,
}

pub struct Session {
    pub timestep_size: f64,
    pub cur_time: f64,
    pub pars: SessionPars,
    pub track: Track,
    pub entrants: Vec<Entrant>,
    gates: Gates,
    surface: Box<dyn Surface>,
    terrain_pars: TerrainPars,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_pars: &SessionPars,
        vehicle_pars: &VehiclePars,
        terrain_pars: &TerrainPars,
        palette: &Palette,
        track: Track,
        entrant_specs: Vec<EntrantSpec>,
        timestep_size: f64,
    ) -> anyhow::Result<Session> {
        session_pars.validate()?;
        vehicle_pars.validate()?;
        terrain_pars.validate()?;

        if timestep_size <= 0.0 {
            return Err(InputValueError::new("timestep_size", "must be positive").into());
        }

        // create surface
        let surface: Box<dyn Surface> = match session_pars.backend {
            SurfaceBackend::Geometric => Box::new(TileGrid::new(&track)),
            SurfaceBackend::Raster => Box::new(FrameBuffer::render(&track, palette)),
        };

        // create entrants
        let yaw = session_pars.spawn_yaw_deg.to_radians();
        let (car_width, car_height) = track.car_size();
        let spawn_positions =
            track.spawn_positions(entrant_specs.len(), session_pars.car_collisions, yaw);
        let mut entrants = Vec::with_capacity(entrant_specs.len());

        for (spec, position) in entrant_specs.into_iter().zip(spawn_positions.into_iter()) {
            entrants.push(Entrant {
                name: spec.name,
                presentation: Presentation {
                    color: RgbColor::parse(&spec.color)?,
                    sprite: spec.sprite,
                },
                vehicle: Vehicle::new(vehicle_pars, car_width, car_height, position, yaw),
                sensors: SensorArray::new(),
                race_state: RaceState::new(0.0),
                last_input: ControlInput::default(),
                wall_hits: 0,
                finished: false,
                frame_events: vec![],
                frame_wall_hits: 0,
                controller: spec.controller,
            });
        }

        let gates = track.gates();

        Ok(Session {
            timestep_size,
            cur_time: 0.0,
            pars: session_pars.to_owned(),
            track,
            entrants,
            gates,
            surface,
            terrain_pars: terrain_pars.to_owned(),
        })
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHOD ---------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// simulate_timestep advances the session by one frame. Drivers decide once at the start of
    /// the frame, physics, sensing, collision response and race state run per sub-step.
    pub fn simulate_timestep(&mut self) {
        let surface = self.surface.as_ref();

        // driver decisions
        for entrant in self.entrants.iter_mut() {
            entrant.frame_events.clear();
            entrant.frame_wall_hits = 0;

            if entrant.finished {
                continue;
            }

            let ctx = ControlContext {
                vehicle: &entrant.vehicle,
                sensors: &entrant.sensors,
                surface,
                race_state: &entrant.race_state,
                gates: &self.gates,
                dt: self.timestep_size,
                sim_time: self.cur_time,
            };
            let input = entrant.controller.get_actions(&ctx);

            entrant
                .vehicle
                .set_inputs(input.throttle, input.brake, input.steer_target);
            entrant.last_input = input;
        }

        let no_substeps = self.calc_no_substeps();
        let sub_dt = self.timestep_size / no_substeps as f64;

        for k in 0..no_substeps {
            let t_sub = self.cur_time + (k + 1) as f64 * sub_dt;

            // dynamics, sensing and surface response
            for entrant in self.entrants.iter_mut().filter(|e| !e.finished) {
                entrant.vehicle.update(sub_dt);

                let readings = entrant.sensors.sample(&entrant.vehicle, surface);
                entrant.sensors.update_readings(&readings);

                let response = classify(&readings);
                if response == SurfaceResponse::Wall {
                    entrant.wall_hits += 1;
                    entrant.frame_wall_hits += 1;
                    debug!(entrant = %entrant.name, t = t_sub, "Wall contact, rolling back");
                }
                apply_response(&mut entrant.vehicle, response, &self.terrain_pars);
            }

            if self.pars.car_collisions {
                Session::handle_car_collisions(&mut self.entrants);
            }

            // race state
            for entrant in self.entrants.iter_mut().filter(|e| !e.finished) {
                let events = entrant.race_state.update(
                    entrant.vehicle.prev_position(),
                    entrant.vehicle.position(),
                    &self.gates,
                    t_sub,
                );

                for event in events.iter() {
                    if let RaceEvent::LapCompleted { lap, lap_time } = event {
                        info!(
                            "{} completed lap {} in {:.3}s",
                            entrant.name, lap, lap_time
                        );
                        if *lap >= self.pars.tot_no_laps {
                            entrant.finished = true;
                            info!("{} finished after {:.3}s", entrant.name, t_sub);
                        }
                    }
                }
                entrant.frame_events.extend(events);
            }
        }

        self.cur_time += self.timestep_size;
    }

    // ---------------------------------------------------------------------------------------------
    // METHODS (HELPERS) ---------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// calc_no_substeps determines the number of sub-steps such that no car can travel further
    /// than the configured fraction of a block within one sub-step.
    pub fn calc_no_substeps(&self) -> u32 {
        let dt = self.timestep_size;
        let max_travel = self.pars.substep_cell_fraction * self.track.block_size as f64;

        let travel = self
            .entrants
            .iter()
            .filter(|e| !e.finished)
            .map(|e| (e.vehicle.velocity().abs() + e.vehicle.max_acceleration() * dt) * dt)
            .fold(0.0, f64::max);

        if max_travel <= 0.0 {
            return self.pars.max_substeps;
        }

        ((travel / max_travel).ceil() as u32).clamp(1, self.pars.max_substeps)
    }

    /// handle_car_collisions rolls back every pair of running cars whose bounding boxes overlap.
    fn handle_car_collisions(entrants: &mut [Entrant]) {
        let no_entrants = entrants.len();
        let mut hit = vec![false; no_entrants];

        for i in 0..no_entrants {
            for j in i + 1..no_entrants {
                let (a, b) = (&entrants[i], &entrants[j]);
                if a.finished || b.finished {
                    continue;
                }
                if check_car_collision(&a.vehicle, &b.vehicle) {
                    debug!("Collision between {} and {}", a.name, b.name);
                    hit[i] = true;
                    hit[j] = true;
                }
            }
        }

        for (entrant, was_hit) in entrants.iter_mut().zip(hit.into_iter()) {
            if was_hit {
                entrant.vehicle.handle_collision();
            }
        }
    }

    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    pub fn gates(&self) -> &Gates {
        &self.gates
    }

    pub fn get_all_finished(&self) -> bool {
        self.entrants.iter().all(|e| e.finished)
    }

    pub fn timed_out(&self) -> bool {
        self.cur_time >= self.pars.max_sim_time
    }

    pub fn get_session_result(&self) -> SessionResult {
        SessionResult {
            track_name: self.track.name.to_owned(),
            tot_no_laps: self.pars.tot_no_laps,
            sim_time: self.cur_time,
            entrants: self
                .entrants
                .iter()
                .map(|e| EntrantResult {
                    name: e.name.to_owned(),
                    laps: e.race_state.laps(),
                    lap_times: e.race_state.lap_times().to_vec(),
                    best_lap: e.race_state.best_lap(),
                    total_time: e.race_state.total_lap_time(),
                    finished: e.finished,
                    wall_hits: e.wall_hits,
                })
                .collect(),
        }
    }

    pub fn get_session_state(&self) -> SessionState {
        SessionState {
            sim_time: self.cur_time,
            car_states: self
                .entrants
                .iter()
                .map(|e| CarState {
                    name: e.name.to_owned(),
                    color: e.presentation.color,
                    sprite: e.presentation.sprite.to_owned(),
                    position: e.vehicle.position(),
                    heading_deg: e.vehicle.heading_deg(),
                    velocity: e.vehicle.velocity(),
                    laps: e.race_state.laps(),
                    next_checkpoint: e.race_state.next_checkpoint(),
                    finished: e.finished,
                })
                .collect(),
            final_result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::ConstantController;

    /// Open straight along row 1 with the finish line at x = 650.
    const STRAIGHT: &str = "\
8
spawn,1,1
finish,6,0,6,2
0,1,0,0
1,1,0,0
2,1,0,0
3,1,0,0
4,1,0,0
5,1,0,0
6,1,0,0
7,1,0,0
";

    fn session(specs: Vec<EntrantSpec>, pars: SessionPars) -> Session {
        let track = Track::from_reader("straight", STRAIGHT.as_bytes(), 800).unwrap();
        Session::new(
            &pars,
            &VehiclePars::default(),
            &TerrainPars::default(),
            &Palette::default(),
            track,
            specs,
            1.0 / 60.0,
        )
        .unwrap()
    }

    fn constant(name: &str, throttle: f64) -> EntrantSpec {
        EntrantSpec {
            name: name.to_owned(),
            color: String::from("#ff0000"),
            sprite: None,
            controller: Box::new(ConstantController::new(throttle, 0.0, 0.0)),
        }
    }

    #[test]
    fn substeps_grow_with_speed_and_are_capped() {
        let fine = SessionPars {
            substep_cell_fraction: 0.02,
            ..SessionPars::default()
        };
        let mut s = session(vec![constant("A", 1.0)], fine);
        // standstill: a_max * dt^2 is well below the allowed travel
        assert_eq!(s.calc_no_substeps(), 1);

        for _ in 0..60 {
            s.simulate_timestep();
        }
        assert!(s.calc_no_substeps() > 1);

        let capped = SessionPars {
            max_substeps: 2,
            substep_cell_fraction: 0.001,
            ..SessionPars::default()
        };
        let s = session(vec![constant("A", 1.0)], capped);
        assert_eq!(s.calc_no_substeps(), 2);
    }

    #[test]
    fn finished_session_and_result() {
        let mut s = session(vec![constant("A", 1.0)], SessionPars::default());
        while !s.get_all_finished() && !s.timed_out() {
            s.simulate_timestep();
        }

        let result = s.get_session_result();
        assert!(result.entrants[0].finished);
        assert_eq!(result.entrants[0].laps, 1);
        assert_eq!(result.entrants[0].wall_hits, 0);
        assert!(result.sim_time < 120.0);

        let state = s.get_session_state();
        assert_eq!(state.car_states.len(), 1);
        assert!(state.car_states[0].position.x > 650.0);
    }

    #[test]
    fn colliding_cars_are_rolled_back() {
        let pars = SessionPars {
            car_collisions: true,
            ..SessionPars::default()
        };
        // the rear car drives into the stationary front car
        let mut s = session(vec![constant("front", 0.0), constant("rear", 0.0)], pars);
        assert!(!check_car_collision(&s.entrants[0].vehicle, &s.entrants[1].vehicle));

        let front_x = s.entrants[0].vehicle.position().x;
        let rear_pos = s.entrants[0].vehicle.position() - glam::DVec2::new(60.0, 0.0);
        s.entrants[1].vehicle.reset(rear_pos, 0.0);
        s.entrants[1].controller = Box::new(ConstantController::new(1.0, 0.0, 0.0));

        for _ in 0..60 {
            s.simulate_timestep();
            assert!(!check_car_collision(&s.entrants[0].vehicle, &s.entrants[1].vehicle));
        }
        assert_eq!(s.entrants[0].vehicle.position().x, front_x);
    }

    #[test]
    fn diagonal_staggered_start_can_drive_off() {
        let pars = SessionPars {
            car_collisions: true,
            spawn_yaw_deg: 45.0,
            ..SessionPars::default()
        };
        // open grass field, nothing to hit but the other car
        let track = Track::from_reader("field", "8\nspawn,4,4\n".as_bytes(), 800).unwrap();
        let mut s = Session::new(
            &pars,
            &VehiclePars::default(),
            &TerrainPars::default(),
            &Palette::default(),
            track,
            vec![constant("A", 1.0), constant("B", 1.0)],
            1.0 / 60.0,
        )
        .unwrap();
        let start: Vec<_> = s.entrants.iter().map(|e| e.vehicle.position()).collect();
        assert!(!check_car_collision(&s.entrants[0].vehicle, &s.entrants[1].vehicle));

        for _ in 0..60 {
            s.simulate_timestep();
        }

        for (entrant, p0) in s.entrants.iter().zip(start.iter()) {
            assert!(entrant.vehicle.position().distance(*p0) > 10.0);
            assert!(entrant.vehicle.velocity() > 0.0);
        }
    }
}
