use crate::core::race_state::RaceState;
use crate::core::sensors::{LidarPars, SensorArray};
use crate::core::surface::Surface;
use crate::core::track::Gates;
use crate::core::vehicle::Vehicle;
use helpers::general::InputValueError;
use std::cell::RefCell;
use std::collections::HashSet;
use std::f64::consts::{FRAC_PI_4, PI};
use std::rc::Rc;

/// (px/s) Below this speed the car counts as stopped for the keyboard reverse logic.
const STANDSTILL_SPEED: f64 = 1.0;

/// (px/s) Velocity scale of the neural network input.
const VELOCITY_SCALE: f64 = 1000.0;

/// ControlInput is what a driver decides once per frame.
/// * `throttle` - Throttle in [0, 1], negative values in [-1, 0[ drive backwards
/// * `brake` - Brake in [0, 1]
/// * `steer_target` - (rad) Steering target in [-max_steer, max_steer], positive turns left
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    pub throttle: f64,
    pub brake: f64,
    pub steer_target: f64,
}

/// ControlContext is everything a driver may look at when deciding.
pub struct ControlContext<'a> {
    pub vehicle: &'a Vehicle,
    pub sensors: &'a SensorArray,
    pub surface: &'a dyn Surface,
    pub race_state: &'a RaceState,
    pub gates: &'a Gates,
    pub dt: f64,
    pub sim_time: f64,
}

impl<'a> ControlContext<'a> {
    pub fn next_checkpoint_info(&self) -> (f64, f64) {
        self.race_state
            .next_checkpoint_info(self.vehicle.position(), self.vehicle.yaw(), self.gates)
    }
}

pub trait Controller {
    fn get_actions(&mut self, ctx: &ControlContext) -> ControlInput;
}

/// Policy maps a fixed-width input vector to a fixed-width output vector, e.g. a neural network.
pub trait Policy {
    fn no_inputs(&self) -> usize;
    fn no_outputs(&self) -> usize;
    fn activate(&self, inputs: &[f64]) -> Vec<f64>;
}

// -------------------------------------------------------------------------------------------------
// KEYBOARD ----------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    W,
    A,
    S,
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheme {
    Arrows,
    Wasd,
}

impl KeyScheme {
    /// keys returns the (up, down, left, right) keys of the scheme.
    pub fn keys(&self) -> (Key, Key, Key, Key) {
        match self {
            KeyScheme::Arrows => (Key::Up, Key::Down, Key::Left, Key::Right),
            KeyScheme::Wasd => (Key::W, Key::S, Key::A, Key::D),
        }
    }
}

/// KeyState is the set of currently pressed keys, shared between the input source and the
/// keyboard controllers of all local players.
pub type KeyState = Rc<RefCell<HashSet<Key>>>;

/// KeyboardController maps a key scheme to driver inputs. Holding down while stopped for
/// reverse_delay seconds engages reverse. The simulator itself reads no keyboard: an external
/// presentation layer owns the event loop and writes the pressed keys into the shared KeyState.
/// * `reverse_delay` - (s) Time down must be held at standstill before reversing
/// * `reverse_throttle` - Throttle magnitude used when reversing
pub struct KeyboardController {
    scheme: KeyScheme,
    keys: KeyState,
    pub reverse_delay: f64,
    pub reverse_throttle: f64,
    t_down_stopped: f64,
}

impl KeyboardController {
    pub fn new(scheme: KeyScheme, keys: KeyState) -> KeyboardController {
        KeyboardController {
            scheme,
            keys,
            reverse_delay: 0.3,
            reverse_throttle: 0.5,
            t_down_stopped: 0.0,
        }
    }
}

impl Controller for KeyboardController {
    fn get_actions(&mut self, ctx: &ControlContext) -> ControlInput {
        let (up, down, left, right) = self.scheme.keys();
        let pressed = self.keys.borrow();
        let v = ctx.vehicle.velocity();
        let max_steer = ctx.vehicle.max_steer();

        let mut input = ControlInput::default();

        if pressed.contains(&down) {
            if v > STANDSTILL_SPEED {
                input.brake = 1.0;
                self.t_down_stopped = 0.0;
            } else {
                self.t_down_stopped += ctx.dt;
                if self.t_down_stopped >= self.reverse_delay {
                    input.throttle = -self.reverse_throttle;
                }
            }
        } else {
            self.t_down_stopped = 0.0;
        }

        if pressed.contains(&up) {
            input.throttle = 1.0;
        }

        if pressed.contains(&left) {
            input.steer_target = max_steer;
        } else if pressed.contains(&right) {
            input.steer_target = -max_steer;
        }

        input
    }
}

// -------------------------------------------------------------------------------------------------
// CONSTANT ----------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// ConstantController always returns the same input (demo and test driver).
pub struct ConstantController {
    pub input: ControlInput,
}

impl ConstantController {
    pub fn new(throttle: f64, brake: f64, steer_target: f64) -> ConstantController {
        ConstantController {
            input: ControlInput {
                throttle,
                brake,
                steer_target,
            },
        }
    }
}

impl Controller for ConstantController {
    fn get_actions(&mut self, _ctx: &ControlContext) -> ControlInput {
        self.input
    }
}

// -------------------------------------------------------------------------------------------------
// HEURISTIC ---------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// HeuristicController avoids walls using the lidar and otherwise steers towards the next
/// checkpoint.
pub struct HeuristicController {
    pub num_rays: usize,
    pub fov: f64,
    pub step: f64,
    pub dead_zone: f64,
    pub max_dist_car_widths: f64,
    pub block_thresh_car_widths: f64,
}

impl Default for HeuristicController {
    fn default() -> Self {
        HeuristicController {
            num_rays: 11,
            fov: PI,
            step: 4.0,
            dead_zone: 0.1,
            max_dist_car_widths: 10.0,
            block_thresh_car_widths: 1.5,
        }
    }
}

impl Controller for HeuristicController {
    fn get_actions(&mut self, ctx: &ControlContext) -> ControlInput {
        let vehicle = ctx.vehicle;
        let max_steer = vehicle.max_steer();
        let max_dist = vehicle.width * self.max_dist_car_widths;
        let block_thresh = vehicle.width * self.block_thresh_car_widths;

        let rays = ctx.sensors.get_lidar(
            vehicle,
            ctx.surface,
            self.num_rays,
            self.fov,
            max_dist,
            self.step,
        );
        let forward_dist = rays.get(rays.len() / 2).copied().unwrap_or(max_dist);
        let (_, bearing) = ctx.next_checkpoint_info();
        let blocked = forward_dist < block_thresh;

        let steer_target = if blocked && rays.len() >= 2 {
            let n = rays.len();
            let left_clear = rays[0] + rays[1];
            let right_clear = rays[n - 1] + rays[n - 2];
            if left_clear >= right_clear {
                max_steer
            } else {
                -max_steer
            }
        } else if bearing.abs() < self.dead_zone {
            0.0
        } else {
            (bearing / max_steer).clamp(-1.0, 1.0) * max_steer
        };

        let throttle = if !blocked && bearing.abs() < FRAC_PI_4 {
            1.0
        } else {
            0.5
        };

        ControlInput {
            throttle,
            brake: 0.0,
            steer_target,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// NEURAL ------------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// OutputMapping decides how the network outputs are turned into driver inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMapping {
    /// Three outputs: throttle, brake (negative side), steering with a dead zone.
    Direct,
    /// Four outputs: throttle, brake (negative side), steer left, steer right.
    SplitSteer,
}

impl OutputMapping {
    pub fn no_outputs(&self) -> usize {
        match self {
            OutputMapping::Direct => 3,
            OutputMapping::SplitSteer => 4,
        }
    }

    pub fn map(&self, outputs: &[f64], max_steer: f64, dead_zone: f64) -> ControlInput {
        let throttle = outputs[0].clamp(0.0, 1.0);
        let brake = (-outputs[1]).clamp(0.0, 1.0);

        let steer = match self {
            OutputMapping::Direct => {
                let raw = outputs[2].clamp(-1.0, 1.0);
                if raw.abs() < dead_zone {
                    0.0
                } else {
                    // rescale such that full lock is still reachable
                    (raw - dead_zone.copysign(raw)) / (1.0 - dead_zone)
                }
            }
            OutputMapping::SplitSteer => outputs[2].max(0.0) - outputs[3].max(0.0),
        };

        ControlInput {
            throttle,
            brake,
            steer_target: steer.clamp(-1.0, 1.0) * max_steer,
        }
    }
}

/// no_neural_inputs returns the width of the network input vector for a lidar configuration:
/// the ray distances plus velocity, checkpoint distance, checkpoint bearing and steering angle.
pub fn no_neural_inputs(lidar: &LidarPars) -> usize {
    lidar.num_rays + 4
}

/// NeuralController feeds normalized sensor values into a policy.
pub struct NeuralController {
    policy: Box<dyn Policy>,
    mapping: OutputMapping,
    lidar: LidarPars,
    pub dead_zone: f64,
}

impl NeuralController {
    pub fn new(
        policy: Box<dyn Policy>,
        mapping: OutputMapping,
        lidar: &LidarPars,
    ) -> Result<NeuralController, InputValueError> {
        lidar.validate()?;
        if policy.no_inputs() != no_neural_inputs(lidar) {
            return Err(InputValueError::new(
                "policy",
                &format!(
                    "expects {} inputs but the sensors provide {}",
                    policy.no_inputs(),
                    no_neural_inputs(lidar)
                ),
            ));
        }
        if policy.no_outputs() != mapping.no_outputs() {
            return Err(InputValueError::new(
                "policy",
                &format!(
                    "provides {} outputs but {:?} requires {}",
                    policy.no_outputs(),
                    mapping,
                    mapping.no_outputs()
                ),
            ));
        }

        Ok(NeuralController {
            policy,
            mapping,
            lidar: lidar.to_owned(),
            dead_zone: 0.1,
        })
    }

    /// build_inputs assembles the normalized input vector.
    pub fn build_inputs(&self, ctx: &ControlContext) -> Vec<f64> {
        let vehicle = ctx.vehicle;
        let max_dist = vehicle.width * self.lidar.max_dist_car_widths;

        let mut inputs = ctx.sensors.get_lidar_normalized(
            vehicle,
            ctx.surface,
            self.lidar.num_rays,
            self.lidar.fov_deg.to_radians(),
            max_dist,
            self.lidar.step,
        );

        let (dist, bearing) = ctx.next_checkpoint_info();
        let surface_width = (ctx.surface.size().0 as f64).max(1.0);

        inputs.push(vehicle.velocity() / VELOCITY_SCALE);
        inputs.push(dist / surface_width);
        inputs.push(bearing / PI);
        inputs.push(vehicle.steer() / vehicle.max_steer());
        inputs
    }
}

impl Controller for NeuralController {
    fn get_actions(&mut self, ctx: &ControlContext) -> ControlInput {
        let inputs = self.build_inputs(ctx);
        let outputs = self.policy.activate(&inputs);
        self.mapping
            .map(&outputs, ctx.vehicle.max_steer(), self.dead_zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::surface::TileGrid;
    use crate::core::track::Track;
    use crate::core::vehicle::VehiclePars;
    use approx::assert_abs_diff_eq;
    use glam::DVec2;

    struct Fixture {
        grid: TileGrid,
        gates: Gates,
        vehicle: Vehicle,
        sensors: SensorArray,
        race_state: RaceState,
    }

    impl Fixture {
        fn new(rows: &str, position: DVec2) -> Fixture {
            let track = Track::from_reader("ctrl", rows.as_bytes(), 800).unwrap();
            Fixture {
                grid: TileGrid::new(&track),
                gates: track.gates(),
                vehicle: Vehicle::new(&VehiclePars::default(), 50.0, 25.0, position, 0.0),
                sensors: SensorArray::new(),
                race_state: RaceState::new(0.0),
            }
        }

        fn ctx(&self, dt: f64) -> ControlContext {
            ControlContext {
                vehicle: &self.vehicle,
                sensors: &self.sensors,
                surface: &self.grid,
                race_state: &self.race_state,
                gates: &self.gates,
                dt,
                sim_time: 0.0,
            }
        }
    }

    struct FixedOutputs(Vec<f64>, usize);

    impl Policy for FixedOutputs {
        fn no_inputs(&self) -> usize {
            self.1
        }

        fn no_outputs(&self) -> usize {
            self.0.len()
        }

        fn activate(&self, inputs: &[f64]) -> Vec<f64> {
            assert_eq!(inputs.len(), self.1);
            self.0.clone()
        }
    }

    #[test]
    fn keyboard_reverse_needs_debounce() {
        let fixture = Fixture::new("4\n", DVec2::new(300.0, 300.0));
        let keys: KeyState = Rc::new(RefCell::new(HashSet::new()));
        let mut ctrl = KeyboardController::new(KeyScheme::Wasd, Rc::clone(&keys));

        keys.borrow_mut().insert(Key::S);
        assert_abs_diff_eq!(ctrl.get_actions(&fixture.ctx(0.1)).throttle, 0.0);
        assert_abs_diff_eq!(ctrl.get_actions(&fixture.ctx(0.1)).throttle, 0.0);
        ctrl.get_actions(&fixture.ctx(0.1));
        let input = ctrl.get_actions(&fixture.ctx(0.1));
        assert_abs_diff_eq!(input.throttle, -0.5);
        assert_abs_diff_eq!(input.brake, 0.0);

        // releasing the key resets the timer
        keys.borrow_mut().clear();
        ctrl.get_actions(&fixture.ctx(0.1));
        keys.borrow_mut().insert(Key::S);
        assert_abs_diff_eq!(ctrl.get_actions(&fixture.ctx(0.1)).throttle, 0.0);
    }

    #[test]
    fn keyboard_brakes_and_steers_while_moving() {
        let mut fixture = Fixture::new("4\n", DVec2::new(300.0, 300.0));
        fixture.vehicle.set_inputs(1.0, 0.0, 0.0);
        fixture.vehicle.update(0.1);

        let keys: KeyState = Rc::new(RefCell::new(HashSet::new()));
        keys.borrow_mut().insert(Key::Down);
        keys.borrow_mut().insert(Key::Right);
        // keys of the other scheme are ignored
        keys.borrow_mut().insert(Key::A);
        let mut ctrl = KeyboardController::new(KeyScheme::Arrows, keys);

        let input = ctrl.get_actions(&fixture.ctx(0.1));
        assert_abs_diff_eq!(input.brake, 1.0);
        assert_abs_diff_eq!(input.throttle, 0.0);
        assert_abs_diff_eq!(input.steer_target, -fixture.vehicle.max_steer());
    }

    #[test]
    fn heuristic_steers_towards_checkpoint() {
        // checkpoint north of the car, i.e. on the left when heading east
        let fixture = Fixture::new("4\ncheckpoint,1,0,2,0\n", DVec2::new(300.0, 500.0));
        let mut ctrl = HeuristicController::default();
        let input = ctrl.get_actions(&fixture.ctx(0.02));

        assert_abs_diff_eq!(input.steer_target, fixture.vehicle.max_steer());
        assert_abs_diff_eq!(input.throttle, 0.5);
    }

    #[test]
    fn heuristic_full_throttle_when_aligned() {
        let fixture = Fixture::new("4\ncheckpoint,3,2,3,3\n", DVec2::new(100.0, 600.0));
        let mut ctrl = HeuristicController::default();
        let input = ctrl.get_actions(&fixture.ctx(0.02));

        // target midpoint (700, 600) is straight ahead
        assert_abs_diff_eq!(input.steer_target, 0.0);
        assert_abs_diff_eq!(input.throttle, 1.0);
    }

    #[test]
    fn heuristic_evades_to_clearer_side() {
        // south and east walls in cell (1, 1), the car faces the east wall
        let fixture = Fixture::new(
            "4\n1,1,3,180\ncheckpoint,3,1,3,2\n",
            DVec2::new(330.0, 300.0),
        );
        let mut ctrl = HeuristicController::default();
        let input = ctrl.get_actions(&fixture.ctx(0.02));

        assert_abs_diff_eq!(input.steer_target, fixture.vehicle.max_steer());
        assert_abs_diff_eq!(input.throttle, 0.5);
    }

    #[test]
    fn direct_mapping_uses_dead_zone() {
        let max_steer = 0.5;
        let input = OutputMapping::Direct.map(&[0.7, -0.4, 0.05], max_steer, 0.1);
        assert_abs_diff_eq!(input.throttle, 0.7);
        assert_abs_diff_eq!(input.brake, 0.4);
        assert_abs_diff_eq!(input.steer_target, 0.0);

        let input = OutputMapping::Direct.map(&[-0.2, 0.3, -1.0], max_steer, 0.1);
        assert_abs_diff_eq!(input.throttle, 0.0);
        assert_abs_diff_eq!(input.brake, 0.0);
        assert_abs_diff_eq!(input.steer_target, -max_steer, epsilon = 1e-12);

        let input = OutputMapping::Direct.map(&[0.0, 0.0, 0.55], max_steer, 0.1);
        assert_abs_diff_eq!(input.steer_target, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn split_mapping_gates_left_and_right() {
        let input = OutputMapping::SplitSteer.map(&[1.0, 0.0, 0.6, -0.9], 0.5, 0.1);
        assert_abs_diff_eq!(input.steer_target, 0.3, epsilon = 1e-12);
        let input = OutputMapping::SplitSteer.map(&[1.0, 0.0, 0.2, 0.6], 0.5, 0.1);
        assert_abs_diff_eq!(input.steer_target, -0.2, epsilon = 1e-12);
    }

    #[test]
    fn neural_controller_checks_dimensions() {
        let lidar = LidarPars::default();
        assert_eq!(no_neural_inputs(&lidar), 11);

        let wrong_outputs = Box::new(FixedOutputs(vec![0.0; 4], 11));
        assert!(NeuralController::new(wrong_outputs, OutputMapping::Direct, &lidar).is_err());
        let wrong_inputs = Box::new(FixedOutputs(vec![0.0; 3], 10));
        assert!(NeuralController::new(wrong_inputs, OutputMapping::Direct, &lidar).is_err());
        let no_step = LidarPars {
            step: 0.0,
            ..LidarPars::default()
        };
        let matching = Box::new(FixedOutputs(vec![0.0; 3], 11));
        assert!(NeuralController::new(matching, OutputMapping::Direct, &no_step).is_err());

        let fixture = Fixture::new("4\n", DVec2::new(300.0, 300.0));
        let policy = Box::new(FixedOutputs(vec![1.0, 0.0, 0.0, 1.0], 11));
        let mut ctrl = NeuralController::new(policy, OutputMapping::SplitSteer, &lidar).unwrap();

        let inputs = ctrl.build_inputs(&fixture.ctx(0.02));
        assert_eq!(inputs.len(), 11);
        assert!(inputs[..7].iter().all(|d| *d > 0.0 && *d <= 1.0));

        let input = ctrl.get_actions(&fixture.ctx(0.02));
        assert_abs_diff_eq!(input.throttle, 1.0);
        assert_abs_diff_eq!(input.steer_target, -fixture.vehicle.max_steer());
    }

    #[test]
    fn constant_controller_repeats_itself() {
        let fixture = Fixture::new("4\n", DVec2::new(300.0, 300.0));
        let mut ctrl = ConstantController::new(1.0, 0.0, 0.1);
        let first = ctrl.get_actions(&fixture.ctx(0.02));
        assert_eq!(first, ctrl.get_actions(&fixture.ctx(0.02)));
    }
}
