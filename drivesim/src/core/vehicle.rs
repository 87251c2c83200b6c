use glam::DVec2;
use helpers::general::InputValueError;
use helpers::geometry::Aabb;
use serde::Deserialize;

/// Steering angles below this value (rad) are treated as driving straight.
const STEER_EPS: f64 = 1e-4;

/// * `wheelbase` - (px) Distance between front and rear axle
/// * `max_steer_deg` - (deg) Maximum steering angle
/// * `steer_speed_deg` - (deg/s) Maximum steering rate
/// * `mass` - (kg) Vehicle mass
/// * `drag_coefficient` - Aerodynamic drag coefficient Cd (F_drag = -Cd * v * |v|)
/// * `rolling_resistance` - Base rolling resistance coefficient Crr on road (F_rr = -Crr * v)
/// * `max_engine_force` - (N) Engine force at full throttle
/// * `max_brake_force` - (N) Brake force at full brake input (negative)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VehiclePars {
    pub wheelbase: f64,
    pub max_steer_deg: f64,
    pub steer_speed_deg: f64,
    pub mass: f64,
    pub drag_coefficient: f64,
    pub rolling_resistance: f64,
    pub max_engine_force: f64,
    pub max_brake_force: f64,
}

impl Default for VehiclePars {
    fn default() -> Self {
        VehiclePars {
            wheelbase: 50.0,
            max_steer_deg: 30.0,
            steer_speed_deg: 240.0,
            mass: 1200.0,
            drag_coefficient: 0.425,
            rolling_resistance: 12.8,
            max_engine_force: 500000.0,
            max_brake_force: -1000000.0,
        }
    }
}

impl VehiclePars {
    pub fn validate(&self) -> Result<(), InputValueError> {
        if self.wheelbase <= 0.0 {
            return Err(InputValueError::new("wheelbase", "must be positive"));
        }
        if self.max_steer_deg <= 0.0 || self.max_steer_deg >= 90.0 {
            return Err(InputValueError::new(
                "max_steer_deg",
                "must lie in the range ]0.0, 90.0[",
            ));
        }
        if self.steer_speed_deg <= 0.0 {
            return Err(InputValueError::new("steer_speed_deg", "must be positive"));
        }
        if self.mass <= 0.0 {
            return Err(InputValueError::new("mass", "must be positive"));
        }
        if self.drag_coefficient < 0.0 || self.rolling_resistance < 0.0 {
            return Err(InputValueError::new(
                "drag_coefficient/rolling_resistance",
                "must not be negative",
            ));
        }
        if self.max_engine_force <= 0.0 {
            return Err(InputValueError::new("max_engine_force", "must be positive"));
        }
        if self.max_brake_force >= 0.0 {
            return Err(InputValueError::new("max_brake_force", "must be negative"));
        }
        Ok(())
    }
}

/// Vehicle implements a kinematic bicycle model driven by longitudinal forces. Position is the
/// centre of the car in screen pixels (y down), yaw is measured from +x towards +y. A positive
/// steering angle turns the car left on screen, i.e. it decreases the yaw.
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub width: f64,
    pub height: f64,
    position: DVec2,
    yaw: f64,
    velocity: f64,
    steer: f64,
    steer_target: f64,
    throttle: f64,
    brake: f64,
    mass: f64,
    drag_coefficient: f64,
    crr_base: f64,
    crr: f64,
    wheelbase: f64,
    max_engine_force: f64,
    max_brake_force: f64,
    max_steer: f64,
    steer_speed: f64,
    snapshot_position: DVec2,
    snapshot_yaw: f64,
}

impl Vehicle {
    pub fn new(pars: &VehiclePars, width: f64, height: f64, position: DVec2, yaw: f64) -> Vehicle {
        Vehicle {
            width,
            height,
            position,
            yaw,
            velocity: 0.0,
            steer: 0.0,
            steer_target: 0.0,
            throttle: 0.0,
            brake: 0.0,
            mass: pars.mass,
            drag_coefficient: pars.drag_coefficient,
            crr_base: pars.rolling_resistance,
            crr: pars.rolling_resistance,
            wheelbase: pars.wheelbase,
            max_engine_force: pars.max_engine_force,
            max_brake_force: pars.max_brake_force,
            max_steer: pars.max_steer_deg.to_radians(),
            steer_speed: pars.steer_speed_deg.to_radians(),
            snapshot_position: position,
            snapshot_yaw: yaw,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // MAIN METHODS --------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// set_inputs stores the driver inputs for the following updates. Throttle is clamped to
    /// [-1, 1] (negative values drive backwards), brake to [0, 1] and the steering target to
    /// +-max_steer.
    pub fn set_inputs(&mut self, throttle: f64, brake: f64, steer_target: f64) {
        self.throttle = throttle.clamp(-1.0, 1.0);
        self.brake = brake.clamp(0.0, 1.0);
        self.steer_target = steer_target.clamp(-self.max_steer, self.max_steer);
    }

    /// update integrates the vehicle state over dt.
    pub fn update(&mut self, dt: f64) {
        self.snapshot_position = self.position;
        self.snapshot_yaw = self.yaw;

        // longitudinal dynamics
        let v = self.velocity;
        let f_drive = self.throttle * self.max_engine_force;
        let f_drag = -self.drag_coefficient * v * v.abs();
        let f_rr = -self.crr * v;

        // brake opposes the motion, no brake force at standstill
        let f_brake = if v > 0.0 {
            self.brake * self.max_brake_force
        } else if v < 0.0 {
            -self.brake * self.max_brake_force
        } else {
            0.0
        };

        let acc = (f_drive + f_brake + f_drag + f_rr) / self.mass;
        let mut v_new = v + acc * dt;

        if f_brake != 0.0 && v * v_new < 0.0 {
            v_new = 0.0;
        }
        self.velocity = v_new;

        // steering is rate limited
        let max_delta = self.steer_speed * dt;
        self.steer += (self.steer_target - self.steer).clamp(-max_delta, max_delta);

        // kinematic bicycle
        let omega = if self.steer.abs() > STEER_EPS {
            let turn_radius = self.wheelbase / self.steer.tan();
            self.velocity / turn_radius
        } else {
            0.0
        };

        self.yaw -= omega * dt;
        self.position = self.position + DVec2::from_angle(self.yaw) * (self.velocity * dt);
    }

    /// handle_collision restores the pose before the last update and stops the car.
    pub fn handle_collision(&mut self) {
        self.position = self.snapshot_position;
        self.yaw = self.snapshot_yaw;
        self.velocity = 0.0;
    }

    /// reset places the car at a pose with zero velocity, steering and inputs.
    pub fn reset(&mut self, position: DVec2, yaw: f64) {
        self.position = position;
        self.yaw = yaw;
        self.velocity = 0.0;
        self.steer = 0.0;
        self.steer_target = 0.0;
        self.throttle = 0.0;
        self.brake = 0.0;
        self.crr = self.crr_base;
        self.snapshot_position = position;
        self.snapshot_yaw = yaw;
    }

    pub fn set_terrain_multiplier(&mut self, multiplier: f64) {
        self.crr = self.crr_base * multiplier;
    }

    // ---------------------------------------------------------------------------------------------
    // GEOMETRY ------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    /// to_world converts a car-local offset (x forward, y to the right) into screen pixels.
    pub fn to_world(&self, local: DVec2) -> DVec2 {
        self.position + DVec2::from_angle(self.yaw).rotate(local)
    }

    /// corners returns the four corners of the car rectangle (front left, front right, rear
    /// right, rear left).
    pub fn corners(&self) -> [DVec2; 4] {
        let hw = self.width / 2.0;
        let hh = self.height / 2.0;
        [
            self.to_world(DVec2::new(hw, -hh)),
            self.to_world(DVec2::new(hw, hh)),
            self.to_world(DVec2::new(-hw, hh)),
            self.to_world(DVec2::new(-hw, -hh)),
        ]
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_points(&self.corners())
    }

    // ---------------------------------------------------------------------------------------------
    // GETTERS -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn position(&self) -> DVec2 {
        self.position
    }

    /// prev_position returns the position before the last update.
    pub fn prev_position(&self) -> DVec2 {
        self.snapshot_position
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn heading_deg(&self) -> f64 {
        -self.yaw.to_degrees()
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn steer(&self) -> f64 {
        self.steer
    }

    pub fn steer_target(&self) -> f64 {
        self.steer_target
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn brake(&self) -> f64 {
        self.brake
    }

    pub fn max_steer(&self) -> f64 {
        self.max_steer
    }

    pub fn crr(&self) -> f64 {
        self.crr
    }

    pub fn crr_base(&self) -> f64 {
        self.crr_base
    }

    /// max_acceleration returns the largest acceleration magnitude the car can produce (px/s^2).
    pub fn max_acceleration(&self) -> f64 {
        self.max_engine_force.abs().max(self.max_brake_force.abs()) / self.mass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collision::TerrainPars;
    use crate::core::surface::Terrain;
    use approx::assert_abs_diff_eq;

    fn vehicle() -> Vehicle {
        Vehicle::new(&VehiclePars::default(), 50.0, 25.0, DVec2::new(400.0, 400.0), 0.0)
    }

    fn terminal_velocity(pars: &VehiclePars, crr: f64) -> f64 {
        let cd = pars.drag_coefficient;
        (-crr + (crr * crr + 4.0 * cd * pars.max_engine_force).sqrt()) / (2.0 * cd)
    }

    #[test]
    fn full_throttle_converges_to_force_balance() {
        let pars = VehiclePars::default();
        let mut car = vehicle();
        car.set_inputs(1.0, 0.0, 0.0);

        for _ in 0..6000 {
            car.update(0.01);
        }

        assert_abs_diff_eq!(
            car.velocity(),
            terminal_velocity(&pars, pars.rolling_resistance),
            epsilon = 1e-3
        );
    }

    #[test]
    fn higher_rolling_resistance_lowers_top_speed() {
        let terrain_pars = TerrainPars::default();
        let terrains = [
            Terrain::Road,
            Terrain::Curb,
            Terrain::Grass,
            Terrain::Gravel,
            Terrain::Sand,
        ];

        let top_speeds: Vec<f64> = terrains
            .iter()
            .map(|terrain| {
                let mut car = vehicle();
                let multiplier = terrain_pars.multiplier(*terrain);
                car.set_terrain_multiplier(multiplier);
                assert_abs_diff_eq!(car.crr(), multiplier * 12.8);

                car.set_inputs(1.0, 0.0, 0.0);
                for _ in 0..3000 {
                    car.update(0.01);
                }
                car.velocity()
            })
            .collect();

        for (pair, terrain) in top_speeds.windows(2).zip(terrains[1..].iter()) {
            assert!(pair[1] < pair[0], "{:?} is not slower: {:?}", terrain, pair);
        }
    }

    #[test]
    fn steering_rate_is_bounded() {
        let mut car = vehicle();
        let dt = 0.01;
        let max_delta = 240f64.to_radians() * dt;
        car.set_inputs(0.0, 0.0, 10.0);
        assert_abs_diff_eq!(car.steer_target(), 30f64.to_radians());

        let mut prev = car.steer();
        for _ in 0..50 {
            car.update(dt);
            assert!((car.steer() - prev).abs() <= max_delta + 1e-12);
            assert!(car.steer().abs() <= car.max_steer() + 1e-12);
            prev = car.steer();
        }
        assert_abs_diff_eq!(car.steer(), car.max_steer(), epsilon = 1e-12);
    }

    #[test]
    fn rollback_is_idempotent() {
        let mut car = vehicle();
        car.set_inputs(1.0, 0.0, 0.3);
        for _ in 0..10 {
            car.update(0.02);
        }
        let before = (car.position(), car.yaw());
        car.update(0.02);

        car.handle_collision();
        let first = (car.position(), car.yaw(), car.velocity());
        car.handle_collision();
        let second = (car.position(), car.yaw(), car.velocity());

        assert_eq!(first, second);
        assert_eq!((first.0, first.1), before);
        assert_abs_diff_eq!(first.2, 0.0);
    }

    #[test]
    fn positive_steer_turns_left_on_screen() {
        let mut car = vehicle();
        car.set_inputs(0.5, 0.0, car.max_steer());
        for _ in 0..30 {
            car.update(0.01);
        }

        // heading east, left is up on screen
        assert!(car.yaw() < 0.0);
        assert!(car.position().y < 400.0);
        assert!(car.heading_deg() > 0.0);
    }

    #[test]
    fn brake_stops_without_reversing() {
        let mut car = vehicle();
        car.set_inputs(1.0, 0.0, 0.0);
        for _ in 0..100 {
            car.update(0.01);
        }
        assert!(car.velocity() > 0.0);

        car.set_inputs(0.0, 1.0, 0.0);
        for _ in 0..200 {
            car.update(0.01);
            assert!(car.velocity() >= 0.0);
        }
        assert_abs_diff_eq!(car.velocity(), 0.0);
    }

    #[test]
    fn negative_throttle_reverses() {
        let mut car = vehicle();
        car.set_inputs(-0.5, 0.0, 0.0);
        for _ in 0..10 {
            car.update(0.01);
        }
        assert!(car.velocity() < 0.0);
        assert!(car.position().x < 400.0);
    }

    #[test]
    fn bounding_box_of_rotated_car() {
        let mut car = vehicle();
        car.reset(DVec2::new(100.0, 100.0), std::f64::consts::FRAC_PI_2);
        let bb = car.bounding_box();
        assert_abs_diff_eq!(bb.max.x - bb.min.x, 25.0, epsilon = 1e-9);
        assert_abs_diff_eq!(bb.max.y - bb.min.y, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn invalid_pars_are_rejected() {
        let pars = VehiclePars {
            max_brake_force: 10.0,
            ..VehiclePars::default()
        };
        assert!(pars.validate().is_err());
        assert!(VehiclePars::default().validate().is_ok());
    }
}
