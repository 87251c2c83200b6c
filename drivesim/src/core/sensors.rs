use crate::core::surface::{Surface, Terrain};
use crate::core::vehicle::Vehicle;
use glam::DVec2;
use helpers::general::InputValueError;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Body,
    Wheel,
}

/// Probe is a sampling point fixed to the car. The offset is given in normalized car-local
/// coordinates: x along the heading (scaled by the car width), y to the right (scaled by the car
/// height).
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub name: &'static str,
    pub kind: ProbeKind,
    pub offset: (f64, f64),
}

pub const NO_PROBES: usize = 12;

/// The names describe the unrotated car sprite facing +x: "top" is the left side of the car,
/// "left" its rear.
pub const PROBES: [Probe; NO_PROBES] = [
    Probe { name: "top_left", kind: ProbeKind::Body, offset: (-0.5, -0.5) },
    Probe { name: "top_center", kind: ProbeKind::Body, offset: (0.0, -0.5) },
    Probe { name: "top_right", kind: ProbeKind::Body, offset: (0.5, -0.5) },
    Probe { name: "middle_left", kind: ProbeKind::Body, offset: (-0.5, 0.0) },
    Probe { name: "middle_right", kind: ProbeKind::Body, offset: (0.5, 0.0) },
    Probe { name: "bottom_left", kind: ProbeKind::Body, offset: (-0.5, 0.5) },
    Probe { name: "bottom_center", kind: ProbeKind::Body, offset: (0.0, 0.5) },
    Probe { name: "bottom_right", kind: ProbeKind::Body, offset: (0.5, 0.5) },
    Probe { name: "front_left_wheel", kind: ProbeKind::Wheel, offset: (-0.4, -0.45) },
    Probe { name: "front_right_wheel", kind: ProbeKind::Wheel, offset: (0.4, -0.45) },
    Probe { name: "rear_left_wheel", kind: ProbeKind::Wheel, offset: (-0.4, 0.45) },
    Probe { name: "rear_right_wheel", kind: ProbeKind::Wheel, offset: (0.4, 0.45) },
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub name: &'static str,
    pub kind: ProbeKind,
    pub position: DVec2,
    pub terrain: Terrain,
}

/// LidarPars configures the ray-cast sensor used by the neural driver.
/// * `num_rays` - Number of rays, spread evenly across the field of view
/// * `fov_deg` - (deg) Field of view centred on the heading
/// * `max_dist_car_widths` - Ray length in multiples of the car width
/// * `step` - (px) Ray marching increment
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LidarPars {
    pub num_rays: usize,
    pub fov_deg: f64,
    pub max_dist_car_widths: f64,
    pub step: f64,
}

impl Default for LidarPars {
    fn default() -> Self {
        LidarPars {
            num_rays: 7,
            fov_deg: 135.0,
            max_dist_car_widths: 10.0,
            step: 4.0,
        }
    }
}

impl LidarPars {
    pub fn validate(&self) -> Result<(), InputValueError> {
        if !(0.0..=360.0).contains(&self.fov_deg) {
            return Err(InputValueError::new(
                "fov_deg",
                "must lie in the range [0.0, 360.0]",
            ));
        }
        if !self.max_dist_car_widths.is_finite() || self.max_dist_car_widths <= 0.0 {
            return Err(InputValueError::new(
                "max_dist_car_widths",
                "must be positive and finite",
            ));
        }
        if self.step.is_nan() || self.step <= 0.0 {
            return Err(InputValueError::new("step", "must be positive"));
        }
        Ok(())
    }
}

/// SensorArray holds the last observed terrain per probe (unknown at creation).
#[derive(Debug, Clone, Default)]
pub struct SensorArray {
    readings: [Option<Terrain>; NO_PROBES],
}

impl SensorArray {
    pub fn new() -> SensorArray {
        SensorArray::default()
    }

    /// get_listener_positions returns name, kind and screen position of every probe.
    pub fn get_listener_positions(&self, vehicle: &Vehicle) -> Vec<(&'static str, ProbeKind, DVec2)> {
        PROBES
            .iter()
            .map(|probe| {
                let local = DVec2::new(
                    probe.offset.0 * vehicle.width,
                    probe.offset.1 * vehicle.height,
                );
                (probe.name, probe.kind, vehicle.to_world(local))
            })
            .collect()
    }

    /// get_lidar casts num_rays rays evenly across fov (rad), ordered from left to right as seen
    /// by the driver. Every ray marches in increments of step until it hits a wall sample, leaves
    /// the surface or reaches max_dist. The returned distances are in pixels. A non-positive step
    /// cannot march, every ray then reports max_dist.
    pub fn get_lidar(
        &self,
        vehicle: &Vehicle,
        surface: &dyn Surface,
        num_rays: usize,
        fov: f64,
        max_dist: f64,
        step: f64,
    ) -> Vec<f64> {
        if step.is_nan() || step <= 0.0 {
            return vec![max_dist; num_rays];
        }
        let origin = vehicle.position();

        (0..num_rays)
            .map(|i| {
                // smaller yaw is further left on screen
                let angle = if num_rays == 1 {
                    vehicle.yaw()
                } else {
                    vehicle.yaw() - fov / 2.0 + fov * i as f64 / (num_rays - 1) as f64
                };
                let dir = DVec2::from_angle(angle);

                let mut dist = step;
                while dist < max_dist {
                    let p = origin + dir * dist;
                    if !surface.in_bounds(p.x, p.y) || surface.terrain_at(p.x, p.y) == Terrain::Wall
                    {
                        return dist;
                    }
                    dist += step;
                }
                max_dist
            })
            .collect()
    }

    /// get_lidar_normalized returns the lidar distances divided by max_dist, i.e. in [0, 1].
    pub fn get_lidar_normalized(
        &self,
        vehicle: &Vehicle,
        surface: &dyn Surface,
        num_rays: usize,
        fov: f64,
        max_dist: f64,
        step: f64,
    ) -> Vec<f64> {
        self.get_lidar(vehicle, surface, num_rays, fov, max_dist, step)
            .into_iter()
            .map(|d| d / max_dist)
            .collect()
    }

    /// sample reads the terrain under every probe. Probes outside the surface are clamped onto
    /// its border.
    pub fn sample(&self, vehicle: &Vehicle, surface: &dyn Surface) -> Vec<ProbeReading> {
        let (w, h) = surface.size();
        let x_max = (w as f64 - 1.0).max(0.0);
        let y_max = (h as f64 - 1.0).max(0.0);

        self.get_listener_positions(vehicle)
            .into_iter()
            .map(|(name, kind, p)| {
                let position = DVec2::new(p.x.clamp(0.0, x_max), p.y.clamp(0.0, y_max));
                ProbeReading {
                    name,
                    kind,
                    position,
                    terrain: surface.terrain_at(position.x, position.y),
                }
            })
            .collect()
    }

    /// update_readings stores the readings and logs every probe whose terrain changed.
    pub fn update_readings(&mut self, readings: &[ProbeReading]) {
        for (last, reading) in self.readings.iter_mut().zip(readings.iter()) {
            if *last != Some(reading.terrain) {
                debug!(probe = reading.name, terrain = ?reading.terrain, "Probe detected new terrain");
                *last = Some(reading.terrain);
            }
        }
    }

    pub fn readings(&self) -> &[Option<Terrain>; NO_PROBES] {
        &self.readings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::surface::TileGrid;
    use crate::core::track::Track;
    use crate::core::vehicle::VehiclePars;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    /// Wall strip along the north edge of cell (1, 1), i.e. y in [200, 224).
    fn grid() -> TileGrid {
        let track = Track::from_reader("lidar", "4\n1,1,1,0\n".as_bytes(), 800).unwrap();
        TileGrid::new(&track)
    }

    fn car_at(x: f64, y: f64, yaw: f64) -> Vehicle {
        Vehicle::new(&VehiclePars::default(), 100.0, 50.0, DVec2::new(x, y), yaw)
    }

    #[test]
    fn listener_positions_follow_heading() {
        let car = car_at(400.0, 400.0, PI / 2.0);
        let positions = SensorArray::new().get_listener_positions(&car);

        assert_eq!(positions.len(), NO_PROBES);
        // heading south, the front is below and the left side is east
        let (name, kind, top_left) = positions[0];
        assert_eq!(name, "top_left");
        assert_eq!(kind, ProbeKind::Body);
        assert_abs_diff_eq!(top_left.x, 425.0, epsilon = 1e-9);
        assert_abs_diff_eq!(top_left.y, 350.0, epsilon = 1e-9);
        let (name, _, middle_right) = positions[4];
        assert_eq!(name, "middle_right");
        assert_abs_diff_eq!(middle_right.x, 400.0, epsilon = 1e-9);
        assert_abs_diff_eq!(middle_right.y, 450.0, epsilon = 1e-9);
        assert_eq!(positions.iter().filter(|p| p.1 == ProbeKind::Wheel).count(), 4);
    }

    #[test]
    fn lidar_rays_are_ordered_left_to_right() {
        let grid = grid();
        // car below the wall strip heading east, wall is on the left (north)
        let car = car_at(300.0, 260.0, 0.0);
        let sensors = SensorArray::new();
        let rays = sensors.get_lidar(&car, &grid, 3, PI, 200.0, 1.0);

        // ray 0 points north and hits the strip after ~36 px
        assert!(rays[0] > 35.0 && rays[0] <= 37.0);
        // ray 1 points straight ahead along the open road
        assert_abs_diff_eq!(rays[1], 200.0);
        // ray 2 points south into grass
        assert_abs_diff_eq!(rays[2], 200.0);
    }

    #[test]
    fn lidar_stops_at_surface_boundary() {
        let grid = grid();
        let car = car_at(790.0, 600.0, 0.0);
        let rays = SensorArray::new().get_lidar(&car, &grid, 1, 0.0, 100.0, 4.0);
        assert_abs_diff_eq!(rays[0], 12.0);

        let normalized =
            SensorArray::new().get_lidar_normalized(&car, &grid, 1, 0.0, 100.0, 4.0);
        assert_abs_diff_eq!(normalized[0], 0.12);
    }

    #[test]
    fn lidar_without_step_reports_max_distance() {
        let grid = grid();
        let car = car_at(400.0, 300.0, -PI / 2.0);
        for step in [0.0, -1.0, f64::NAN] {
            let rays = SensorArray::new().get_lidar(&car, &grid, 3, PI / 2.0, 150.0, step);
            assert_eq!(rays, vec![150.0; 3]);
        }
    }

    #[test]
    fn lidar_pars_are_validated() {
        assert!(LidarPars::default().validate().is_ok());

        let invalid = [
            LidarPars { step: 0.0, ..LidarPars::default() },
            LidarPars { step: -2.0, ..LidarPars::default() },
            LidarPars { max_dist_car_widths: 0.0, ..LidarPars::default() },
            LidarPars { max_dist_car_widths: f64::INFINITY, ..LidarPars::default() },
            LidarPars { fov_deg: -10.0, ..LidarPars::default() },
            LidarPars { fov_deg: 400.0, ..LidarPars::default() },
        ];
        for pars in invalid.iter() {
            assert!(pars.validate().is_err(), "accepted {:?}", pars);
        }
    }

    #[test]
    fn sampling_clamps_and_remembers() {
        let grid = grid();
        let car = car_at(5.0, 5.0, 0.0);
        let mut sensors = SensorArray::new();
        assert!(sensors.readings().iter().all(|r| r.is_none()));

        let readings = sensors.sample(&car, &grid);
        assert!(readings
            .iter()
            .all(|r| r.position.x >= 0.0 && r.position.y >= 0.0));
        assert!(readings.iter().all(|r| r.terrain == Terrain::Grass));

        sensors.update_readings(&readings);
        assert!(sensors.readings().iter().all(|r| *r == Some(Terrain::Grass)));
    }
}
