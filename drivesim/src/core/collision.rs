use crate::core::sensors::{ProbeKind, ProbeReading};
use crate::core::surface::Terrain;
use crate::core::vehicle::Vehicle;
use helpers::general::InputValueError;
use serde::Deserialize;

/// TerrainPars contains the rolling resistance multipliers (relative to road) of the off-road
/// terrain classes. They must be strictly ascending from curb to sand.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TerrainPars {
    pub curb: f64,
    pub grass: f64,
    pub gravel: f64,
    pub sand: f64,
}

impl Default for TerrainPars {
    fn default() -> Self {
        TerrainPars {
            curb: 1.5,
            grass: 4.0,
            gravel: 8.0,
            sand: 16.0,
        }
    }
}

impl TerrainPars {
    pub fn multiplier(&self, terrain: Terrain) -> f64 {
        match terrain {
            Terrain::Road | Terrain::Wall => 1.0,
            Terrain::Curb => self.curb,
            Terrain::Grass => self.grass,
            Terrain::Gravel => self.gravel,
            Terrain::Sand => self.sand,
        }
    }

    pub fn validate(&self) -> Result<(), InputValueError> {
        if self.curb <= 0.0 {
            return Err(InputValueError::new("terrain_pars.curb", "must be positive"));
        }
        if !(self.curb < self.grass && self.grass < self.gravel && self.gravel < self.sand) {
            return Err(InputValueError::new(
                "terrain_pars",
                "multipliers must be strictly ascending (curb < grass < gravel < sand)",
            ));
        }
        Ok(())
    }
}

/// SurfaceResponse is the outcome of evaluating one set of probe readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceResponse {
    Wall,
    Terrain(Terrain),
}

/// classify evaluates probe readings. A body probe on a wall always wins. Otherwise the most
/// severe terrain under any wheel determines the rolling resistance, a wheel touching a wall
/// counts as road.
pub fn classify(readings: &[ProbeReading]) -> SurfaceResponse {
    if readings
        .iter()
        .any(|r| r.kind == ProbeKind::Body && r.terrain == Terrain::Wall)
    {
        return SurfaceResponse::Wall;
    }

    let worst = readings
        .iter()
        .filter(|r| r.kind == ProbeKind::Wheel)
        .map(|r| match r.terrain {
            Terrain::Wall => Terrain::Road,
            terrain => terrain,
        })
        .max()
        .unwrap_or(Terrain::Road);

    SurfaceResponse::Terrain(worst)
}

/// apply_response rolls the vehicle back on wall contact or sets its rolling resistance
/// according to the terrain.
pub fn apply_response(vehicle: &mut Vehicle, response: SurfaceResponse, pars: &TerrainPars) {
    match response {
        SurfaceResponse::Wall => vehicle.handle_collision(),
        SurfaceResponse::Terrain(terrain) => vehicle.set_terrain_multiplier(pars.multiplier(terrain)),
    }
}

/// check_car_collision checks if the bounding boxes of two vehicles overlap.
pub fn check_car_collision(a: &Vehicle, b: &Vehicle) -> bool {
    a.bounding_box().overlaps(&b.bounding_box())
}
