use crate::ai::fitness::RewardPars;
use crate::ai::ga::GaPars;
use crate::core::collision::TerrainPars;
use crate::core::sensors::LidarPars;
use crate::core::session::SessionPars;
use crate::core::surface::{Palette, PalettePars};
use crate::core::vehicle::VehiclePars;
use anyhow::Context;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::Path;

/// SensorPars bundles the LIDAR layout of the neural driver and the sensing colours.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SensorPars {
    pub lidar: LidarPars,
    pub palette: PalettePars,
}

/// SimPars is used to store all other parameter structs. Every section may be omitted in the
/// parameter file, missing sections and fields fall back to their defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SimPars {
    pub vehicle_pars: VehiclePars,
    pub sensor_pars: SensorPars,
    pub terrain_pars: TerrainPars,
    pub session_pars: SessionPars,
    pub reward_pars: RewardPars,
    pub ga_pars: GaPars,
}

impl SimPars {
    /// validate checks all sections and builds the palette once to reject ambiguous colours.
    pub fn validate(&self) -> anyhow::Result<Palette> {
        self.vehicle_pars.validate()?;
        self.sensor_pars.lidar.validate()?;
        self.terrain_pars.validate()?;
        self.session_pars.validate()?;
        self.ga_pars.validate()?;
        Palette::from_pars(&self.sensor_pars.palette)
    }
}

/// read_sim_pars reads the JSON file and decodes the JSON string into the simulation parameters
/// struct.
pub fn read_sim_pars(filepath: &Path) -> anyhow::Result<SimPars> {
    let fh = OpenOptions::new()
        .read(true)
        .open(filepath)
        .context(format!(
            "Failed to open parameter file {}!",
            filepath.to_string_lossy()
        ))?;
    let pars = serde_json::from_reader(&fh).context(format!(
        "Failed to parse parameter file {}!",
        filepath.to_string_lossy()
    ))?;
    Ok(pars)
}
