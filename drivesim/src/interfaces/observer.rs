use crate::core::surface::RgbColor;
use crate::post::session_result::SessionResult;
use glam::DVec2;

/// (Hz) Upper limit for the rate at which session snapshots are sent to an observer.
pub const MAX_OBSERVER_UPDATE_FREQUENCY: f64 = 20.0;

#[derive(Debug, Clone, Default)]
pub struct CarState {
    pub name: String,
    pub color: RgbColor,
    pub sprite: Option<String>,
    pub position: DVec2,
    pub heading_deg: f64,
    pub velocity: f64,
    pub laps: u32,
    pub next_checkpoint: usize,
    pub finished: bool,
}

/// SessionState is a snapshot of a running session. The final message of a session carries the
/// result.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub sim_time: f64,
    pub car_states: Vec<CarState>,
    pub final_result: Option<SessionResult>,
}
