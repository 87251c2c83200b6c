use crate::core::track::Gates;
use glam::DVec2;
use helpers::geometry::{normalize_angle, segments_cross};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RaceEvent {
    CheckpointCrossed { idx: usize },
    LapCompleted { lap: u32, lap_time: f64 },
}

/// RaceState tracks the progress of one car. Checkpoints must be crossed in order, the finish
/// line only counts once all of them are cleared.
/// * `next_checkpoint` - Index of the next required checkpoint (equals the number of checkpoints
/// once all are cleared)
/// * `laps` - Number of completed laps
/// * `lap_times` - (s) Durations of the completed laps
/// * `best_lap` - (s) Fastest completed lap
/// * `lap_start` - (s) Timestamp at which the current lap started
#[derive(Debug, Clone)]
pub struct RaceState {
    next_checkpoint: usize,
    laps: u32,
    lap_times: Vec<f64>,
    best_lap: Option<f64>,
    lap_start: f64,
}

impl RaceState {
    pub fn new(t_start: f64) -> RaceState {
        RaceState {
            next_checkpoint: 0,
            laps: 0,
            lap_times: vec![],
            best_lap: None,
            lap_start: t_start,
        }
    }

    /// update tests the motion segment prev -> cur against the next required checkpoint and,
    /// once all checkpoints are cleared, against the finish line. Both can happen within the
    /// same call.
    pub fn update(&mut self, prev: DVec2, cur: DVec2, gates: &Gates, now: f64) -> Vec<RaceEvent> {
        let mut events = vec![];
        let no_checkpoints = gates.no_checkpoints();

        if self.next_checkpoint < no_checkpoints {
            let (q1, q2) = gates.checkpoints[self.next_checkpoint];
            if segments_cross(prev, cur, q1, q2) {
                events.push(RaceEvent::CheckpointCrossed {
                    idx: self.next_checkpoint,
                });
                self.next_checkpoint += 1;
            }
        }

        if self.next_checkpoint == no_checkpoints {
            if let Some((f1, f2)) = gates.finish {
                if segments_cross(prev, cur, f1, f2) {
                    let lap_time = now - self.lap_start;
                    self.lap_times.push(lap_time);
                    self.best_lap = Some(match self.best_lap {
                        Some(best) => best.min(lap_time),
                        None => lap_time,
                    });
                    self.lap_start = now;
                    self.laps += 1;
                    self.next_checkpoint = 0;

                    events.push(RaceEvent::LapCompleted {
                        lap: self.laps,
                        lap_time,
                    });
                }
            }
        }

        events
    }

    /// next_target returns the next segment the car has to cross, `None` if there is none.
    pub fn next_target(&self, gates: &Gates) -> Option<(DVec2, DVec2)> {
        match gates.checkpoints.get(self.next_checkpoint) {
            Some(seg) => Some(*seg),
            None => gates.finish,
        }
    }

    /// next_checkpoint_info returns distance (px) and bearing (rad) from the car to the midpoint
    /// of the next target. The bearing lies in ]-pi, pi] and is positive if the target is on the
    /// left, i.e. it has the sign of the steering angle needed to turn towards it. Returns (0, 0)
    /// if there is no target.
    pub fn next_checkpoint_info(&self, position: DVec2, yaw: f64, gates: &Gates) -> (f64, f64) {
        let (q1, q2) = match self.next_target(gates) {
            Some(seg) => seg,
            None => return (0.0, 0.0),
        };

        let mid = (q1 + q2) * 0.5;
        let delta = mid - position;

        (delta.length(), normalize_angle(yaw - delta.to_angle()))
    }

    // ---------------------------------------------------------------------------------------------
    // GETTERS -------------------------------------------------------------------------------------
    // ---------------------------------------------------------------------------------------------

    pub fn next_checkpoint(&self) -> usize {
        self.next_checkpoint
    }

    pub fn laps(&self) -> u32 {
        self.laps
    }

    pub fn lap_times(&self) -> &[f64] {
        &self.lap_times
    }

    pub fn best_lap(&self) -> Option<f64> {
        self.best_lap
    }

    pub fn lap_start(&self) -> f64 {
        self.lap_start
    }

    pub fn total_lap_time(&self) -> f64 {
        self.lap_times.iter().sum()
    }
}
