use crate::core::session::Session;
use crate::interfaces::observer::{SessionState, MAX_OBSERVER_UPDATE_FREQUENCY};
use crate::post::session_result::SessionResult;
use anyhow::Context;
use flume::Sender;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// handle_session simulates a session until all cars finished or the maximum simulation time
/// is reached, and returns the result for post-processing. If a sender is inserted, the session
/// runs in (scaled) real time and snapshots are streamed to the observer.
pub fn handle_session(
    mut session: Session,
    tx: Option<&Sender<SessionState>>,
    realtime_factor: f64,
) -> anyhow::Result<SessionResult> {
    let mut t_update_print = 0.0;

    match tx {
        None => {
            while !session.get_all_finished() && !session.timed_out() {
                session.simulate_timestep();

                if session.cur_time > t_update_print + 0.9999 {
                    info!(
                        "Simulating... current simulation time is {:.3}s",
                        session.cur_time
                    );
                    t_update_print = session.cur_time;
                }
            }
        }
        Some(tx) => {
            let mut t_update_observer = 0.0;

            while !session.get_all_finished() && !session.timed_out() {
                let t_start = Instant::now();
                session.simulate_timestep();

                if session.cur_time > t_update_print + 0.9999 {
                    info!(
                        "Simulating... current simulation time is {:.3}s",
                        session.cur_time
                    );
                    t_update_print = session.cur_time;
                }

                if session.cur_time
                    > t_update_observer + 1.0 / MAX_OBSERVER_UPDATE_FREQUENCY - 0.001
                {
                    tx.send(session.get_session_state())
                        .context("Failed to send session state to observer!")?;
                    t_update_observer = session.cur_time;
                }

                // sleep until the time step is finished in real time as well
                let t_step = Duration::from_secs_f64(session.timestep_size / realtime_factor);
                match t_step.checked_sub(t_start.elapsed()) {
                    Some(t_sleep) => sleep(t_sleep),
                    None => warn!("Could not keep up with real time!"),
                }
            }

            // final message carries the result
            let mut final_state = session.get_session_state();
            final_state.final_result = Some(session.get_session_result());
            tx.send(final_state)
                .context("Failed to send final session result to observer!")?;
        }
    }

    if session.timed_out() && !session.get_all_finished() {
        warn!(
            "Session stopped after the maximum simulation time of {:.1}s",
            session.pars.max_sim_time
        );
    }

    Ok(session.get_session_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collision::TerrainPars;
    use crate::core::controller::ConstantController;
    use crate::core::session::{EntrantSpec, SessionPars};
    use crate::core::surface::Palette;
    use crate::core::track::Track;
    use crate::core::vehicle::VehiclePars;

    fn parked_session(max_sim_time: f64) -> Session {
        let track = Track::from_reader("empty", "4\nfinish,1,0,1,3\n".as_bytes(), 800).unwrap();
        let pars = SessionPars {
            max_sim_time,
            ..SessionPars::default()
        };
        Session::new(
            &pars,
            &VehiclePars::default(),
            &TerrainPars::default(),
            &Palette::default(),
            track,
            vec![EntrantSpec {
                name: String::from("parked"),
                color: String::from("blue"),
                sprite: Some(String::from("car_blue")),
                controller: Box::new(ConstantController::new(0.0, 0.0, 0.0)),
            }],
            0.05,
        )
        .unwrap()
    }

    #[test]
    fn stops_at_max_sim_time() {
        let result = handle_session(parked_session(2.0), None, 1.0).unwrap();
        assert!(result.sim_time >= 2.0 && result.sim_time < 2.1);
        assert!(!result.entrants[0].finished);
    }

    #[test]
    fn observer_receives_snapshots_and_result() {
        let (tx, rx) = flume::unbounded();
        handle_session(parked_session(0.5), Some(&tx), 100.0).unwrap();

        let states: Vec<SessionState> = rx.try_iter().collect();
        assert!(states.len() >= 2);
        assert!(states[..states.len() - 1].iter().all(|s| s.final_result.is_none()));

        let last = states.last().unwrap();
        assert!(last.final_result.is_some());
        assert_eq!(last.car_states[0].sprite.as_deref(), Some("car_blue"));
    }
}
