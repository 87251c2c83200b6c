pub mod collision;
pub mod controller;
pub mod handle_session;
pub mod race_state;
pub mod sensors;
pub mod session;
pub mod surface;
pub mod track;
pub mod vehicle;
