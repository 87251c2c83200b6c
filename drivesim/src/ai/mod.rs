pub mod fitness;
pub mod ga;
pub mod neural;
