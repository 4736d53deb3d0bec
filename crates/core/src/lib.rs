#![forbid(unsafe_code)]

pub mod model;
pub mod progress;
pub mod time;

pub use progress::{TrailProgress, compute_progress};
pub use time::Clock;
