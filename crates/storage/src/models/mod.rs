pub mod racer;

pub use racer::{Racer, RacerField};
