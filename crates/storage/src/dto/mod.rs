pub mod common;
pub mod racer;
