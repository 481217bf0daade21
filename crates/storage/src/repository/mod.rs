pub mod racer;

pub use racer::RacerRepository;
