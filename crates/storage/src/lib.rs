//! Racer persistence for the raceday timing application.
//!
//! [`RacerRepository`](repository::RacerRepository) maps racers to documents
//! in a [`DocumentStore`](store::DocumentStore). Two stores are provided: a
//! Postgres JSONB table reached through [`Database`], and an in-memory
//! [`MemoryStore`](store::MemoryStore).

pub mod database;
pub mod dto;
pub mod error;
pub mod models;
pub mod repository;
pub mod store;

pub use database::Database;
pub use error::{Result, StorageError};
