//! Persistence for the course player: repository contracts, an in-memory
//! backend for tests, and the `SQLite` backend used by the application.

#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;
