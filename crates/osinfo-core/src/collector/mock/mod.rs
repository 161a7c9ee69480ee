//! In-memory filesystem fixtures for probe tests.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
