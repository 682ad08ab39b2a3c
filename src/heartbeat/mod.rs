//! Background sweeps: agent liveness and history retention.

pub mod sweeper;

pub use sweeper::spawn_sweepers;
