pub mod attendance;
pub mod classify;
pub mod ingest;
pub mod mapping;
pub mod reconcile;
pub mod schedule;
pub mod scheduler;
pub mod sweeper;
pub mod window;
