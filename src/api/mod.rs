pub mod attendance;
pub mod device;
pub mod events;
pub mod mapping;
pub mod schedule;
