pub mod attendance;
pub mod device_mapping;
pub mod punch;
pub mod role;
pub mod schedule;
