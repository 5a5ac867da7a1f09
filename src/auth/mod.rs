pub mod auth;
pub mod device_key;
pub mod jwt;
pub mod middleware;
