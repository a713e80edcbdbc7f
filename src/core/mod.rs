pub mod config;
pub mod error;
pub mod math;
pub mod types;
