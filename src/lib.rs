pub mod api;
pub mod bus;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod error;
pub mod estimation;
pub mod fusion;
