pub mod config;
pub mod errors;
pub mod kernel;
pub mod store;
pub mod types;
