pub mod cli;
pub mod collectors;
pub mod config;
pub mod exporter;
pub mod sessions;
