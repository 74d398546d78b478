pub mod cli;
pub mod client;
pub mod file_content;
pub mod load_config;
pub mod modules;
pub mod repository;

pub use cli::{run, Cli, Commands};
