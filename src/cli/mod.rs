pub mod commands;
pub mod run;
pub mod status;

pub use commands::{Cli, Commands};
