//! CLI command implementations

mod config;
mod parse;
mod projects;

pub use config::cmd_config_show;
pub use parse::cmd_parse;
pub use projects::cmd_projects;
