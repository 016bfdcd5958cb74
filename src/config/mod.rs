//! Configuration system
//!
//! - `macros`: `config_struct!` for struct + defaults in one declaration
//! - `schemas`: the configuration tree
//! - `utils`: loading from TOML and validation

#[macro_use]
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::*;
pub use utils::{load_config_from_path, parse_config};
