// src/lib.rs

//! Layered TOML application configuration and lazily cached connections
//! (Snowflake sessions, OAuth grant flows, local files) for analytics and
//! ML applications.
//!
//! ```no_run
//! let app = snowflake_ai::state::create_app_config("group_def.app1", None, None)?;
//! println!("{} is a {} app", app.key(), app.type_name());
//! # Ok::<(), snowflake_ai::core::config_resolver::ConfigError>(())
//! ```

pub mod connect;
pub mod constants;
pub mod core;
pub mod mlops;
pub mod models;
pub mod setup;
pub mod state;

pub use crate::connect::{ConnectError, ConnectManager, ConnectionRegistry};
pub use crate::core::app_config::AppConfig;
pub use crate::core::config_resolver::{BootstrapOptions, ConfigError, ResolvedConfig};
pub use crate::mlops::PipelineError;
pub use crate::state::AppContext;

/// Installs an `env_logger` backend filtered by `RUST_LOG`, defaulting to
/// `warn`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).try_init();
}
