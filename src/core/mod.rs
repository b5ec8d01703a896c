// src/core/mod.rs

pub mod app_config;
pub mod config_loader;
pub mod config_resolver;
pub mod paths;
pub mod source;
