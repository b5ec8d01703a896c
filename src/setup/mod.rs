// src/setup/mod.rs

//! Data setups: the stages and data connects an application prepares
//! before its pipelines run.

pub mod data_setup;
pub mod manager;

pub use data_setup::DataSetup;
pub use manager::SetupManager;
