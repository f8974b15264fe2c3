#[cfg(feature = "cli")]
pub mod cli;
pub mod scenario_config;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use scenario_config::ScenarioConfig;
pub use toml_config::{DatabaseBackend, RegistryConfig};
