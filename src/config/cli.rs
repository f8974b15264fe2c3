use crate::utils::error::Result;
use crate::utils::validation::{validate_non_empty_string, Validate};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "course-registry")]
#[command(about = "Run course lifecycle and enrollment scenarios against the registry")]
pub struct CliConfig {
    /// Path to the registry configuration file (defaults to the in-memory backend)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Path to the scenario file to execute
    #[arg(short, long, default_value = "scenarios/registration.toml")]
    pub scenario: String,

    /// Write the JSON report to this path
    #[arg(long)]
    pub report: Option<String>,

    /// Show the execution plan without running it
    #[arg(long)]
    pub dry_run: bool,

    /// Emit JSON logs regardless of the configuration file
    #[arg(long)]
    pub json_logs: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("scenario", &self.scenario)?;
        if let Some(config) = &self.config {
            validate_non_empty_string("config", config)?;
        }
        if let Some(report) = &self.report {
            validate_non_empty_string("report", report)?;
        }
        Ok(())
    }
}
