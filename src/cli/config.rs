//! CLI command for managing Captain configuration.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use console::style;
use std::path::PathBuf;

use captain::config::Config;

use super::GlobalArgs;

#[derive(Args)]
#[command(about = "Manage Captain configuration")]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write an example configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration file without contacting any host
    Validate,
}

impl ConfigCommand {
    pub fn execute(&self, globals: &GlobalArgs) -> Result<()> {
        match &self.action {
            ConfigAction::Show => self.show_config(globals),
            ConfigAction::Path => self.show_path(globals),
            ConfigAction::Init { force } => self.init_config(globals, *force),
            ConfigAction::Validate => self.validate_config(globals),
        }
    }

    fn path(&self, globals: &GlobalArgs) -> Result<PathBuf> {
        globals
            .config
            .clone()
            .or_else(Config::default_path)
            .ok_or_else(|| anyhow!("Could not determine configuration directory"))
    }

    fn show_config(&self, globals: &GlobalArgs) -> Result<()> {
        let config = globals.load_config()?;
        let yaml = serde_yaml::to_string(&config)?;
        println!("{}", yaml);
        Ok(())
    }

    fn show_path(&self, globals: &GlobalArgs) -> Result<()> {
        let path = self.path(globals)?;
        println!("Configuration file path: {}", path.display());
        if path.exists() {
            println!("Status: File exists");
        } else {
            println!("Status: File does not exist");
        }
        Ok(())
    }

    fn init_config(&self, globals: &GlobalArgs, force: bool) -> Result<()> {
        let path = self.path(globals)?;

        if path.exists() && !force {
            println!("Configuration file already exists at: {}", path.display());
            println!("Use --force to overwrite");
            return Ok(());
        }

        Config::example().save_to(&path)?;

        println!("Created configuration file at: {}", path.display());
        println!();
        println!("The example migrates from this machine to a generic host. Edit it to");
        println!("describe your hosts, then check both of them with:");
        println!("  captain probe");

        Ok(())
    }

    fn validate_config(&self, globals: &GlobalArgs) -> Result<()> {
        let path = self.path(globals)?;
        let config = Config::load_from(&path)?;

        println!("{} {} is valid", style("✓").green().bold(), path.display());
        for (role, host) in [("source", &config.source), ("destination", &config.destination)] {
            println!("  {:<12} {}", role, host.kind);
        }
        if config.shared_storage.enabled {
            println!(
                "  shared storage at {}{}",
                config.shared_storage.mount_point,
                if config.shared_storage.tmpfs { " (tmpfs)" } else { "" }
            );
        }
        Ok(())
    }
}
