use clap::{Args, Subcommand};

use crate::config::Config;

use super::OutputFormat;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        println!("Config file: {}", Config::default_config_path().display());
                        println!();

                        println!("database_path: {}", config.database_path.display());
                        println!("owner: {}", config.owner);
                        println!();

                        match &config.api.base_url {
                            Some(url) => println!("api.base_url: {}", url),
                            None => println!("api.base_url: (not set)"),
                        }
                        match &config.api.api_key {
                            Some(key) => {
                                println!("api.api_key: {}...", &key[..key.len().min(8)])
                            }
                            None => println!("api.api_key: (not set)"),
                        }
                        println!(
                            "api.bearer_token: {}",
                            if config.api.bearer_token.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!();

                        println!("sync.interval_secs: {}", config.sync.interval_secs);
                        println!("sync.batch_size: {}", config.sync.batch_size);
                        println!("sync.retention_days: {}", config.sync.retention_days);
                        println!("sync.stale_after_secs: {}", config.sync.stale_after_secs);
                        println!(
                            "sync.reclaim_after_secs: {}",
                            config.sync.reclaim_after_secs
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
