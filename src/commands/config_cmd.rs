use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::Config;

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

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("database_dir: {}", config.database_dir.value.display());
                        println!("  source: {}", config.database_dir.source);
                        println!();

                        let sync = &config.sync;
                        println!("sync:");
                        println!("  url: {}", sync.url.as_deref().unwrap_or("(not set)"));
                        println!(
                            "  username: {}",
                            sync.username.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  password: {}",
                            if sync.password.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!("  replicator_type: {}", sync.replicator_type);
                        println!("  continuous: {}", sync.continuous);
                        println!(
                            "  accept_only_self_signed_certs: {}",
                            sync.accept_only_self_signed_certs
                        );
                        println!("  heartbeat_secs: {}", sync.heartbeat_secs);
                        println!("  max_attempts: {}", sync.max_attempts);
                        println!("  max_attempt_wait_secs: {}", sync.max_attempt_wait_secs);
                        println!("  auto_sync: {}", sync.auto_sync);
                    }
                }
                Ok(())
            }
        }
    }
}
