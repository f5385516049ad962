use crate::config::toml_config::{FilesConfig, ServerConfig};
use crate::domain::model::LoggingLevel;
use crate::utils::error::Result;
use clap::Parser;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "iced-http")]
#[command(about = "Serve a directory over HTTP")]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// TCP port to listen on (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to serve
    #[arg(long)]
    pub root: Option<String>,

    /// File served for directory requests
    #[arg(long)]
    pub index_file: Option<String>,

    #[arg(long, value_enum)]
    pub logging_level: Option<LoggingLevel>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    /// Loads the configuration file, if any, and applies the command line on top.
    pub fn load(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(level) = self.logging_level {
            config.server.logging_level = level;
        } else if self.verbose {
            config.server.logging_level = LoggingLevel::Debug;
        }
        if let Some(root) = &self.root {
            let index_file = config.files.as_ref().and_then(|f| f.index_file.clone());
            config.files = Some(FilesConfig {
                root: root.clone(),
                index_file,
            });
        }
        if let Some(index_file) = &self.index_file {
            let files = config.files.get_or_insert_with(|| FilesConfig {
                root: ".".to_string(),
                index_file: None,
            });
            files.index_file = Some(index_file.clone());
        }
    }
}
