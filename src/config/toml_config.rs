use crate::domain::model::LoggingLevel;
use crate::http::headers::DEFAULT_PORT;
use crate::http::request::{RequestLimits, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES};
use crate::utils::error::{HttpError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_READ_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub limits: LimitsConfig,
    pub files: Option<FilesConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub bind_address: String,
    pub logging_level: LoggingLevel,
    pub server_name: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            logging_level: LoggingLevel::default(),
            server_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub read_timeout_seconds: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout_seconds: DEFAULT_READ_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesConfig {
    pub root: String,
    pub index_file: Option<String>,
}

impl ServerConfig {
    /// Default configuration listening on `port`.
    pub fn on_port(port: u16) -> Self {
        let mut config = Self::default();
        config.server.port = port;
        config
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(HttpError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| HttpError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| HttpError::ConfigValidationError {
            field: "environment".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_bind_address("server.bind_address", &self.server.bind_address)?;
        if let Some(name) = &self.server.server_name {
            validation::validate_non_empty_string("server.server_name", name)?;
        }

        validation::validate_positive_number(
            "limits.max_header_bytes",
            self.limits.max_header_bytes,
            256,
        )?;
        validation::validate_positive_number("limits.max_body_bytes", self.limits.max_body_bytes, 1)?;
        validation::validate_range(
            "limits.read_timeout_seconds",
            self.limits.read_timeout_seconds,
            1,
            3600,
        )?;

        if let Some(files) = &self.files {
            validation::validate_path("files.root", &files.root)?;
            if let Some(index) = &files.index_file {
                validation::validate_non_empty_string("files.index_file", index)?;
                if index.contains('/') || index.contains('\\') {
                    return Err(HttpError::InvalidConfigValueError {
                        field: "files.index_file".to_string(),
                        value: index.clone(),
                        reason: "Index file must be a plain file name".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_header_bytes: self.limits.max_header_bytes,
            max_body_bytes: self.limits.max_body_bytes,
            read_timeout: self.read_timeout(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.read_timeout_seconds)
    }

    pub fn server_name(&self) -> &str {
        self.server
            .server_name
            .as_deref()
            .unwrap_or(crate::http::response::DEFAULT_SERVER_NAME)
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
