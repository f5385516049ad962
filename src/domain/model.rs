use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// How much the server reports about its own work. Each level includes the
/// ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LoggingLevel {
    Silent,
    Errors,
    Warnings,
    #[default]
    Requests,
    Responses,
    Debug,
}

impl LoggingLevel {
    pub fn includes(self, level: LoggingLevel) -> bool {
        level != LoggingLevel::Silent && self >= level
    }
}

/// Snapshot of a request the server is handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    pub id: u64,
    pub method: String,
    pub target: String,
    pub peer_addr: Option<SocketAddr>,
    pub received_at: DateTime<Utc>,
}
