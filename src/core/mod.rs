pub mod connection;
pub mod server;

pub use crate::domain::model::{LoggingLevel, RequestInfo, ServerState};
pub use crate::domain::ports::{Handler, ResponseFuture, ServerDelegate};
pub use crate::utils::error::Result;
pub use server::Server;
