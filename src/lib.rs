//! IcedHTTP: a small embeddable HTTP/1.1 server.
//!
//! Create a [`Server`], register [`Handler`]s and start it:
//!
//! ```no_run
//! use iced_http::{FnHandler, Server, StatusCode};
//! use std::sync::Arc;
//!
//! # async fn run() -> iced_http::Result<()> {
//! let server = Server::on_port(8080);
//! server.register_handler(Arc::new(FnHandler::any(|_req, res| {
//!     Box::pin(async move {
//!         res.send_text(StatusCode::Ok, "text/plain", "hello").await?;
//!         Ok(StatusCode::Ok)
//!     })
//! })));
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod http;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use app::handlers::{DirectoryHandler, FileHandler, FnHandler, NotImplementedHandler};
pub use config::ServerConfig;
pub use core::{Handler, LoggingLevel, RequestInfo, ResponseFuture, Server, ServerDelegate, ServerState};
pub use http::{Headers, Request, Response, StatusCode};
pub use utils::error::{HttpError, Result};
