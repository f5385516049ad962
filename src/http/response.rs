//! Response side of a connection.
//!
//! Output is written in three steps: status line, header block, body. Each
//! step sends the earlier ones with defaults when the caller skipped them.

use crate::http::headers::{self, Headers};
use crate::http::mime;
use crate::http::status::StatusCode;
use crate::utils::error::{HttpError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub type BoxedOutput = Box<dyn AsyncWrite + Send + Unpin>;

pub const DEFAULT_SERVER_NAME: &str = concat!("IcedHTTP/", env!("CARGO_PKG_VERSION"));

/// IMF-fixdate, as used by `Date` and `Last-Modified`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct Response {
    output: Option<BoxedOutput>,
    server_name: String,
    head_only: bool,
    status: StatusCode,
    did_send_status: bool,
    did_send_headers: bool,
    headers: Option<Headers>,
    output_error: Option<io::Error>,
    body_bytes: u64,
    completed: bool,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("did_send_headers", &self.did_send_headers)
            .field("body_bytes", &self.body_bytes)
            .field("output_error", &self.output_error)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Response {
    pub fn new<W>(output: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            output: Some(Box::new(output)),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            head_only: false,
            status: StatusCode::Unknown,
            did_send_status: false,
            did_send_headers: false,
            headers: None,
            output_error: None,
            body_bytes: 0,
            completed: false,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Answering a `HEAD` request: body bytes are counted but never written.
    pub fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    /// The status sent to the client, `Unknown` until one is sent.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn did_send_status(&self) -> bool {
        self.did_send_status
    }

    pub fn did_send_headers(&self) -> bool {
        self.did_send_headers
    }

    /// Headers as sent, including the defaults that were added.
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// First write error on the output; later writes are skipped.
    pub fn output_error(&self) -> Option<&io::Error> {
        self.output_error.as_ref()
    }

    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub async fn send_status(&mut self, status: StatusCode) -> Result<()> {
        if self.did_send_status {
            return Err(HttpError::ResponseState {
                message: format!("status already sent ({})", self.status),
            });
        }
        if status == StatusCode::Unknown {
            return Err(HttpError::ResponseState {
                message: "cannot send an unknown status".to_string(),
            });
        }
        self.status = status;
        self.did_send_status = true;
        let line = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), status.reason_phrase());
        self.write(line.as_bytes()).await
    }

    pub async fn send_headers(&mut self, mut headers: Headers) -> Result<()> {
        if self.did_send_headers {
            return Err(HttpError::ResponseState {
                message: "headers already sent".to_string(),
            });
        }
        if let Some((name, _)) = headers
            .iter()
            .find(|(name, value)| !headers::is_token(name) || value.contains(['\r', '\n']))
        {
            return Err(HttpError::ResponseState {
                message: format!("invalid header '{}'", name.escape_debug()),
            });
        }
        self.did_send_headers = true;
        if !self.did_send_status {
            self.send_status(StatusCode::Ok).await?;
        }

        if !headers.contains(headers::DATE) {
            headers.insert(headers::DATE, http_date(Utc::now()));
        }
        if !headers.contains(headers::SERVER) {
            headers.insert(headers::SERVER, self.server_name.clone());
        }
        if !headers.contains(headers::CONNECTION) {
            headers.insert(headers::CONNECTION, "close");
        }

        let mut block = String::new();
        for (name, value) in headers.iter() {
            block.push_str(name);
            block.push_str(": ");
            block.push_str(value);
            block.push_str("\r\n");
        }
        block.push_str("\r\n");
        self.headers = Some(headers);
        self.write(block.as_bytes()).await
    }

    /// Writes body bytes, sending headers sized to this chunk if none went out yet.
    pub async fn send_body(&mut self, body: &[u8]) -> Result<()> {
        if !self.did_send_headers {
            let mut headers = Headers::new();
            headers.insert(headers::CONTENT_LENGTH, body.len().to_string());
            self.send_headers(headers).await?;
        }
        self.body_bytes += body.len() as u64;
        if self.head_only || self.status.forbids_body() || body.is_empty() {
            return Ok(());
        }
        self.write(body).await
    }

    /// Sends a complete response with a content type.
    pub async fn send_text(
        &mut self,
        status: StatusCode,
        content_type: &str,
        body: impl AsRef<[u8]>,
    ) -> Result<()> {
        let body = body.as_ref();
        if !self.did_send_status {
            self.send_status(status).await?;
        }
        let mut headers = Headers::new();
        headers.insert(headers::CONTENT_TYPE, content_type);
        headers.insert(headers::CONTENT_LENGTH, body.len().to_string());
        self.send_headers(headers).await?;
        self.send_body(body).await
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &mut self,
        status: StatusCode,
        value: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send_text(status, mime::APPLICATION_JSON, body).await
    }

    /// Plain-text error page carrying the status line.
    pub async fn send_error(&mut self, status: StatusCode) -> Result<()> {
        let body = format!("{}\n", status);
        self.send_text(status, mime::TEXT_PLAIN, body).await
    }

    /// Finishes the response and closes the output. Safe to call twice.
    pub async fn complete(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }

        if !self.did_send_headers && self.output_error.is_none() {
            if let Err(e) = self.send_empty_head().await {
                tracing::debug!("sending empty response head failed: {}", e);
            }
        }

        self.completed = true;
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        if self.output_error.is_some() {
            return Ok(());
        }
        let flushed = match output.flush().await {
            Ok(()) => output.shutdown().await,
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            tracing::debug!("closing response output failed: {}", e);
            let copy = io::Error::new(e.kind(), e.to_string());
            self.output_error = Some(e);
            return Err(HttpError::IoError(copy));
        }
        Ok(())
    }

    async fn send_empty_head(&mut self) -> Result<()> {
        if !self.did_send_status {
            self.send_status(StatusCode::NoContent).await?;
        }
        let mut headers = Headers::new();
        if !self.status.forbids_body() {
            headers.insert(headers::CONTENT_LENGTH, "0");
        }
        self.send_headers(headers).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(err) = &self.output_error {
            return Err(HttpError::ResponseState {
                message: format!("output already failed: {}", err),
            });
        }
        let output = self.output.as_mut().ok_or_else(|| HttpError::ResponseState {
            message: "response already completed".to_string(),
        })?;
        if let Err(e) = output.write_all(bytes).await {
            let copy = io::Error::new(e.kind(), e.to_string());
            self.output_error = Some(e);
            return Err(HttpError::IoError(copy));
        }
        Ok(())
    }
}
