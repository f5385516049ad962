//! Request side of a connection.
//!
//! A [`Request`] owns the input half of the socket. The server reads the
//! request line and headers before choosing a handler; the body is read only
//! when a handler asks for it.

use crate::http::headers::{self, is_token, Headers};
use crate::utils::error::{HttpError, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use url::Url;

pub type BoxedInput = Box<dyn AsyncRead + Send + Unpin>;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    /// Longest wait for each read of body data.
    pub read_timeout: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

pub struct Request {
    input: Option<BufReader<BoxedInput>>,
    id: u64,
    peer_addr: Option<SocketAddr>,
    limits: RequestLimits,
    default_host: String,
    did_read_headers: bool,
    body_consumed: bool,
    method: String,
    target: String,
    version: String,
    headers: Headers,
    url: Option<Url>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .finish()
    }
}

impl Request {
    pub fn new<R>(input: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            input: Some(BufReader::new(Box::new(input) as BoxedInput)),
            id: 0,
            peer_addr: None,
            limits: RequestLimits::default(),
            default_host: "localhost".to_string(),
            did_read_headers: false,
            body_consumed: false,
            method: String::new(),
            target: String::new(),
            version: String::new(),
            headers: Headers::new(),
            url: None,
        }
    }

    pub fn with_peer(mut self, id: u64, peer_addr: Option<SocketAddr>) -> Self {
        self.id = id;
        self.peer_addr = peer_addr;
        self
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Host used to build [`Request::url`] when the client sent no `Host`.
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn did_read_headers(&self) -> bool {
        self.did_read_headers
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target exactly as sent on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn path(&self) -> &str {
        self.url.as_ref().map(|u| u.path()).unwrap_or("/")
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .as_ref()
            .map(|u| u.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    /// Reads the request line and header block. Does nothing the second time.
    pub async fn read_headers(&mut self) -> Result<()> {
        if self.did_read_headers {
            return Ok(());
        }

        let limit = self.limits.max_header_bytes;
        let mut budget = limit;
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| HttpError::malformed("request input already closed"))?;

        let request_line = loop {
            match read_line(input, &mut budget, limit).await? {
                None => {
                    return Err(HttpError::malformed(
                        "connection closed before the request line",
                    ))
                }
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };

        let (method, target, version) = parse_request_line(&request_line)?;

        let mut headers = Headers::new();
        loop {
            let line = read_line(input, &mut budget, limit)
                .await?
                .ok_or_else(|| HttpError::malformed("connection closed inside the headers"))?;
            if line.is_empty() {
                break;
            }
            let (name, value) = parse_header_line(&line)?;
            headers.append(name, value);
        }

        if version == "HTTP/1.1" && !headers.contains(headers::HOST) {
            return Err(HttpError::malformed("HTTP/1.1 request without Host"));
        }
        if headers.contains(headers::TRANSFER_ENCODING) && headers.contains(headers::CONTENT_LENGTH)
        {
            return Err(HttpError::malformed(
                "both Transfer-Encoding and Content-Length present",
            ));
        }
        // Reject a bad Content-Length up front rather than when the body is read.
        headers.content_length()?;

        let host = headers
            .get(headers::HOST)
            .unwrap_or(&self.default_host)
            .to_string();
        self.url = Some(resolve_target(&target, &host)?);
        self.method = method;
        self.target = target;
        self.version = version;
        self.headers = headers;
        self.did_read_headers = true;

        tracing::trace!(
            id = self.id,
            method = %self.method,
            target = %self.target,
            header_count = self.headers.len(),
            "parsed request headers"
        );
        Ok(())
    }

    /// Reads the whole body. Later calls return an empty body.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        self.read_headers().await?;
        if self.body_consumed {
            return Ok(Vec::new());
        }
        self.body_consumed = true;

        let max = self.limits.max_body_bytes;
        let read_timeout = self.limits.read_timeout;
        let chunked = self.headers.is_chunked();
        let content_length = self.headers.content_length()?;
        let Some(input) = self.input.as_mut() else {
            return Ok(Vec::new());
        };

        if chunked {
            return read_chunked(input, max, read_timeout).await;
        }

        match content_length {
            None | Some(0) => Ok(Vec::new()),
            Some(length) if length > max as u64 => Err(HttpError::PayloadTooLarge { limit: max }),
            Some(length) => {
                let mut body = vec![0u8; length as usize];
                timed(read_timeout, read_exact(input, &mut body, "body shorter than Content-Length"))
                    .await?;
                Ok(body)
            }
        }
    }

    pub async fn read_body_string(&mut self) -> Result<String> {
        let body = self.read_body().await?;
        String::from_utf8(body).map_err(|_| HttpError::malformed("request body is not UTF-8"))
    }

    /// Closes the input side. Further body reads return nothing.
    pub fn complete(&mut self) {
        self.body_consumed = true;
        self.input = None;
    }
}

/// Reads one line, stripping CRLF or LF. `None` means end of input.
async fn read_line(
    input: &mut BufReader<BoxedInput>,
    budget: &mut usize,
    limit: usize,
) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = (&mut *input)
        .take(*budget as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if read > *budget {
        return Err(HttpError::HeadersTooLarge { limit });
    }
    *budget -= read;
    if buf.last() != Some(&b'\n') {
        return Err(HttpError::malformed("connection closed mid-line"));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| HttpError::malformed("request head is not valid UTF-8"))
}

fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = line.split(' ').collect();
    let [method, target, version] = parts.as_slice() else {
        return Err(HttpError::malformed(format!("invalid request line: {}", line)));
    };

    if !is_token(method) {
        return Err(HttpError::malformed(format!("invalid method: {}", method)));
    }
    if target.is_empty() {
        return Err(HttpError::malformed("empty request target"));
    }
    match *version {
        "HTTP/1.0" | "HTTP/1.1" => {}
        v if v.starts_with("HTTP/") => {
            return Err(HttpError::UnsupportedVersion {
                version: v.to_string(),
            })
        }
        v => return Err(HttpError::malformed(format!("invalid HTTP version: {}", v))),
    }

    Ok((method.to_string(), target.to_string(), version.to_string()))
}

fn parse_header_line(line: &str) -> Result<(String, String)> {
    if line.starts_with(' ') || line.starts_with('\t') {
        return Err(HttpError::malformed("obsolete header line folding"));
    }
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpError::malformed(format!("invalid header line: {}", line)))?;
    if !is_token(name) {
        return Err(HttpError::malformed(format!("invalid header name: {}", name)));
    }
    Ok((
        name.to_string(),
        value.trim_matches(|c| c == ' ' || c == '\t').to_string(),
    ))
}

fn resolve_target(target: &str, host: &str) -> Result<Url> {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(Url::parse(target)?);
    }
    let base = Url::parse(&format!("http://{}/", host))?;
    match target {
        "*" => Ok(base),
        t if t.starts_with('/') => Ok(base.join(t)?),
        t => Err(HttpError::malformed(format!("invalid request target: {}", t))),
    }
}

async fn read_chunked(
    input: &mut BufReader<BoxedInput>,
    max: usize,
    read_timeout: Duration,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    // Chunk-size and trailer lines get their own allowance.
    let line_limit = DEFAULT_MAX_HEADER_BYTES;

    loop {
        let mut budget = line_limit;
        let line = timed(read_timeout, read_line(input, &mut budget, line_limit))
            .await?
            .ok_or_else(|| HttpError::malformed("connection closed inside chunked body"))?;
        let size_text = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| HttpError::malformed(format!("invalid chunk size: {}", size_text)))?;

        if size == 0 {
            loop {
                let mut budget = line_limit;
                match timed(read_timeout, read_line(input, &mut budget, line_limit)).await? {
                    Some(trailer) if !trailer.is_empty() => continue,
                    _ => break,
                }
            }
            return Ok(body);
        }

        if body.len().saturating_add(size) > max {
            return Err(HttpError::PayloadTooLarge { limit: max });
        }
        let start = body.len();
        body.resize(start + size, 0);
        timed(
            read_timeout,
            read_exact(input, &mut body[start..], "connection closed inside chunked body"),
        )
        .await?;

        let mut budget = 2;
        match timed(read_timeout, read_line(input, &mut budget, 2)).await? {
            Some(rest) if rest.is_empty() => {}
            _ => return Err(HttpError::malformed("missing CRLF after chunk data")),
        }
    }
}

async fn timed<T>(limit: Duration, read: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, read)
        .await
        .unwrap_or(Err(HttpError::RequestTimeout))
}

/// A peer closing early is a short request, not a server failure.
async fn read_exact(
    input: &mut BufReader<BoxedInput>,
    buf: &mut [u8],
    short_reason: &'static str,
) -> Result<()> {
    match input.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(HttpError::malformed(short_reason)),
        Err(e) => Err(e.into()),
    }
}
