use crate::domain::ports::Handler;
use crate::http::headers::{self, Headers};
use crate::http::response::http_date;
use crate::http::{mime, Request, Response, StatusCode};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;
pub const DEFAULT_INDEX_FILE: &str = "index.html";

/// Sends the file at a fixed path for every request.
#[derive(Debug, Clone)]
pub struct FileHandler {
    path: PathBuf,
}

impl FileHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Handler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    fn can_handle(&self, _request: &Request) -> bool {
        true
    }

    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<StatusCode> {
        serve_file(&self.path, request, response).await
    }
}

/// Serves the files below a root directory, mapped from the URL path.
#[derive(Debug, Clone)]
pub struct DirectoryHandler {
    root: PathBuf,
    index_file: String,
}

impl DirectoryHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: DEFAULT_INDEX_FILE.to_string(),
        }
    }

    pub fn with_index_file(mut self, index_file: impl Into<String>) -> Self {
        self.index_file = index_file.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a URL path, or `None` when it escapes the root.
    fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = percent_decode(url_path)?;
        let mut path = self.root.clone();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                s if s.contains('\\') || s.contains('\0') => return None,
                s => path.push(s),
            }
        }
        Some(path)
    }
}

#[async_trait]
impl Handler for DirectoryHandler {
    fn name(&self) -> &str {
        "directory"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request.method(), "GET" | "HEAD")
    }

    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<StatusCode> {
        let url_path = request.path().to_string();
        let Some(mut path) = self.resolve(&url_path) else {
            tracing::debug!("rejected path outside document root: {}", url_path);
            response.send_error(StatusCode::Forbidden).await?;
            return Ok(StatusCode::Forbidden);
        };

        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            if !url_path.ends_with('/') {
                let mut location = format!("{}/", url_path);
                if let Some(query) = request.url().and_then(|u| u.query()) {
                    location.push('?');
                    location.push_str(query);
                }
                response.send_status(StatusCode::MovedPermanently).await?;
                let mut headers = Headers::new();
                headers.insert(headers::LOCATION, location);
                headers.insert(headers::CONTENT_LENGTH, "0");
                response.send_headers(headers).await?;
                return Ok(StatusCode::MovedPermanently);
            }
            path.push(&self.index_file);
        }

        serve_file(&path, request, response).await
    }
}

/// Sends one file: `GET` gets the content, `HEAD` the headers only.
pub async fn serve_file(
    path: &Path,
    request: &mut Request,
    response: &mut Response,
) -> Result<StatusCode> {
    if !matches!(request.method(), "GET" | "HEAD") {
        response.send_status(StatusCode::MethodNotAllowed).await?;
        let mut headers = Headers::new();
        headers.insert(headers::ALLOW, "GET, HEAD");
        headers.insert(headers::CONTENT_LENGTH, "0");
        response.send_headers(headers).await?;
        return Ok(StatusCode::MethodNotAllowed);
    }

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return not_found(response).await,
        Err(e) if e.kind() == ErrorKind::NotFound => return not_found(response).await,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            response.send_error(StatusCode::Forbidden).await?;
            return Ok(StatusCode::Forbidden);
        }
        Err(e) => return Err(e.into()),
    };

    let mut file = tokio::fs::File::open(path).await?;

    let mut headers = Headers::new();
    headers.insert(headers::CONTENT_TYPE, mime::content_type_for(path));
    headers.insert(headers::CONTENT_LENGTH, metadata.len().to_string());
    if let Ok(modified) = metadata.modified() {
        headers.insert(
            headers::LAST_MODIFIED,
            http_date(DateTime::<Utc>::from(modified)),
        );
    }
    response.send_status(StatusCode::Ok).await?;
    response.send_headers(headers).await?;

    if request.is_head() {
        return Ok(StatusCode::Ok);
    }

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        response.send_body(&buf[..read]).await?;
    }
    Ok(StatusCode::Ok)
}

async fn not_found(response: &mut Response) -> Result<StatusCode> {
    response.send_error(StatusCode::NotFound).await?;
    Ok(StatusCode::NotFound)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
