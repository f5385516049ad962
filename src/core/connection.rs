use crate::core::server::Server;
use crate::domain::model::{LoggingLevel, RequestInfo};
use crate::http::{Request, Response, StatusCode};
use crate::utils::error::HttpError;
use chrono::Utc;
use std::time::{Duration, Instant};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

impl Server {
    /// Runs one request/response exchange and closes both streams.
    ///
    /// Reads the request head (bounded by the read timeout), picks a handler,
    /// runs it and makes sure a complete response goes out whatever the handler
    /// did. Returns the status sent to the client.
    pub async fn handle_connection(&self, request: &mut Request, response: &mut Response) -> StatusCode {
        let started = Instant::now();

        let head = tokio::time::timeout(self.config().read_timeout(), request.read_headers())
            .await
            .unwrap_or(Err(HttpError::RequestTimeout));
        if let Err(err) = head {
            return self.reject(request, response, err).await;
        }

        let info = RequestInfo {
            id: request.id(),
            method: request.method().to_string(),
            target: request.target().to_string(),
            peer_addr: request.peer_addr(),
            received_at: Utc::now(),
        };
        let _active = self.track(info.clone());

        if self.logs(LoggingLevel::Requests) {
            tracing::info!(
                "➡️ #{} {} {} from {}",
                info.id,
                info.method,
                info.target,
                info.peer_addr
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        if self.logs(LoggingLevel::Debug) {
            tracing::debug!("#{} headers: {:?}", info.id, request.headers());
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_receive(&info);
        }

        response.set_head_only(request.is_head());
        let handler = self.handler_for(request);
        if self.logs(LoggingLevel::Debug) {
            tracing::debug!("#{} handled by '{}'", info.id, handler.name());
        }

        match handler.handle(request, response).await {
            Ok(status) => {
                if !response.did_send_status() && status != StatusCode::Unknown {
                    if let Err(e) = response.send_status(status).await {
                        self.note_output_failure(info.id, &e);
                    }
                }
            }
            Err(err) => {
                if self.logs(LoggingLevel::Errors) {
                    tracing::error!(
                        "❌ #{} handler '{}' failed: {} (Category: {:?})",
                        info.id,
                        handler.name(),
                        err,
                        err.category()
                    );
                }
                self.record_error(&err);
                if !response.did_send_status() {
                    if let Err(e) = response.send_error(err.status_code()).await {
                        self.note_output_failure(info.id, &e);
                    }
                }
            }
        }

        self.finish(request, response).await;
        let status = response.status();

        if self.logs(LoggingLevel::Responses) {
            tracing::info!(
                "⬅️ #{} {} {} bytes in {:?}",
                info.id,
                status,
                response.body_bytes(),
                started.elapsed()
            );
        }
        if let Some(delegate) = self.delegate() {
            delegate.did_complete(&info, status);
        }
        status
    }

    /// Answers a request whose head could not be read.
    async fn reject(&self, request: &mut Request, response: &mut Response, err: HttpError) -> StatusCode {
        let status = err.status_code();
        if self.logs(LoggingLevel::Warnings) {
            tracing::warn!("⚠️ #{} rejected with {}: {}", request.id(), status, err);
        }
        self.record_error(&err);
        if let Err(e) = response.send_error(status).await {
            self.note_output_failure(request.id(), &e);
        }
        self.finish(request, response).await;
        let status = response.status();

        if let Some(delegate) = self.delegate() {
            // Whatever of the request line was parsed before the failure.
            let info = RequestInfo {
                id: request.id(),
                method: request.method().to_string(),
                target: request.target().to_string(),
                peer_addr: request.peer_addr(),
                received_at: Utc::now(),
            };
            delegate.did_complete(&info, status);
        }
        status
    }

    async fn finish(&self, request: &mut Request, response: &mut Response) {
        if let Err(e) = response.complete().await {
            self.note_output_failure(request.id(), &e);
        }
        // Closing with unread input makes the peer see a reset instead of the response.
        if request.did_read_headers() {
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, request.read_body()).await;
        }
        request.complete();
    }

    fn note_output_failure(&self, id: u64, err: &HttpError) {
        if self.logs(LoggingLevel::Debug) {
            tracing::debug!("#{} could not write response: {}", id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::app::handlers::FnHandler;
    use crate::config::ServerConfig;
    use crate::core::server::Server;
    use crate::domain::model::RequestInfo;
    use crate::domain::ports::ServerDelegate;
    use crate::http::{Request, Response, StatusCode};
    use crate::utils::error::HttpError;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn exchange(server: &Server, raw: &str) -> (StatusCode, String) {
        let (mut client, input) = duplex(64 * 1024);
        client.write_all(raw.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let (mut reader, output) = duplex(64 * 1024);

        let mut request = Request::new(input).with_peer(1, None);
        let mut response = Response::new(output);
        let status = server.handle_connection(&mut request, &mut response).await;
        drop(response);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        (status, text)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ServerDelegate for Recorder {
        fn did_receive(&self, request: &RequestInfo) {
            self.events
                .lock()
                .unwrap()
                .push(format!("receive {} {}", request.method, request.target));
        }

        fn did_complete(&self, _request: &RequestInfo, status: StatusCode) {
            self.events
                .lock()
                .unwrap()
                .push(format!("complete {}", status.as_u16()));
        }
    }

    #[tokio::test]
    async fn test_unmatched_request_gets_501() {
        let server = Server::on_port(0);
        let (status, text) = exchange(&server, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert_eq!(status, StatusCode::NotImplemented);
        assert!(text.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    }

    #[tokio::test]
    async fn test_returned_status_is_sent_when_handler_wrote_nothing() {
        let server = Server::on_port(0);
        server.register_handler(Arc::new(FnHandler::any(|_, _| {
            Box::pin(async { Ok(StatusCode::Accepted) })
        })));
        let (status, text) = exchange(&server, "POST /jobs HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n").await;
        assert_eq!(status, StatusCode::Accepted);
        assert!(text.starts_with("HTTP/1.1 202 Accepted\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[tokio::test]
    async fn test_failing_handler_gets_500_and_records_error() {
        let server = Server::on_port(0);
        server.register_handler(Arc::new(FnHandler::any(|_, _| {
            Box::pin(async { Err(HttpError::handler("broken", "database unavailable")) })
        })));
        let (status, text) = exchange(&server, "GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert_eq!(status, StatusCode::InternalServerError);
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(server.last_error().unwrap().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let server = Server::on_port(0);
        let (status, text) = exchange(&server, "NONSENSE\r\n\r\n").await;
        assert_eq!(status, StatusCode::BadRequest);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(server.last_error().is_some());

        let (status, _) = exchange(&server, "GET / HTTP/3.0\r\n\r\n").await;
        assert_eq!(status, StatusCode::HttpVersionNotSupported);
    }

    #[tokio::test]
    async fn test_header_limit_from_config() {
        let mut config = ServerConfig::on_port(0);
        config.limits.max_header_bytes = 64;
        let server = Server::with_config(config);
        let raw = format!("GET / HTTP/1.1\r\nHost: a\r\nX-Big: {}\r\n\r\n", "x".repeat(200));
        let mut request = Request::new(std::io::Cursor::new(raw.into_bytes()))
            .with_limits(server.config().request_limits());
        let (mut reader, output) = duplex(4096);
        let mut response = Response::new(output);
        let status = server.handle_connection(&mut request, &mut response).await;
        assert_eq!(status, StatusCode::RequestHeaderFieldsTooLarge);
        drop(response);
        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert!(text.starts_with("HTTP/1.1 431 "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_client_times_out() {
        let server = Server::on_port(0);
        let (_client, input): (DuplexStream, DuplexStream) = duplex(1024);
        let (_reader, output) = duplex(4096);
        let mut request = Request::new(input);
        let mut response = Response::new(output);
        let status = server.handle_connection(&mut request, &mut response).await;
        assert_eq!(status, StatusCode::RequestTimeout);
    }

    #[tokio::test]
    async fn test_oversized_body_gets_413() {
        let mut config = ServerConfig::on_port(0);
        config.limits.max_body_bytes = 8;
        let server = Server::with_config(config);
        server.register_handler(Arc::new(FnHandler::any(|req, res| {
            Box::pin(async move {
                let body = req.read_body().await?;
                res.send_text(StatusCode::Ok, "text/plain", body).await?;
                Ok(StatusCode::Ok)
            })
        })));

        let raw = "POST /upload HTTP/1.1\r\nHost: a\r\nContent-Length: 16\r\n\r\n0123456789abcdef";
        let mut request = Request::new(std::io::Cursor::new(raw.as_bytes().to_vec()))
            .with_limits(server.config().request_limits());
        let (mut reader, output) = duplex(4096);
        let mut response = Response::new(output);
        let status = server.handle_connection(&mut request, &mut response).await;
        drop(response);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(status, StatusCode::PayloadTooLarge);
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(server.last_error().unwrap().contains("exceeds 8 bytes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_body_gets_408() {
        let mut config = ServerConfig::on_port(0);
        config.limits.read_timeout_seconds = 1;
        let server = Server::with_config(config);
        server.register_handler(Arc::new(FnHandler::any(|req, res| {
            Box::pin(async move {
                let body = req.read_body().await?;
                res.send_text(StatusCode::Ok, "text/plain", body).await?;
                Ok(StatusCode::Ok)
            })
        })));

        let (mut client, input) = duplex(1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\nab")
            .await
            .unwrap();
        let (mut reader, output) = duplex(4096);
        let mut request = Request::new(input).with_limits(server.config().request_limits());
        let mut response = Response::new(output);
        let status = server.handle_connection(&mut request, &mut response).await;
        drop(response);

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(status, StatusCode::RequestTimeout);
        assert!(text.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        assert!(server.active_requests().is_empty());
        drop(client);
    }

    #[tokio::test]
    async fn test_delegate_sees_rejected_requests() {
        let server = Server::on_port(0);
        let recorder = Arc::new(Recorder::default());
        server.set_delegate(recorder.clone());
        exchange(&server, "NONSENSE\r\n\r\n").await;
        exchange(&server, "GET / HTTP/2.0\r\n\r\n").await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["complete 400", "complete 505"]);
    }

    #[tokio::test]
    async fn test_delegate_sees_receive_and_complete() {
        let server = Server::on_port(0);
        let recorder = Arc::new(Recorder::default());
        server.set_delegate(recorder.clone());
        exchange(&server, "GET /status HTTP/1.1\r\nHost: a\r\n\r\n").await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec!["receive GET /status", "complete 501"]);
        assert!(server.active_requests().is_empty());
    }

    #[tokio::test]
    async fn test_head_request_has_no_body() {
        let server = Server::on_port(0);
        server.register_handler(Arc::new(FnHandler::any(|_, res| {
            Box::pin(async move {
                res.send_text(StatusCode::Ok, "text/plain", "body text").await?;
                Ok(StatusCode::Ok)
            })
        })));
        let (_, text) = exchange(&server, "HEAD / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
