use iced_http::http::mime;
use iced_http::{
    DirectoryHandler, FileHandler, FnHandler, Handler, HttpError, LoggingLevel, RequestInfo,
    Server, ServerConfig, ServerDelegate, ServerState, StatusCode,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

async fn running_server() -> Arc<Server> {
    let mut config = ServerConfig::on_port(0);
    config.server.logging_level = LoggingLevel::Debug;
    let server = Server::with_config(config);
    server.start().await.expect("server should start");
    server
}

fn url(server: &Server, path: &str) -> String {
    server.root_url().unwrap().join(path).unwrap().to_string()
}

async fn raw_exchange(server: &Server, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_default_server_answers_501() {
    let server = running_server().await;

    let response = reqwest::get(url(&server, "/anything")).await.unwrap();
    assert_eq!(response.status().as_u16(), 501);
    assert_eq!(
        response.headers().get("connection").unwrap().to_str().unwrap(),
        "close"
    );
    assert!(response.headers().contains_key("date"));
    assert_eq!(response.text().await.unwrap(), "501 Not Implemented\n");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_most_recent_handler_wins() {
    let server = running_server().await;
    server.register_handler(Arc::new(FnHandler::any(|_, res| {
        Box::pin(async move {
            res.send_text(StatusCode::Ok, mime::TEXT_PLAIN, "general").await?;
            Ok(StatusCode::Ok)
        })
    })));
    server.register_handler(Arc::new(FnHandler::new(
        |req| req.path().starts_with("/api/"),
        |req, res| {
            Box::pin(async move {
                let query = req.query_pairs();
                res.send_json(StatusCode::Ok, &serde_json::json!({ "path": req.path(), "query": query }))
                    .await?;
                Ok(StatusCode::Ok)
            })
        },
    )));

    let api: serde_json::Value = reqwest::get(url(&server, "/api/items?page=2"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(api["path"], "/api/items");
    assert_eq!(api["query"][0][0], "page");
    assert_eq!(api["query"][0][1], "2");

    let other = reqwest::get(url(&server, "/index")).await.unwrap();
    assert_eq!(other.text().await.unwrap(), "general");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_post_body_round_trip() {
    let server = running_server().await;
    server.register_handler(Arc::new(FnHandler::new(
        |req| req.method() == "POST",
        |req, res| {
            Box::pin(async move {
                let body = req.read_body_string().await?;
                res.send_text(StatusCode::Created, mime::TEXT_PLAIN, body.to_uppercase())
                    .await?;
                Ok(StatusCode::Created)
            })
        },
    )));

    let response = reqwest::Client::new()
        .post(url(&server, "/shout"))
        .body("quiet words")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.text().await.unwrap(), "QUIET WORDS");

    let chunked = raw_exchange(
        &server,
        b"POST /shout HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
    )
    .await;
    assert!(chunked.starts_with("HTTP/1.1 201 Created\r\n"));
    assert!(chunked.ends_with("ABC"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_and_directory_handlers() {
    let site = TempDir::new().unwrap();
    std::fs::write(site.path().join("index.html"), "<p>root</p>").unwrap();
    std::fs::write(site.path().join("data.json"), "{\"n\":1}").unwrap();
    let single = site.path().join("single.txt");
    std::fs::write(&single, "only file").unwrap();

    let server = running_server().await;
    server.register_handler(Arc::new(DirectoryHandler::new(site.path())));
    server.register_handler(Arc::new(FnHandler::new(
        |req| req.path() == "/single",
        move |req, res| {
            let single = single.clone();
            Box::pin(async move { FileHandler::new(single).handle(req, res).await })
        },
    )));

    let index = reqwest::get(url(&server, "/")).await.unwrap();
    assert_eq!(index.status().as_u16(), 200);
    assert_eq!(
        index.headers().get("content-type").unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(index.text().await.unwrap(), "<p>root</p>");

    let json = reqwest::get(url(&server, "/data.json")).await.unwrap();
    assert_eq!(json.headers().get("content-type").unwrap(), "application/json");

    let missing = reqwest::get(url(&server, "/nope.txt")).await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let single = reqwest::get(url(&server, "/single")).await.unwrap();
    assert_eq!(single.text().await.unwrap(), "only file");

    let put = reqwest::Client::new()
        .put(url(&server, "/data.json"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status().as_u16(), 501);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_bad_requests_are_answered() {
    let server = running_server().await;

    let garbage = raw_exchange(&server, b"THIS IS NOT HTTP\r\n\r\n").await;
    assert!(garbage.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let version = raw_exchange(&server, b"GET / HTTP/2.0\r\n\r\n").await;
    assert!(version.starts_with("HTTP/1.1 505 "));

    let no_host = raw_exchange(&server, b"GET / HTTP/1.1\r\n\r\n").await;
    assert!(no_host.starts_with("HTTP/1.1 400 "));

    assert!(server.last_error().is_some());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_running_handlers() {
    let server = running_server().await;
    let (entered_tx, entered_rx) = oneshot::channel::<()>();
    let entered_tx = Arc::new(Mutex::new(Some(entered_tx)));
    server.register_handler(Arc::new(FnHandler::any(move |_, res| {
        let entered_tx = Arc::clone(&entered_tx);
        Box::pin(async move {
            if let Some(tx) = entered_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            res.send_text(StatusCode::Ok, mime::TEXT_PLAIN, "slow").await?;
            Ok(StatusCode::Ok)
        })
    })));

    let request_url = url(&server, "/slow");
    let client = tokio::spawn(async move { reqwest::get(request_url).await?.text().await });

    entered_rx.await.unwrap();
    assert_eq!(server.active_requests().len(), 1);
    assert_eq!(server.active_requests()[0].target, "/slow");

    let mut states = server.subscribe_state();
    let stopper = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.stop().await })
    };
    states
        .wait_for(|s| *s == ServerState::Stopping)
        .await
        .unwrap();

    assert_eq!(client.await.unwrap().unwrap(), "slow");
    stopper.await.unwrap().unwrap();
    assert_eq!(server.state(), ServerState::Idle);
    assert!(server.active_requests().is_empty());
}

#[tokio::test]
async fn test_stalled_upload_does_not_block_stop() {
    let mut config = ServerConfig::on_port(0);
    config.limits.read_timeout_seconds = 1;
    let server = Server::with_config(config);
    server.register_handler(Arc::new(FnHandler::any(|req, res| {
        Box::pin(async move {
            let body = req.read_body().await?;
            res.send_text(StatusCode::Ok, mime::TEXT_PLAIN, body).await?;
            Ok(StatusCode::Ok)
        })
    })));
    server.start().await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\r\nab")
        .await
        .unwrap();
    for _ in 0..100 {
        if !server.active_requests().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.active_requests().len(), 1);

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("stop should not wait on a stalled body")
        .unwrap();
    assert_eq!(server.state(), ServerState::Idle);

    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    assert!(out.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
    assert!(server.last_error().unwrap().contains("Timed out"));
}

#[tokio::test]
async fn test_server_can_restart() {
    let server = running_server().await;
    server.stop().await.unwrap();
    server.start().await.unwrap();
    let response = reqwest::get(url(&server, "/")).await.unwrap();
    assert_eq!(response.status().as_u16(), 501);
    server.stop().await.unwrap();
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl ServerDelegate for EventLog {
    fn did_start(&self, _root_url: &url::Url) {
        self.push("start");
    }

    fn did_reset(&self) {
        self.push("reset");
    }

    fn did_register(&self, handler: &Arc<dyn Handler>) {
        self.push(format!("register {}", handler.name()));
    }

    fn did_receive(&self, request: &RequestInfo) {
        self.push(format!("receive {}", request.target));
    }

    fn did_complete(&self, _request: &RequestInfo, status: StatusCode) {
        self.push(format!("complete {}", status.as_u16()));
    }

    fn did_stop(&self) {
        self.push("stop");
    }
}

#[tokio::test]
async fn test_delegate_lifecycle() {
    let server = Server::on_port(0);
    let log = Arc::new(EventLog::default());
    server.set_delegate(log.clone());

    server.register_handler(Arc::new(
        FnHandler::any(|_, _| Box::pin(async { Ok(StatusCode::NoContent) })).named("empty"),
    ));
    server.start().await.unwrap();
    let response = reqwest::get(url(&server, "/ping")).await.unwrap();
    assert_eq!(response.status().as_u16(), 204);
    server.stop().await.unwrap();
    server.reset_prototypes();

    let events = log.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "register empty",
            "start",
            "receive /ping",
            "complete 204",
            "stop",
            "reset"
        ]
    );
}

#[tokio::test]
async fn test_stop_on_idle_and_bad_transitions() {
    let server = Server::on_port(0);
    server.stop().await.unwrap();
    server.start().await.unwrap();
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, HttpError::ServerState { .. }));
    server.stop().await.unwrap();
}
