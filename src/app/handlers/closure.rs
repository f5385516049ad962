use crate::domain::ports::{Handler, ResponseFuture};
use crate::http::{Request, Response, StatusCode};
use crate::utils::error::Result;
use async_trait::async_trait;

type RequestFn = dyn Fn(&Request) -> bool + Send + Sync;
type ResponseFn = dyn for<'a> Fn(&'a mut Request, &'a mut Response) -> ResponseFuture<'a> + Send + Sync;

/// Handler built from a predicate and an async responder.
///
/// ```ignore
/// let hello = FnHandler::new(
///     |req| req.path() == "/hello",
///     |_req, res| Box::pin(async move {
///         res.send_text(StatusCode::Ok, "text/plain", "hi").await?;
///         Ok(StatusCode::Ok)
///     }),
/// );
/// ```
pub struct FnHandler {
    name: String,
    request_fn: Box<RequestFn>,
    response_fn: Box<ResponseFn>,
}

impl FnHandler {
    pub fn new<P, F>(request_fn: P, response_fn: F) -> Self
    where
        P: Fn(&Request) -> bool + Send + Sync + 'static,
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> ResponseFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: "closure".to_string(),
            request_fn: Box::new(request_fn),
            response_fn: Box::new(response_fn),
        }
    }

    /// A responder for every request.
    pub fn any<F>(response_fn: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> ResponseFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        Self::new(|_| true, response_fn)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, request: &Request) -> bool {
        (self.request_fn)(request)
    }

    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<StatusCode> {
        (self.response_fn)(request, response).await
    }
}
