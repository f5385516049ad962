use crate::domain::model::RequestInfo;
use crate::http::{Request, Response, StatusCode};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by closure-based responders.
pub type ResponseFuture<'a> = Pin<Box<dyn Future<Output = Result<StatusCode>> + Send + 'a>>;

/// Services requests for the server.
///
/// The server asks every registered handler, most recently registered first,
/// whether it can handle a request. The first one that answers `true` gets
/// the request and the response stream. Handlers are shared between
/// connections, so per-request state belongs in [`Handler::handle`].
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn can_handle(&self, request: &Request) -> bool;

    /// Services the request and returns its status. If nothing was written,
    /// the server sends that status with an empty body.
    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<StatusCode>;
}

/// Observer for server lifecycle events. Every method defaults to doing nothing.
pub trait ServerDelegate: Send + Sync {
    fn did_start(&self, _root_url: &url::Url) {}

    fn did_reset(&self) {}

    fn did_register(&self, _handler: &Arc<dyn Handler>) {}

    fn did_receive(&self, _request: &RequestInfo) {}

    fn did_complete(&self, _request: &RequestInfo, _status: StatusCode) {}

    fn did_stop(&self) {}
}
