use crate::domain::ports::Handler;
use crate::http::{Request, Response, StatusCode};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Answers every request with `501 Not Implemented`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotImplementedHandler;

#[async_trait]
impl Handler for NotImplementedHandler {
    fn name(&self) -> &str {
        "not-implemented"
    }

    fn can_handle(&self, _request: &Request) -> bool {
        true
    }

    async fn handle(&self, _request: &mut Request, response: &mut Response) -> Result<StatusCode> {
        response.send_error(StatusCode::NotImplemented).await?;
        Ok(StatusCode::NotImplemented)
    }
}
