use async_trait::async_trait;

use crate::http::request::Request;
use crate::http::response::Response;

/// Something that can answer a request.
///
/// A handler gets the parsed request (body included) and sole access to the
/// connection's output. It is responsible for writing a complete, valid
/// response. Returning an error or panicking closes the connection; neither
/// affects other connections.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&self, request: &mut Request, response: &mut Response<'_>) -> anyhow::Result<()>;
}
