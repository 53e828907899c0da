//! Application callbacks.

use async_trait::async_trait;
use std::future::Future;

use reqres_core::ClientId;

use crate::error::Result;
use crate::exchange::{Request, Responder};

/// Handles inbound requests.
///
/// Invoked once per fully received request. Errors are logged; they are
/// not sent to the requester, which will time out waiting for a response.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request, responder: Responder) -> Result<()>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, request: Request, responder: Responder) -> Result<()> {
        (self)(request, responder).await
    }
}

/// Resolves the shared secret for a peer.
///
/// Consulted lazily, at most once per connection record; the result is
/// kept on the record.
#[async_trait]
pub trait SecretResolver: Send + Sync + 'static {
    async fn resolve(&self, peer: &ClientId) -> Option<String>;
}

#[async_trait]
impl<F, Fut> SecretResolver for F
where
    F: Fn(ClientId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    async fn resolve(&self, peer: &ClientId) -> Option<String> {
        (self)(peer.clone()).await
    }
}
