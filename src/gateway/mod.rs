//! Remote token gateway: the capability surface the core consumes.
//!
//! The remote document store, the URL shortener and the ownership-transfer
//! endpoint are external systems. The core only sees them through
//! [`RemoteTokenGateway`]; realtime queries come back as a [`ChangeStream`]
//! of full snapshots that the caller owns and can tear down.

pub mod memory;
pub mod shortener;
pub mod transfer;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::errors::GatewayError;
use crate::models::{ActionStatus, RawRequestGroup, TokenRecord};

pub use memory::InMemoryGateway;
pub use shortener::ShortenerClient;
pub use transfer::{AuthTokenProvider, StaticAuthToken, TransferClient};

/// Releases the remote side of a realtime query. May fail; callers treat
/// that as best-effort cleanup.
pub type Teardown = Box<dyn FnOnce() -> Result<(), GatewayError> + Send + Sync + 'static>;

/// A lazy stream of snapshot events plus its remote teardown.
pub struct ChangeStream<T> {
    events: BoxStream<'static, Result<T, GatewayError>>,
    teardown: Option<Teardown>,
}

impl<T> ChangeStream<T> {
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Result<T, GatewayError>> + Send + 'static,
    {
        Self {
            events: events.boxed(),
            teardown: None,
        }
    }

    pub fn with_teardown<F>(mut self, teardown: F) -> Self
    where
        F: FnOnce() -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub fn into_parts(
        self,
    ) -> (
        BoxStream<'static, Result<T, GatewayError>>,
        Option<Teardown>,
    ) {
        (self.events, self.teardown)
    }

    /// Drop the stream without consuming it, running its teardown.
    pub fn cancel(self) {
        if let Some(teardown) = self.teardown {
            if let Err(e) = teardown() {
                tracing::warn!(error = %e, "change stream teardown failed");
            }
        }
    }
}

/// Everything the core needs from the remote side.
#[async_trait]
pub trait RemoteTokenGateway: Send + Sync {
    /// Full-collection snapshots of the tokens owned by `owner_id`.
    async fn watch_tokens(
        &self,
        owner_id: &str,
    ) -> Result<ChangeStream<Vec<TokenRecord>>, GatewayError>;

    /// Snapshots of the raw request groups of one token.
    async fn watch_token_requests(
        &self,
        token_id: &str,
    ) -> Result<ChangeStream<Vec<RawRequestGroup>>, GatewayError>;

    async fn create_token(&self, id: &str, record: TokenRecord) -> Result<(), GatewayError>;

    async fn rename_token(&self, id: &str, new_name: &str) -> Result<(), GatewayError>;

    async fn delete_token(&self, id: &str) -> Result<(), GatewayError>;

    /// Best-effort URL shortening. The core falls back to `long_url` on error.
    async fn shorten_url(&self, long_url: &str) -> Result<String, GatewayError>;

    /// Authorized ownership transfer; a single request/response.
    async fn transfer_ownership(
        &self,
        token_id: &str,
        new_owner_email: &str,
    ) -> Result<ActionStatus, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_change_stream_yields_events() {
        let stream = ChangeStream::new(futures::stream::iter(vec![Ok::<_, GatewayError>(1), Ok(2)]));
        let (events, teardown) = stream.into_parts();
        let items: Vec<i32> = events.map(|e| e.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2]);
        assert!(teardown.is_none());
    }

    #[test]
    fn test_cancel_runs_teardown_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = ChangeStream::new(futures::stream::empty::<Result<(), GatewayError>>())
            .with_teardown(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        stream.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_swallows_teardown_error() {
        let stream = ChangeStream::new(futures::stream::empty::<Result<(), GatewayError>>())
            .with_teardown(|| Err(GatewayError::Teardown("socket gone".into())));
        stream.cancel();
    }
}
