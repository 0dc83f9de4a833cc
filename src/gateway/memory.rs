//! In-process document store implementing [`RemoteTokenGateway`].
//!
//! Mirrors the remote layout: one collection of token root records and, per
//! token, a sub-collection of request groups. Every mutation bumps a version
//! counter on a `watch` channel; each open realtime query re-reads its filtered
//! snapshot on every bump, so watchers always receive full snapshots.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::{ChangeStream, RemoteTokenGateway, ShortenerClient, TransferClient};
use crate::errors::GatewayError;
use crate::models::{ActionStatus, RawRequestGroup, TokenRecord};

/// Default request-group bucket width: one hour.
pub const DEFAULT_BUCKET_MS: i64 = 3_600_000;

struct Documents {
    tokens: DashMap<String, TokenRecord>,
    /// Request groups keyed by parent token id.
    requests: DashMap<String, Vec<RawRequestGroup>>,
    /// Email → user id, used when no transfer endpoint is configured.
    users: DashMap<String, String>,
    version: watch::Sender<u64>,
    offline: AtomicBool,
    open_streams: AtomicUsize,
    calls: DashMap<&'static str, usize>,
}

impl Documents {
    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn count(&self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(GatewayError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn tokens_of(&self, owner_id: &str) -> Vec<TokenRecord> {
        let mut tokens: Vec<TokenRecord> = self
            .tokens
            .iter()
            .filter(|t| t.owner == owner_id)
            .map(|t| t.value().clone())
            .collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        tokens
    }

    fn requests_of(&self, token_id: &str) -> Vec<RawRequestGroup> {
        self.requests
            .get(token_id)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|g| g.token_id == token_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct InMemoryGateway {
    docs: Arc<Documents>,
    bucket_ms: i64,
    shortener: Option<ShortenerClient>,
    transfer: Option<TransferClient>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            docs: Arc::new(Documents {
                tokens: DashMap::new(),
                requests: DashMap::new(),
                users: DashMap::new(),
                version,
                offline: AtomicBool::new(false),
                open_streams: AtomicUsize::new(0),
                calls: DashMap::new(),
            }),
            bucket_ms: DEFAULT_BUCKET_MS,
            shortener: None,
            transfer: None,
        }
    }

    pub fn with_bucket_ms(mut self, bucket_ms: i64) -> Self {
        self.bucket_ms = bucket_ms.max(1);
        self
    }

    pub fn with_shortener(mut self, shortener: ShortenerClient) -> Self {
        self.shortener = Some(shortener);
        self
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Make every call fail with [`GatewayError::Unavailable`]. Open watches
    /// receive an error event.
    pub fn set_offline(&self, offline: bool) {
        self.docs.offline.store(offline, Ordering::SeqCst);
        self.docs.bump();
    }

    /// Known account for locally emulated ownership transfers.
    pub fn register_user(&self, email: &str, user_id: &str) {
        self.docs
            .users
            .insert(email.to_lowercase(), user_id.to_string());
    }

    /// Record one pixel hit at `at_millis`, the way the ping endpoint does:
    /// find the UTC-aligned bucket, append the offset, bump the count.
    pub fn record_hit(&self, token_id: &str, at_millis: i64) -> Result<(), GatewayError> {
        self.docs.check_online()?;
        if !self.docs.tokens.contains_key(token_id) {
            return Err(GatewayError::NotFound(token_id.to_string()));
        }

        let group_id = at_millis - at_millis.rem_euclid(self.bucket_ms);
        let offset = at_millis - group_id;
        {
            let mut groups = self.docs.requests.entry(token_id.to_string()).or_default();
            match groups.iter_mut().find(|g| g.group_id == group_id) {
                Some(group) => {
                    group.time_logs.push(offset);
                    group.request_count += 1;
                }
                None => groups.push(RawRequestGroup {
                    group_id,
                    request_count: 1,
                    token_id: token_id.to_string(),
                    time_logs: vec![offset],
                }),
            }
        }
        self.docs.bump();
        Ok(())
    }

    /// Insert or replace (by `group_id`) a raw request group.
    pub fn put_request_group(&self, group: RawRequestGroup) {
        {
            let mut groups = self.docs.requests.entry(group.token_id.clone()).or_default();
            match groups.iter_mut().find(|g| g.group_id == group.group_id) {
                Some(existing) => *existing = group,
                None => groups.push(group),
            }
        }
        self.docs.bump();
    }

    pub fn token(&self, id: &str) -> Option<TokenRecord> {
        self.docs.tokens.get(id).map(|t| t.value().clone())
    }

    /// Number of realtime queries whose teardown has not run yet.
    pub fn open_streams(&self) -> usize {
        self.docs.open_streams.load(Ordering::SeqCst)
    }

    /// How many times the named operation was invoked.
    pub fn calls(&self, op: &str) -> usize {
        self.docs.calls.get(op).map(|c| *c).unwrap_or(0)
    }

    fn snapshot_stream<T, F>(&self, read: F) -> ChangeStream<T>
    where
        T: Send + 'static,
        F: Fn(&Documents) -> T + Send + 'static,
    {
        let docs = self.docs.clone();
        let events = WatchStream::new(self.docs.version.subscribe()).map(move |_| -> Result<T, GatewayError> {
            docs.check_online()?;
            Ok(read(&docs))
        });

        self.docs.open_streams.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.clone();
        ChangeStream::new(events).with_teardown(move || {
            docs.open_streams.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[async_trait]
impl RemoteTokenGateway for InMemoryGateway {
    async fn watch_tokens(
        &self,
        owner_id: &str,
    ) -> Result<ChangeStream<Vec<TokenRecord>>, GatewayError> {
        self.docs.count("watch_tokens");
        self.docs.check_online()?;
        let owner = owner_id.to_string();
        Ok(self.snapshot_stream(move |docs| docs.tokens_of(&owner)))
    }

    async fn watch_token_requests(
        &self,
        token_id: &str,
    ) -> Result<ChangeStream<Vec<RawRequestGroup>>, GatewayError> {
        self.docs.count("watch_token_requests");
        self.docs.check_online()?;
        let token_id = token_id.to_string();
        Ok(self.snapshot_stream(move |docs| docs.requests_of(&token_id)))
    }

    async fn create_token(&self, id: &str, record: TokenRecord) -> Result<(), GatewayError> {
        self.docs.count("create_token");
        self.docs.check_online()?;
        // a colliding id overwrites the existing document
        self.docs.tokens.insert(id.to_string(), record);
        self.docs.bump();
        Ok(())
    }

    async fn rename_token(&self, id: &str, new_name: &str) -> Result<(), GatewayError> {
        self.docs.count("rename_token");
        self.docs.check_online()?;
        {
            let mut token = self
                .docs
                .tokens
                .get_mut(id)
                .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
            token.name = new_name.to_string();
        }
        self.docs.bump();
        Ok(())
    }

    async fn delete_token(&self, id: &str) -> Result<(), GatewayError> {
        self.docs.count("delete_token");
        self.docs.check_online()?;
        self.docs.tokens.remove(id);
        self.docs.requests.remove(id);
        self.docs.bump();
        Ok(())
    }

    async fn shorten_url(&self, long_url: &str) -> Result<String, GatewayError> {
        self.docs.count("shorten_url");
        match &self.shortener {
            Some(client) => client.shorten(long_url).await,
            None => Err(GatewayError::Rejected("no url shortener configured".into())),
        }
    }

    async fn transfer_ownership(
        &self,
        token_id: &str,
        new_owner_email: &str,
    ) -> Result<ActionStatus, GatewayError> {
        self.docs.count("transfer_ownership");
        if let Some(client) = &self.transfer {
            return client.transfer(token_id, new_owner_email).await;
        }
        self.docs.check_online()?;

        let Some(new_owner) = self
            .docs
            .users
            .get(&new_owner_email.to_lowercase())
            .map(|u| u.value().clone())
        else {
            return Ok(ActionStatus::failure(format!(
                "No user found with email {}",
                new_owner_email
            )));
        };

        {
            let Some(mut token) = self.docs.tokens.get_mut(token_id) else {
                return Ok(ActionStatus::failure(format!(
                    "Token {} does not exist",
                    token_id
                )));
            };
            token.owner = new_owner;
        }
        self.docs.bump();
        Ok(ActionStatus::success(format!(
            "Token transferred to {}",
            new_owner_email
        )))
    }
}

// ── Tests ──────────────────────────────────────────────────────
