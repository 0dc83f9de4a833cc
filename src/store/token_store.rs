//! Realtime token collection for one signed-in owner.
//!
//! Lifecycle: `Uninitialized` until [`TokenStore::fetch_all`] opens the
//! token-list watch, then `Syncing` until [`TokenStore::reset`].
//!
//! Lock order: a subscription gate (held by the registry while a handler
//! runs) is always taken before the state lock. Nothing here calls into the
//! registry while holding the state lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::broadcast;

use crate::codec;
use crate::errors::{GatewayError, StoreError};
use crate::gateway::RemoteTokenGateway;
use crate::id::generate_token_id;
use crate::models::token::validate_token_name;
use crate::models::{ActionStatus, Notification, Operation, RawRequestGroup, Token, TokenRecord};
use crate::query::{self, Bucket};
use crate::session::SessionStore;
use crate::subscription::SubscriptionRegistry;

/// Registry key of the token-list subscription. Token ids are base-36, so
/// this can never collide with a per-token key.
pub const TOKEN_LIST_KEY: &str = "__tokens__";

const NOTIFICATION_CAPACITY: usize = 64;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Syncing,
}

struct StoreState {
    sync: SyncState,
    owner: Option<String>,
    /// `None` until the first snapshot arrives; distinct from an empty list.
    tokens: Option<Vec<Token>>,
    active: Option<String>,
    /// Ids whose request watch is being opened.
    pending_watches: HashSet<String>,
    /// Ids deleted locally whose removal has not shown up in a snapshot yet.
    deleted: HashSet<String>,
    restore_candidate: Option<String>,
    restored: bool,
    /// Bumped on reset; work started under an older epoch is discarded.
    epoch: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            sync: SyncState::Uninitialized,
            owner: None,
            tokens: None,
            active: None,
            pending_watches: HashSet::new(),
            deleted: HashSet::new(),
            restore_candidate: None,
            restored: false,
            epoch: 0,
        }
    }

    fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.as_ref()?.iter().find(|t| t.id() == id)
    }

    /// A token that may still hold a request subscription.
    fn is_live(&self, id: &str) -> bool {
        !self.deleted.contains(id) && self.token(id).is_some()
    }

    fn token_mut(&mut self, id: &str) -> Option<&mut Token> {
        self.tokens.as_mut()?.iter_mut().find(|t| t.id() == id)
    }
}

struct Inner {
    gateway: Arc<dyn RemoteTokenGateway>,
    registry: SubscriptionRegistry,
    session: Arc<dyn SessionStore>,
    state: RwLock<StoreState>,
    notifications: broadcast::Sender<Notification>,
    ping_base: String,
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notification: Notification) {
        // no receivers is fine
        let _ = self.notifications.send(notification);
    }

    fn is_current(&self, epoch: u64, token_id: &str) -> bool {
        let state = self.read_state();
        state.epoch == epoch && state.is_live(token_id)
    }
}

/// Cheap to clone; clones share the same collection and subscriptions.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl TokenStore {
    pub fn new(
        gateway: Arc<dyn RemoteTokenGateway>,
        session: Arc<dyn SessionStore>,
        ping_base: impl Into<String>,
    ) -> Self {
        Self::with_registry(gateway, session, ping_base, SubscriptionRegistry::new())
    }

    pub fn with_registry(
        gateway: Arc<dyn RemoteTokenGateway>,
        session: Arc<dyn SessionStore>,
        ping_base: impl Into<String>,
        registry: SubscriptionRegistry,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                gateway,
                registry,
                session,
                state: RwLock::new(StoreState::new()),
                notifications,
                ping_base: ping_base.into(),
            }),
        }
    }

    // -- Accessors --

    pub fn state(&self) -> SyncState {
        self.inner.read_state().sync
    }

    pub fn owner(&self) -> Option<String> {
        self.inner.read_state().owner.clone()
    }

    /// Snapshot of the collection; `None` while it is unknown.
    pub fn tokens(&self) -> Option<Vec<Token>> {
        self.inner.read_state().tokens.clone()
    }

    pub fn token(&self, id: &str) -> Option<Token> {
        self.inner.read_state().token(id).cloned()
    }

    pub fn active_token_id(&self) -> Option<String> {
        self.inner.read_state().active.clone()
    }

    pub fn active_token(&self) -> Option<Token> {
        let state = self.inner.read_state();
        let id = state.active.as_deref()?;
        state.token(id).cloned()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Ping URL for `token_id`: `{ping_base}/{token_id}`.
    pub fn ping_url(&self, token_id: &str) -> String {
        format!(
            "{}/{}",
            self.inner.ping_base.trim_end_matches('/'),
            urlencoding::encode(token_id)
        )
    }

    // -- Queries --

    /// Decoded timestamps of a token inside `[start, end]`.
    ///
    /// `None` reads the active token. Unknown tokens yield nothing.
    pub fn time_logs_in_range(&self, token_id: Option<&str>, start: i64, end: i64) -> Vec<i64> {
        let state = self.inner.read_state();
        query::time_logs_in_range(Self::resolve(&state, token_id), start, end)
    }

    pub fn count_in_range(&self, token_id: Option<&str>, start: i64, end: i64) -> usize {
        let state = self.inner.read_state();
        query::count_in_range(Self::resolve(&state, token_id), start, end)
    }

    pub fn histogram(
        &self,
        token_id: Option<&str>,
        start: i64,
        end: i64,
        bucket_ms: i64,
    ) -> Vec<Bucket> {
        let state = self.inner.read_state();
        query::histogram(Self::resolve(&state, token_id), start, end, bucket_ms)
    }

    pub fn total_requests(&self, token_id: Option<&str>) -> u64 {
        let state = self.inner.read_state();
        query::total_requests(Self::resolve(&state, token_id))
    }

    fn resolve<'a>(state: &'a StoreState, token_id: Option<&str>) -> Option<&'a Token> {
        match token_id {
            Some(id) => state.token(id),
            None => state.token(state.active.as_deref()?),
        }
    }

    // -- Sync --

    /// Start syncing the tokens of `owner_id`.
    ///
    /// Switching owners resets first. A watch failure leaves the store
    /// `Uninitialized` and emits an error notification.
    pub async fn fetch_all(&self, owner_id: &str) -> ActionStatus {
        let switching = self
            .inner
            .read_state()
            .owner
            .as_deref()
            .is_some_and(|o| o != owner_id);
        if switching {
            self.reset();
        }

        let marker = self.inner.session.load_active_token();
        let epoch = {
            let mut state = self.inner.write_state();
            if state.sync == SyncState::Syncing {
                return ActionStatus::success("Already syncing tokens");
            }
            state.owner = Some(owner_id.to_string());
            state.restore_candidate = marker;
            state.restored = false;
            state.epoch
        };

        let stream = match self.inner.gateway.watch_tokens(owner_id).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(owner_id, error = %e, "token list watch failed");
                self.inner.notify(Notification::error(
                    Operation::WatchTokens,
                    format!("Couldn't fetch tokens: {}", e),
                ));
                return ActionStatus::failure(format!("Couldn't fetch tokens: {}", e));
            }
        };

        let stale = {
            let mut state = self.inner.write_state();
            let stale = state.epoch != epoch;
            if !stale {
                state.sync = SyncState::Syncing;
            }
            stale
        };
        if stale {
            stream.cancel();
            return ActionStatus::failure("Sync was reset before it started");
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner.registry.open(TOKEN_LIST_KEY, stream, move |event| {
            on_token_list(&weak, epoch, event)
        });
        if self.inner.read_state().epoch != epoch {
            self.inner.registry.close(TOKEN_LIST_KEY);
        }

        tracing::info!(owner_id, "token sync started");
        ActionStatus::success("Syncing tokens")
    }

    /// Drop every subscription and return to the unknown state.
    ///
    /// The persisted session marker is left untouched.
    pub fn reset(&self) {
        {
            let mut state = self.inner.write_state();
            let epoch = state.epoch + 1;
            *state = StoreState::new();
            state.epoch = epoch;
        }
        self.inner.registry.close(TOKEN_LIST_KEY);
        let closed = self.inner.registry.close_all();
        tracing::info!(subscriptions = closed, "token store reset");
    }

    // -- Commands --

    /// Create a token named `name`. On success the message is the new id.
    pub async fn create_token(&self, name: &str) -> ActionStatus {
        match self.try_create(name).await {
            Ok(id) => ActionStatus::success(id),
            Err(e) => self.fail(Operation::Create, e),
        }
    }

    async fn try_create(&self, name: &str) -> Result<String, StoreError> {
        validate_token_name(name).map_err(StoreError::Validation)?;
        let owner = self
            .owner()
            .ok_or_else(|| StoreError::Validation("You must be signed in to create a token".into()))?;

        let id = generate_token_id();
        let url = self.ping_url(&id);
        let short_url = self.shorten_or_fallback(&url).await;

        let record = TokenRecord {
            id: id.clone(),
            name: name.to_string(),
            owner,
            url,
            short_url,
        };
        self.inner.gateway.create_token(&id, record).await?;

        tracing::info!(token_id = %id, name, "token created");
        self.inner.notify(Notification::success(
            Operation::Create,
            format!("Token {} created", name),
        ));
        Ok(id)
    }

    async fn shorten_or_fallback(&self, url: &str) -> String {
        match self.inner.gateway.shorten_url(url).await {
            Ok(short) if !short.trim().is_empty() => short,
            Ok(_) => {
                tracing::debug!(url, "shortener returned nothing, using long url");
                url.to_string()
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "shortener failed, using long url");
                url.to_string()
            }
        }
    }

    pub async fn rename_token(&self, id: &str, new_name: &str) -> ActionStatus {
        match self.try_rename(id, new_name).await {
            Ok(()) => ActionStatus::success(format!("Token renamed to {}", new_name)),
            Err(e) => self.fail(Operation::Rename, e),
        }
    }

    async fn try_rename(&self, id: &str, new_name: &str) -> Result<(), StoreError> {
        validate_token_name(new_name).map_err(StoreError::Validation)?;
        self.require_token(id)?;

        self.inner.gateway.rename_token(id, new_name).await?;

        tracing::info!(token_id = %id, new_name, "token renamed");
        self.inner.notify(Notification::success(
            Operation::Rename,
            format!("Token renamed to {}", new_name),
        ));
        Ok(())
    }

    /// Delete a token. Its request subscription is closed before the remote
    /// delete; a failed delete re-opens it.
    pub async fn delete_token(&self, id: &str) -> ActionStatus {
        match self.try_delete(id).await {
            Ok(name) => ActionStatus::success(format!("Token {} deleted", name)),
            Err(e) => self.fail(Operation::Delete, e),
        }
    }

    async fn try_delete(&self, id: &str) -> Result<String, StoreError> {
        let name = self.require_token(id)?;

        // mark first so a watch still opening closes itself
        let was_active = {
            let mut state = self.inner.write_state();
            state.pending_watches.remove(id);
            state.deleted.insert(id.to_string());
            if state.active.as_deref() == Some(id) {
                state.active = None;
                true
            } else {
                false
            }
        };
        self.inner.registry.close(id);
        if was_active {
            if let Err(e) = self.inner.session.clear_active_token() {
                tracing::warn!(token_id = %id, error = %e, "failed to clear session marker");
            }
        }

        if let Err(e) = self.inner.gateway.delete_token(id).await {
            let epoch = {
                let mut state = self.inner.write_state();
                state.deleted.remove(id);
                state.pending_watches.insert(id.to_string());
                state.epoch
            };
            watch_requests(self.inner.clone(), id.to_string(), epoch).await;
            return Err(e.into());
        }

        tracing::info!(token_id = %id, "token deleted");
        self.inner.notify(Notification::success(
            Operation::Delete,
            format!("Token {} deleted", name),
        ));
        Ok(name)
    }

    /// Point the session at `id`, or clear the pointer with `None`.
    pub fn select_active(&self, id: Option<&str>) -> ActionStatus {
        let Some(id) = id else {
            self.inner.write_state().active = None;
            return ActionStatus::success("No token selected");
        };

        {
            let mut state = self.inner.write_state();
            if state.token(id).is_none() {
                return StoreError::UnknownToken(id.to_string()).into();
            }
            state.active = Some(id.to_string());
        }
        if let Err(e) = self.inner.session.save_active_token(id) {
            tracing::warn!(token_id = %id, error = %e, "failed to persist session marker");
        }
        ActionStatus::success(format!("Token {} selected", id))
    }

    /// Hand `id` over to the account registered under `new_owner_email`.
    ///
    /// The gateway's answer is returned as is.
    pub async fn transfer_ownership(&self, id: &str, new_owner_email: &str) -> ActionStatus {
        if let Err(e) = self.require_token(id) {
            return e.into();
        }
        let email = new_owner_email.trim();
        if !EMAIL_REGEX.is_match(email) {
            return StoreError::Validation(format!("{} is not a valid email address", email)).into();
        }

        match self.inner.gateway.transfer_ownership(id, email).await {
            Ok(status) => {
                let message = status.message.clone().unwrap_or_default();
                if status.is_successful {
                    tracing::info!(token_id = %id, "ownership transferred");
                    self.inner.notify(Notification::success(Operation::Transfer, message));
                } else {
                    tracing::info!(token_id = %id, message = %message, "ownership transfer refused");
                    self.inner.notify(Notification::error(Operation::Transfer, message));
                }
                status
            }
            Err(e) => self.fail(Operation::Transfer, e.into()),
        }
    }

    fn require_token(&self, id: &str) -> Result<String, StoreError> {
        self.inner
            .read_state()
            .token(id)
            .map(|t| t.name().to_string())
            .ok_or_else(|| StoreError::UnknownToken(id.to_string()))
    }

    fn fail(&self, operation: Operation, e: StoreError) -> ActionStatus {
        if e.is_validation() {
            tracing::debug!(%operation, error = %e, "command rejected");
        } else {
            tracing::warn!(%operation, error = %e, "command failed");
            self.inner.notify(Notification::error(
                operation,
                format!("Couldn't {}: {}", operation, e),
            ));
        }
        e.into()
    }
}

// -- Subscription handlers --

fn on_token_list(
    weak: &Weak<Inner>,
    epoch: u64,
    event: Result<Vec<TokenRecord>, GatewayError>,
) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let records = match event {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "token list snapshot failed");
            inner.notify(Notification::error(
                Operation::WatchTokens,
                format!("Couldn't fetch tokens: {}", e),
            ));
            return;
        }
    };

    let (removed, added) = {
        let mut state = inner.write_state();
        if state.epoch != epoch {
            return;
        }

        let mut previous: HashMap<String, Token> = state
            .tokens
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|t| (t.record.id.clone(), t))
            .collect();

        let mut seen = HashSet::new();
        let mut tokens = Vec::with_capacity(records.len());
        let mut added = Vec::new();
        for record in records {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            match previous.remove(&record.id) {
                Some(mut existing) => {
                    existing.record = record;
                    tokens.push(existing);
                }
                None => {
                    if state.pending_watches.insert(record.id.clone()) {
                        added.push(record.id.clone());
                    }
                    tokens.push(Token::new(record));
                }
            }
        }

        let removed: Vec<String> = previous.into_keys().collect();
        for id in &removed {
            state.pending_watches.remove(id);
            state.deleted.remove(id);
        }

        if let Some(active) = state.active.clone() {
            if !seen.contains(&active) {
                tracing::debug!(token_id = %active, "active token vanished");
                state.active = None;
            }
        }
        if !state.restored {
            state.restored = true;
            if state.active.is_none() {
                if let Some(candidate) = state.restore_candidate.take() {
                    if seen.contains(&candidate) {
                        tracing::debug!(token_id = %candidate, "restored active token");
                        state.active = Some(candidate);
                    }
                }
            }
        }

        state.tokens = Some(tokens);
        (removed, added)
    };

    for id in &removed {
        inner.registry.close(id);
    }
    for id in added {
        tokio::spawn(watch_requests(inner.clone(), id, epoch));
    }
}

/// Open the request-group watch of one token. The caller has marked `token_id`
/// as pending.
async fn watch_requests(inner: Arc<Inner>, token_id: String, epoch: u64) {
    let result = inner.gateway.watch_token_requests(&token_id).await;

    let name = {
        let mut state = inner.write_state();
        state.pending_watches.remove(&token_id);
        if state.epoch == epoch && state.is_live(&token_id) {
            state.token(&token_id).map(|t| t.name().to_string())
        } else {
            None
        }
    };

    let stream = match (result, name) {
        (Ok(stream), Some(_)) => stream,
        (Ok(stream), None) => {
            stream.cancel();
            return;
        }
        (Err(e), Some(name)) => {
            tracing::warn!(token_id = %token_id, error = %e, "request watch failed");
            inner.notify(Notification::error(
                Operation::WatchRequests,
                format!("Couldn't fetch requests for token: {}", name),
            ));
            return;
        }
        (Err(_), None) => return,
    };

    let weak = Arc::downgrade(&inner);
    let id = token_id.clone();
    inner.registry.open(token_id.clone(), stream, move |event| {
        on_token_requests(&weak, epoch, &id, event)
    });

    // deleted or reset while the watch was opening
    if !inner.is_current(epoch, &token_id) {
        inner.registry.close(&token_id);
    }
}

fn on_token_requests(
    weak: &Weak<Inner>,
    epoch: u64,
    token_id: &str,
    event: Result<Vec<RawRequestGroup>, GatewayError>,
) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    match event {
        Ok(raw) => {
            let groups = codec::decode_all(raw);
            let mut state = inner.write_state();
            if state.epoch != epoch {
                return;
            }
            match state.token_mut(token_id) {
                Some(token) => token.token_requests = groups,
                None => tracing::debug!(token_id, "request snapshot for unknown token dropped"),
            }
        }
        Err(e) => {
            tracing::warn!(token_id, error = %e, "request snapshot failed");
            let name = inner
                .read_state()
                .token(token_id)
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| token_id.to_string());
            inner.notify(Notification::error(
                Operation::WatchRequests,
                format!("Couldn't fetch requests for token: {}", name),
            ));
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
