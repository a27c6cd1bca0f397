// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Keeps viewing sessions current.
//!
//! Every session runs two tasks for its identity: a listener on the user's
//! change events and a backfill poller. Both are torn down and recreated
//! together when the identity changes. Backfill syncs go through a
//! per-account in-flight guard, and transient failures push the account into
//! an exponential backoff window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use super::events::{ChangeEvent, ChangeKind, ChangeTable, EventBus, Subscription};
use super::outbox::{OptimisticOutbox, PendingItem};
use super::send::{SendRequest, SendResult};
use super::sync::{SyncEngine, SyncError, SyncReport};
use crate::config::SyncConfig;
use crate::error::{user_hint, ErrorClass};
use crate::store::{Store, StoreError};

/// Window for the catch-up sync run when a session becomes visible.
pub const VISIBLE_SYNC_WINDOW: u32 = 5;
const SINK_CAPACITY: usize = 100;

/// Seam between the coordinator and the sync engine.
#[async_trait]
pub trait AccountSyncer: Send + Sync {
    async fn sync_account(&self, user_id: &str, account_id: &str, window: u32) -> Result<SyncReport, SyncError>;
}

#[async_trait]
impl AccountSyncer for SyncEngine {
    async fn sync_account(&self, user_id: &str, account_id: &str, window: u32) -> Result<SyncReport, SyncError> {
        SyncEngine::sync_account(self, user_id, account_id, window).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountSyncState {
    pub in_flight: bool,
    pub backoff_until: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("a sync for this account is already running")]
    InFlight,
    #[error("account is backing off until {until}")]
    BackingOff { until: DateTime<Utc> },
}

#[derive(Error, Debug)]
pub enum GuardedSyncError {
    #[error("{0}")]
    Skipped(SkipReason),
    #[error("{0}")]
    Sync(SyncError),
}

/// Delay before the next attempt after `failures` consecutive transient failures.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    Idle,
    Subscribed,
    Synced,
    Degraded,
}

/// The thread a session currently has open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    pub thread_id: Option<String>,
    pub lead_id: Option<String>,
}

impl ThreadRef {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let same = |a: &Option<String>, b: &Option<String>| matches!((a, b), (Some(a), Some(b)) if a == b);
        same(&self.thread_id, &event.thread_id) || same(&self.lead_id, &event.lead_id)
    }
}

/// What a session is told to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewUpdate {
    State {
        state: ViewState,
    },
    RefreshList {
        table: ChangeTable,
        record_id: String,
    },
    RefreshThread {
        thread_id: Option<String>,
        lead_id: Option<String>,
    },
    SyncFailed {
        account_id: String,
        message: String,
        hint: &'static str,
        retry_at: Option<DateTime<Utc>>,
    },
    Outbox {
        item: PendingItem,
    },
}

impl ViewUpdate {
    pub fn event_name(&self) -> &'static str {
        match self {
            ViewUpdate::State { .. } => "state",
            ViewUpdate::RefreshList { .. } => "refresh_list",
            ViewUpdate::RefreshThread { .. } => "refresh_thread",
            ViewUpdate::SyncFailed { .. } => "sync_failed",
            ViewUpdate::Outbox { .. } => "outbox",
        }
    }
}

struct SessionShared {
    id: String,
    identity: RwLock<SessionIdentity>,
    visible: AtomicBool,
    open_thread: RwLock<Option<ThreadRef>>,
    state: RwLock<ViewState>,
    subscription_id: Mutex<Option<String>>,
    outbox: Mutex<OptimisticOutbox>,
    wake: Notify,
    sink: mpsc::Sender<ViewUpdate>,
}

impl SessionShared {
    async fn emit(&self, update: ViewUpdate) -> bool {
        self.sink.send(update).await.is_ok()
    }

    async fn set_state(&self, state: ViewState) -> bool {
        let mut current = self.state.write().await;
        if *current == state {
            return true;
        }
        *current = state;
        drop(current);
        self.emit(ViewUpdate::State { state }).await
    }
}

struct SessionEntry {
    shared: Arc<SessionShared>,
    poller: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl SessionEntry {
    fn abort(&self) {
        self.poller.abort();
        self.listener.abort();
    }
}

struct Inner {
    store: Store,
    events: EventBus,
    syncer: Arc<dyn AccountSyncer>,
    config: SyncConfig,
    accounts: DashMap<String, AccountSyncState>,
    sessions: DashMap<String, SessionEntry>,
}

/// Clears the in-flight flag however the sync future ends.
struct InFlightGuard<'a> {
    accounts: &'a DashMap<String, AccountSyncState>,
    account_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.accounts.get_mut(&self.account_id) {
            state.in_flight = false;
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(store: Store, events: EventBus, syncer: Arc<dyn AccountSyncer>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                events,
                syncer,
                config,
                accounts: DashMap::new(),
                sessions: DashMap::new(),
            }),
        }
    }

    pub fn account_state(&self, account_id: &str) -> Option<AccountSyncState> {
        self.inner.accounts.get(account_id).map(|s| s.clone())
    }

    /// Runs one guarded sync. Manual syncs pass `respect_backoff = false`.
    pub async fn run_sync(
        &self,
        user_id: &str,
        account_id: &str,
        window: u32,
        respect_backoff: bool,
    ) -> Result<SyncReport, GuardedSyncError> {
        self.inner.run_sync(user_id, account_id, window, respect_backoff).await
    }

    /// Backfill over every active account of the user.
    pub async fn sync_user(
        &self,
        user_id: &str,
        window: u32,
    ) -> Result<Vec<(String, Result<SyncReport, GuardedSyncError>)>, StoreError> {
        self.inner.sync_user(user_id, window).await
    }

    /// Opens a viewing session and returns its id with the update stream.
    pub async fn open_session(&self, identity: SessionIdentity) -> (String, mpsc::Receiver<ViewUpdate>) {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let shared = Arc::new(SessionShared {
            id: Uuid::new_v4().to_string(),
            identity: RwLock::new(identity),
            visible: AtomicBool::new(true),
            open_thread: RwLock::new(None),
            state: RwLock::new(ViewState::Idle),
            subscription_id: Mutex::new(None),
            outbox: Mutex::new(OptimisticOutbox::new()),
            wake: Notify::new(),
            sink: tx,
        });
        let id = shared.id.clone();
        let (poller, listener) = Inner::start_tasks(&self.inner, &shared).await;
        self.inner.sessions.insert(id.clone(), SessionEntry { shared, poller, listener });
        info!("Viewing session {} opened", id);
        (id, rx)
    }

    pub async fn session_identity(&self, session_id: &str) -> Option<SessionIdentity> {
        let shared = self.shared(session_id)?;
        let identity = shared.identity.read().await.clone();
        Some(identity)
    }

    pub async fn session_state(&self, session_id: &str) -> Option<ViewState> {
        let shared = self.shared(session_id)?;
        let state = *shared.state.read().await;
        Some(state)
    }

    pub async fn close_session(&self, session_id: &str) {
        if let Some((_, entry)) = self.inner.sessions.remove(session_id) {
            entry.abort();
            if let Some(sub) = entry.shared.subscription_id.lock().await.take() {
                self.inner.events.unsubscribe(&sub).await;
            }
            info!("Viewing session {} closed", session_id);
        }
    }

    /// Becoming visible checks the subscription, re-subscribing if it died, and
    /// wakes the poller for one immediate light sync.
    pub async fn set_visible(&self, session_id: &str, visible: bool) -> bool {
        let Some(shared) = self.shared(session_id) else {
            return false;
        };
        let was_visible = shared.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            let alive = match shared.subscription_id.lock().await.as_deref() {
                Some(id) => self.inner.events.is_alive(id).await,
                None => false,
            };
            if !alive {
                warn!("Subscription for session {} is dead, re-subscribing", session_id);
                let user_id = shared.identity.read().await.user_id.clone();
                let listener = Inner::start_listener(&self.inner, &shared, &user_id).await;
                if let Some(mut entry) = self.inner.sessions.get_mut(session_id) {
                    entry.listener.abort();
                    entry.listener = listener;
                }
            }
            shared.wake.notify_one();
        }
        true
    }

    pub async fn set_open_thread(&self, session_id: &str, thread: Option<ThreadRef>) -> bool {
        let Some(shared) = self.shared(session_id) else {
            return false;
        };
        *shared.open_thread.write().await = thread;
        true
    }

    /// Tears down both tasks and starts them again for the new identity.
    pub async fn change_identity(&self, session_id: &str, identity: SessionIdentity) -> bool {
        let Some(shared) = self.shared(session_id) else {
            return false;
        };
        if *shared.identity.read().await == identity {
            return true;
        }

        if let Some(entry) = self.inner.sessions.get(session_id) {
            entry.abort();
        }
        if let Some(sub) = shared.subscription_id.lock().await.take() {
            self.inner.events.unsubscribe(&sub).await;
        }
        info!("Session {} switching to user {}", session_id, identity.user_id);
        *shared.identity.write().await = identity;
        *shared.open_thread.write().await = None;
        *shared.outbox.lock().await = OptimisticOutbox::new();
        *shared.state.write().await = ViewState::Idle;

        let (poller, listener) = Inner::start_tasks(&self.inner, &shared).await;
        if let Some(mut entry) = self.inner.sessions.get_mut(session_id) {
            entry.poller = poller;
            entry.listener = listener;
        }
        true
    }

    /// Shows a send optimistically in the session before the provider answers.
    pub async fn begin_send(&self, session_id: &str, request: &SendRequest) -> Option<PendingItem> {
        let shared = self.shared(session_id)?;
        let item = shared.outbox.lock().await.enqueue(
            request.thread_id.clone(),
            &request.to,
            &request.subject,
            &request.html_body,
        );
        shared.emit(ViewUpdate::Outbox { item: item.clone() }).await;
        Some(item)
    }

    pub async fn complete_send(&self, session_id: &str, local_id: &str, outcome: Result<&SendResult, &str>) {
        let Some(shared) = self.shared(session_id) else {
            return;
        };
        let updated = {
            let mut outbox = shared.outbox.lock().await;
            match outcome {
                Ok(result) => outbox.commit(local_id, result),
                Err(reason) => outbox.reject(local_id, reason),
            }
        };
        if let Some(item) = updated {
            shared.emit(ViewUpdate::Outbox { item }).await;
        }
    }

    pub async fn pending_for_thread(&self, session_id: &str, thread_id: Option<&str>) -> Vec<PendingItem> {
        match self.shared(session_id) {
            Some(shared) => shared.outbox.lock().await.for_thread(thread_id),
            None => Vec::new(),
        }
    }

    pub async fn dismiss_pending(&self, session_id: &str, local_id: &str) -> bool {
        match self.shared(session_id) {
            Some(shared) => shared.outbox.lock().await.dismiss(local_id),
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    fn shared(&self, session_id: &str) -> Option<Arc<SessionShared>> {
        self.inner.sessions.get(session_id).map(|e| e.shared.clone())
    }
}

impl Inner {
    fn try_begin(&self, account_id: &str, now: DateTime<Utc>, respect_backoff: bool) -> Result<(), SkipReason> {
        let mut state = self.accounts.entry(account_id.to_string()).or_default();
        if state.in_flight {
            return Err(SkipReason::InFlight);
        }
        if respect_backoff {
            if let Some(until) = state.backoff_until.filter(|until| *until > now) {
                return Err(SkipReason::BackingOff { until });
            }
        }
        state.in_flight = true;
        Ok(())
    }

    fn record_outcome(&self, account_id: &str, result: &Result<SyncReport, SyncError>, now: DateTime<Utc>) {
        let Some(mut state) = self.accounts.get_mut(account_id) else {
            return;
        };
        match result {
            Ok(_) => {
                state.consecutive_failures = 0;
                state.backoff_until = None;
                state.last_error = None;
            }
            Err(e) if e.is_transient() => {
                state.consecutive_failures += 1;
                let delay = backoff_delay(
                    self.config.backoff_base(),
                    self.config.backoff_max(),
                    state.consecutive_failures,
                );
                let until = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                state.backoff_until = Some(until);
                state.last_error = Some(e.to_string());
                warn!(
                    "Account {} failed {} time(s) in a row, backing off until {}",
                    account_id, state.consecutive_failures, until
                );
            }
            Err(e) => {
                state.backoff_until = None;
                state.last_error = Some(e.to_string());
            }
        }
    }

    async fn run_sync(
        &self,
        user_id: &str,
        account_id: &str,
        window: u32,
        respect_backoff: bool,
    ) -> Result<SyncReport, GuardedSyncError> {
        self.try_begin(account_id, Utc::now(), respect_backoff)
            .map_err(GuardedSyncError::Skipped)?;
        let _guard = InFlightGuard {
            accounts: &self.accounts,
            account_id: account_id.to_string(),
        };

        let result = self.syncer.sync_account(user_id, account_id, window).await;
        self.record_outcome(account_id, &result, Utc::now());
        result.map_err(GuardedSyncError::Sync)
    }

    async fn sync_user(
        &self,
        user_id: &str,
        window: u32,
    ) -> Result<Vec<(String, Result<SyncReport, GuardedSyncError>)>, StoreError> {
        let accounts = self.store.accounts().list_active_for_user(user_id).await?;
        let mut outcomes = Vec::with_capacity(accounts.len());
        for account in accounts {
            let outcome = self.run_sync(user_id, &account.id, window, true).await;
            outcomes.push((account.id, outcome));
        }
        Ok(outcomes)
    }

    async fn start_tasks(inner: &Arc<Inner>, shared: &Arc<SessionShared>) -> (JoinHandle<()>, JoinHandle<()>) {
        let user_id = shared.identity.read().await.user_id.clone();
        let listener = Self::start_listener(inner, shared, &user_id).await;
        shared.set_state(ViewState::Subscribed).await;
        let poller = tokio::spawn(run_poller(inner.clone(), shared.clone(), user_id));
        (poller, listener)
    }

    async fn start_listener(inner: &Arc<Inner>, shared: &Arc<SessionShared>, user_id: &str) -> JoinHandle<()> {
        let subscription = inner.events.subscribe(user_id).await;
        if let Some(old) = shared
            .subscription_id
            .lock()
            .await
            .replace(subscription.id().to_string())
        {
            inner.events.unsubscribe(&old).await;
        }
        tokio::spawn(run_listener(inner.clone(), shared.clone(), subscription))
    }
}

async fn run_listener(inner: Arc<Inner>, shared: Arc<SessionShared>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        if event.table == ChangeTable::OutboundRecords && event.kind == ChangeKind::Insert {
            match inner.store.messages().get_outbound(&event.record_id).await {
                Ok(Some(record)) => {
                    if let Some(provider_id) = record.provider_message_id {
                        shared.outbox.lock().await.settle(&provider_id);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Could not load sent record {}: {}", event.record_id, e),
            }
        }

        let refresh = ViewUpdate::RefreshList {
            table: event.table,
            record_id: event.record_id.clone(),
        };
        if !shared.emit(refresh).await {
            break;
        }

        let open = shared.open_thread.read().await.clone();
        if let Some(thread) = open.filter(|t| t.matches(&event)) {
            if event.kind == ChangeKind::Insert {
                time::sleep(inner.config.insert_grace()).await;
            }
            let update = ViewUpdate::RefreshThread {
                thread_id: thread.thread_id,
                lead_id: thread.lead_id,
            };
            if !shared.emit(update).await {
                break;
            }
        }
    }
    debug!("Listener for session {} stopped", shared.id);
    inner.events.unsubscribe(subscription.id()).await;
}

async fn run_poller(inner: Arc<Inner>, shared: Arc<SessionShared>, user_id: String) {
    let mut interval = time::interval(inner.config.poll_interval().max(Duration::from_secs(1)));
    interval.tick().await;

    loop {
        let immediate = tokio::select! {
            _ = interval.tick() => false,
            _ = shared.wake.notified() => true,
        };
        if shared.sink.is_closed() {
            break;
        }
        if !shared.visible.load(Ordering::SeqCst) {
            continue;
        }

        let window = if immediate {
            VISIBLE_SYNC_WINDOW
        } else {
            inner.config.default_window
        };
        let outcomes = match inner.sync_user(&user_id, window).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!("Backfill for user {} could not list accounts: {}", user_id, e);
                shared.set_state(ViewState::Degraded).await;
                continue;
            }
        };

        let mut failed = false;
        let mut completed = false;
        for (account_id, outcome) in outcomes {
            match outcome {
                Ok(_) => completed = true,
                Err(GuardedSyncError::Skipped(reason)) => {
                    debug!("Backfill of {} skipped: {:?}", account_id, reason);
                }
                Err(GuardedSyncError::Sync(e)) => {
                    failed = true;
                    let retry_at = inner.accounts.get(&account_id).and_then(|s| s.backoff_until);
                    let class = e.class();
                    let update = ViewUpdate::SyncFailed {
                        account_id,
                        message: e.to_string(),
                        hint: user_hint(class),
                        retry_at,
                    };
                    if class == ErrorClass::Client {
                        warn!("Backfill for user {} needs attention: {}", user_id, e);
                    }
                    shared.emit(update).await;
                }
            }
        }

        let state = if failed {
            ViewState::Degraded
        } else if completed {
            ViewState::Synced
        } else {
            continue;
        };
        if !shared.set_state(state).await {
            break;
        }
    }

    debug!("Poller for session {} stopped", shared.id);
    if let Some((_, entry)) = inner.sessions.remove(&shared.id) {
        entry.listener.abort();
        if let Some(sub) = shared.subscription_id.lock().await.take() {
            inner.events.unsubscribe(&sub).await;
        }
    }
}
