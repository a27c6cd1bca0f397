// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mailbox sync: pulls the newest window of INBOX and the sent folder into
//! the store.
//!
//! Each folder is walked oldest-to-newest inside the window. Messages sent by
//! the account itself are skipped in the inbox. A message whose source cannot
//! be fetched or parsed is recorded in the report and skipped; anything that
//! breaks the connection or the store stops the walk. Rows are flushed in
//! small batches so a failure late in the walk keeps what came before it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::credentials::{CredentialError, CredentialProvider};
use super::events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
use super::parse::{normalize_message_id, parse_message, ParsedMail};
use crate::config::SyncConfig;
use crate::error::ErrorClass;
use crate::imap::{tail_range, EnvelopeSummary, ImapError, MailboxConnector, MailboxSession};
use crate::models::{make_snippet, Account, InboundMessage, OutboundRecord, OutboundStatus, SNIPPET_CHARS};
use crate::store::{Store, StoreError};

const INBOX: &str = "INBOX";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inbox_count: usize,
    pub sent_count: usize,
    pub partial: bool,
    pub errors: Vec<String>,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Account {0} does not belong to the requesting user")]
    NotOwner(String),
    #[error("{0}")]
    Credentials(#[from] CredentialError),
    #[error("Mailbox connection failed: {0}")]
    Connect(ImapError),
    #[error("Sync aborted before any message was stored: {0}")]
    Aborted(ImapError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("No message could be synced: {}", .0.join("; "))]
    Failed(Vec<String>),
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::AccountNotFound(_) | SyncError::NotOwner(_) => ErrorClass::Client,
            SyncError::Credentials(e) => e.class(),
            SyncError::Connect(e) | SyncError::Aborted(e) if e.is_auth() => ErrorClass::Client,
            SyncError::Connect(_) | SyncError::Aborted(_) | SyncError::Store(_) | SyncError::Failed(_) => {
                ErrorClass::Infrastructure
            }
        }
    }

    /// Whether a later retry may succeed without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Connect(e) | SyncError::Aborted(e) => e.is_transient(),
            SyncError::Credentials(CredentialError::Unreachable(_)) => true,
            _ => false,
        }
    }
}

/// Why a folder walk stopped early.
#[derive(Error, Debug)]
enum Abort {
    #[error("{0}")]
    Mailbox(ImapError),
    #[error("{0}")]
    Store(StoreError),
}

#[derive(Debug, Default)]
struct FolderRun {
    processed: usize,
    errors: Vec<String>,
    abort: Option<Abort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderKind {
    Inbox,
    Sent,
}

/// Buffered rows waiting for the next flush.
enum Pending {
    Inbound(Vec<InboundMessage>),
    Outbound(Vec<OutboundRecord>),
}

impl Pending {
    fn for_kind(kind: FolderKind) -> Self {
        match kind {
            FolderKind::Inbox => Pending::Inbound(Vec::new()),
            FolderKind::Sent => Pending::Outbound(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Pending::Inbound(v) => v.len(),
            Pending::Outbound(v) => v.len(),
        }
    }
}

pub struct SyncEngine {
    store: Store,
    credentials: Arc<CredentialProvider>,
    connector: Arc<dyn MailboxConnector>,
    events: EventBus,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        credentials: Arc<CredentialProvider>,
        connector: Arc<dyn MailboxConnector>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            connector,
            events,
            config,
        }
    }

    /// Clamps the requested window to the protocol cap; zero means the default.
    pub fn effective_window(&self, requested: u32) -> u32 {
        let window = if requested == 0 { self.config.default_window } else { requested };
        window.min(self.config.protocol_cap).max(1)
    }

    pub async fn sync_account(&self, user_id: &str, account_id: &str, window: u32) -> Result<SyncReport, SyncError> {
        let account = self
            .store
            .accounts()
            .get(account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))?;
        if !account.owned_by(user_id) {
            warn!("User {} attempted to sync account {} they do not own", user_id, account_id);
            return Err(SyncError::NotOwner(account_id.to_string()));
        }

        let credentials = self.credentials.resolve_token(&account).await?;
        let mut session = self
            .connector
            .connect(&account, &credentials)
            .await
            .map_err(SyncError::Connect)?;

        let window = self.effective_window(window);
        info!("Syncing account {} ({}) with window {}", account.id, account.email, window);

        let inbox = self
            .sync_folder(session.as_mut(), &account, INBOX, FolderKind::Inbox, window)
            .await;

        let sent = if inbox.abort.is_none() {
            Some(self.sync_sent(session.as_mut(), &account, window).await)
        } else {
            None
        };

        if let Err(e) = session.logout().await {
            debug!("Logout for {} failed: {}", account.id, e);
        }

        let mut report = SyncReport {
            inbox_count: inbox.processed,
            sent_count: sent.as_ref().map(|s| s.processed).unwrap_or(0),
            partial: false,
            errors: inbox.errors,
        };
        let mut abort = inbox.abort;
        if let Some(sent) = sent {
            report.errors.extend(sent.errors);
            abort = abort.or(sent.abort);
        }

        let processed = report.inbox_count + report.sent_count;
        if let Some(reason) = abort {
            if processed == 0 {
                error!("Sync of {} failed before storing anything: {}", account.id, reason);
                return Err(match reason {
                    Abort::Mailbox(e) => SyncError::Aborted(e),
                    Abort::Store(e) => SyncError::Store(e),
                });
            }
            report.errors.push(reason.to_string());
        }
        if processed == 0 && !report.errors.is_empty() {
            error!("Sync of {} stored nothing: {}", account.id, report.errors.join("; "));
            return Err(SyncError::Failed(report.errors));
        }

        report.partial = !report.errors.is_empty();
        self.store.accounts().touch_last_synced(&account.id, Utc::now()).await?;
        self.events
            .publish(ChangeEvent::new(user_id, ChangeTable::Accounts, ChangeKind::Update, &account.id))
            .await;

        info!(
            "Sync of {} done: {} inbox, {} sent, {} errors",
            account.id,
            report.inbox_count,
            report.sent_count,
            report.errors.len()
        );
        Ok(report)
    }

    /// Sent folder under its canonical name, then the one fallback name.
    async fn sync_sent(&self, session: &mut dyn MailboxSession, account: &Account, window: u32) -> FolderRun {
        let [canonical, fallback] = account.provider.sent_folder_candidates();
        let run = self
            .sync_folder(session, account, canonical, FolderKind::Sent, window)
            .await;
        match &run.abort {
            Some(Abort::Mailbox(ImapError::FolderNotFound(_))) => {
                debug!("Sent folder '{}' missing for {}, trying '{}'", canonical, account.id, fallback);
                let mut retry = self
                    .sync_folder(session, account, fallback, FolderKind::Sent, window)
                    .await;
                if let Some(Abort::Mailbox(ImapError::FolderNotFound(_))) = retry.abort {
                    // Missing sent folder only costs the sent half of the sync.
                    retry.abort = None;
                    retry
                        .errors
                        .push(format!("sent folder not found (tried '{}' and '{}')", canonical, fallback));
                }
                retry
            }
            _ => run,
        }
    }

    /// Opens `folder`, walks its window and always closes it again.
    async fn sync_folder(
        &self,
        session: &mut dyn MailboxSession,
        account: &Account,
        folder: &str,
        kind: FolderKind,
        window: u32,
    ) -> FolderRun {
        let status = match session.examine(folder).await {
            Ok(status) => status,
            Err(e) => {
                return FolderRun {
                    abort: Some(Abort::Mailbox(e)),
                    ..Default::default()
                }
            }
        };

        let run = self.walk_folder(session, account, folder, kind, status.exists, window).await;

        if let Err(e) = session.close_folder().await {
            warn!("Closing {} for {} failed: {}", folder, account.id, e);
        }
        run
    }

    async fn walk_folder(
        &self,
        session: &mut dyn MailboxSession,
        account: &Account,
        folder: &str,
        kind: FolderKind,
        exists: u32,
        window: u32,
    ) -> FolderRun {
        let mut run = FolderRun::default();
        let Some((start, end)) = tail_range(exists, window) else {
            debug!("{} of {} is empty", folder, account.id);
            return run;
        };

        let envelopes = match session.fetch_envelopes(start, end).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                run.abort = Some(Abort::Mailbox(e));
                return run;
            }
        };
        debug!("Fetched {} envelopes from {} ({}:{})", envelopes.len(), folder, start, end);

        let mut pending = Pending::for_kind(kind);
        for envelope in envelopes {
            if kind == FolderKind::Inbox && is_self_sent(account, envelope.from_email.as_deref()) {
                debug!("Skipping message {} in {}: sent by the account itself", envelope.seq, folder);
                continue;
            }

            let raw = match session.fetch_source(envelope.seq).await {
                Ok(raw) => raw,
                Err(e) if e.is_transient() || e.is_auth() => {
                    run.abort = Some(Abort::Mailbox(e));
                    break;
                }
                Err(e) => {
                    warn!("Fetching message {} in {} failed: {}", envelope.seq, folder, e);
                    run.errors.push(format!("message {}: {}", envelope.seq, e));
                    continue;
                }
            };

            let parsed = match parse_message(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping message {} in {}: {}", envelope.seq, folder, e);
                    run.errors.push(format!("message {}: {}", envelope.seq, e));
                    continue;
                }
            };

            let built = match kind {
                FolderKind::Inbox => {
                    if is_self_sent(account, Some(&parsed.from_email)) {
                        continue;
                    }
                    self.build_inbound(account, folder, &envelope, parsed)
                        .await
                        .map(|m| push_inbound(&mut pending, m))
                }
                FolderKind::Sent => match self.build_outbound(account, folder, &envelope, parsed).await {
                    Ok(Some(record)) => Ok(push_outbound(&mut pending, record)),
                    Ok(None) => {
                        run.errors.push(format!("message {}: no recipient", envelope.seq));
                        continue;
                    }
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = built {
                run.abort = Some(Abort::Store(e));
                break;
            }

            if pending.len() >= self.config.batch_size.max(1) {
                match self.flush(account, &mut pending).await {
                    Ok(n) => run.processed += n,
                    Err(e) => {
                        run.abort = Some(Abort::Store(e));
                        return run;
                    }
                }
            }
        }

        match self.flush(account, &mut pending).await {
            Ok(n) => run.processed += n,
            Err(e) => {
                if run.abort.is_none() {
                    run.abort = Some(Abort::Store(e));
                }
            }
        }
        run
    }

    async fn build_inbound(
        &self,
        account: &Account,
        folder: &str,
        envelope: &EnvelopeSummary,
        parsed: ParsedMail,
    ) -> Result<InboundMessage, StoreError> {
        let lead = self
            .store
            .leads()
            .find_by_email(&account.user_id, &parsed.from_email)
            .await?;
        let message_id = message_key(account, folder, envelope, parsed.message_id.as_deref());
        let snippet = parsed
            .body_text
            .as_deref()
            .or(parsed.body_html.as_deref())
            .map(|body| make_snippet(body, SNIPPET_CHARS));

        Ok(InboundMessage {
            id: Uuid::new_v4().to_string(),
            user_id: account.user_id.clone(),
            account_id: account.id.clone(),
            lead_id: lead.as_ref().map(|l| l.id.clone()),
            campaign_id: lead.map(|l| l.campaign_id),
            thread_id: envelope.thread_id.clone(),
            message_id,
            from_email: parsed.from_email,
            from_name: parsed.from_name,
            to_email: parsed.to_email.or_else(|| Some(account.email.clone())),
            to_name: parsed.to_name,
            subject: parsed.subject.or_else(|| envelope.subject.clone()),
            body_text: parsed.body_text,
            body_html: parsed.body_html,
            snippet,
            received_at: parsed.date.or(envelope.date).unwrap_or_else(Utc::now),
            is_read: false,
            tags: HashMap::new(),
        })
    }

    async fn build_outbound(
        &self,
        account: &Account,
        folder: &str,
        envelope: &EnvelopeSummary,
        parsed: ParsedMail,
    ) -> Result<Option<OutboundRecord>, StoreError> {
        let Some(recipient) = parsed.to_email.clone() else {
            return Ok(None);
        };
        let lead = self.store.leads().find_by_email(&account.user_id, &recipient).await?;
        let step = match &lead {
            Some(lead) => self.store.leads().first_step(&lead.campaign_id).await?,
            None => None,
        };
        let sent_at = parsed.date.or(envelope.date).unwrap_or_else(Utc::now);

        Ok(Some(OutboundRecord {
            id: Uuid::new_v4().to_string(),
            user_id: account.user_id.clone(),
            account_id: account.id.clone(),
            lead_id: lead.as_ref().map(|l| l.id.clone()),
            campaign_id: lead.map(|l| l.campaign_id),
            sequence_step_id: step.map(|s| s.id),
            recipient,
            subject: parsed.subject.or_else(|| envelope.subject.clone()),
            body_html: parsed.body_html,
            provider_message_id: envelope.provider_message_id.clone(),
            rfc_message_id: Some(message_key(account, folder, envelope, parsed.message_id.as_deref())),
            provider_thread_id: envelope.thread_id.clone(),
            status: OutboundStatus::Sent,
            error_detail: None,
            sent_at: Some(sent_at),
            opened_at: None,
            clicked_at: None,
            replied_at: None,
            bounced_at: None,
            created_at: sent_at,
        }))
    }

    /// Writes the buffered rows and returns how many were written.
    async fn flush(&self, account: &Account, pending: &mut Pending) -> Result<usize, StoreError> {
        match pending {
            Pending::Inbound(batch) => {
                if batch.is_empty() {
                    return Ok(0);
                }
                let messages = self.store.messages();
                let mut fresh = Vec::new();
                for msg in batch.iter() {
                    if messages.count_inbound_with_message_id(&msg.account_id, &msg.message_id).await? == 0 {
                        fresh.push(msg.clone());
                    }
                }
                messages.upsert_inbound_batch(batch).await?;
                let written = batch.len();
                batch.clear();

                for msg in fresh {
                    if let Some(lead_id) = &msg.lead_id {
                        self.apply_reply(&account.user_id, lead_id, msg.received_at).await?;
                    }
                    self.events
                        .publish(
                            ChangeEvent::new(&msg.user_id, ChangeTable::InboundMessages, ChangeKind::Insert, &msg.id)
                                .with_thread(msg.thread_id.clone(), msg.lead_id.clone()),
                        )
                        .await;
                }
                Ok(written)
            }
            Pending::Outbound(batch) => {
                let written = batch.len();
                for record in batch.drain(..) {
                    if self.store.messages().upsert_outbound(&record).await? {
                        self.events
                            .publish(
                                ChangeEvent::new(
                                    &record.user_id,
                                    ChangeTable::OutboundRecords,
                                    ChangeKind::Insert,
                                    &record.id,
                                )
                                .with_thread(record.provider_thread_id.clone(), record.lead_id.clone()),
                            )
                            .await;
                    }
                }
                Ok(written)
            }
        }
    }

    /// A new reply from a lead moves it to `replied` and stamps the send it answers.
    async fn apply_reply(&self, user_id: &str, lead_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if self.store.leads().promote_to_replied(lead_id).await? {
            info!("Lead {} replied", lead_id);
            self.events
                .publish(ChangeEvent::new(user_id, ChangeTable::Leads, ChangeKind::Update, lead_id))
                .await;
        }
        self.store.messages().mark_latest_replied(lead_id, at).await?;
        Ok(())
    }
}

fn push_inbound(pending: &mut Pending, msg: InboundMessage) {
    if let Pending::Inbound(batch) = pending {
        batch.push(msg);
    }
}

fn push_outbound(pending: &mut Pending, record: OutboundRecord) {
    if let Pending::Outbound(batch) = pending {
        batch.push(record);
    }
}

fn is_self_sent(account: &Account, from: Option<&str>) -> bool {
    from.map(|f| account.is_own_address(f)).unwrap_or(false)
}

/// Message-ID when present, otherwise a key stable for this folder position.
fn message_key(account: &Account, folder: &str, envelope: &EnvelopeSummary, parsed_id: Option<&str>) -> String {
    parsed_id
        .map(str::to_string)
        .or_else(|| envelope.message_id.as_deref().map(normalize_message_id))
        .unwrap_or_else(|| {
            let position = envelope.uid.unwrap_or(envelope.seq);
            format!("<{}.{}.{}@unibox>", account.id, folder.replace(' ', "_"), position)
        })
}
