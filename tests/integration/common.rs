// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared fakes and seed helpers for the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mockall::mock;

use unibox::config::SyncConfig;
use unibox::imap::{EnvelopeSummary, FolderStatus, ImapError, MailboxConnector, MailboxSession};
use unibox::models::{Account, Credentials, InboundMessage, ProviderKind, StoredCredentials};
use unibox::services::transport::{OutgoingMessage, SentMessage};
use unibox::services::{
    CredentialError, CredentialProvider, EventBus, MailTransport, SendPipeline, SyncEngine, TokenEndpoint,
    TokenResponse, TransportError,
};
use unibox::store::{NewAccount, Store};

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";
pub const ACCOUNT_EMAIL: &str = "me@gmail.com";
pub const TRACKING_BASE: &str = "https://track.example.com";

mock! {
    pub Tokens {}

    #[async_trait]
    impl TokenEndpoint for Tokens {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError>;
        async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, CredentialError>;
    }
}

/// Token endpoint that must never be called.
pub fn idle_tokens() -> Arc<MockTokens> {
    let mut tokens = MockTokens::new();
    tokens.expect_refresh().never();
    tokens.expect_exchange_code().never();
    Arc::new(tokens)
}

pub fn fresh_token(access_token: &str) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        token_type: Some("Bearer".to_string()),
        expires_in: 3600,
        refresh_token: None,
        scope: None,
    }
}

pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        insert_grace_ms: 0,
        ..SyncConfig::default()
    }
}

// --- Mailbox fake ---

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub from: String,
    pub raw: Vec<u8>,
    pub thread_id: Option<String>,
    pub provider_message_id: Option<String>,
}

impl FakeMessage {
    pub fn new(from: &str, to: &str, subject: &str, message_id: &str) -> Self {
        Self {
            from: from.to_string(),
            raw: rfc822(from, to, subject, message_id, "Hello there").into_bytes(),
            thread_id: None,
            provider_message_id: None,
        }
    }

    pub fn in_thread(mut self, thread_id: &str) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self
    }

    pub fn with_provider_id(mut self, id: &str) -> Self {
        self.provider_message_id = Some(id.to_string());
        self
    }

    /// A message whose source has no sender and fails to parse.
    pub fn broken() -> Self {
        Self {
            from: "unknown@nowhere.test".to_string(),
            raw: b"Subject: broken\r\n\r\nno sender here\r\n".to_vec(),
            thread_id: None,
            provider_message_id: None,
        }
    }
}

pub fn rfc822(from: &str, to: &str, subject: &str, message_id: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMessage-ID: {message_id}\r\n\
         Date: Tue, 1 Jul 2025 10:00:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
}

/// In-memory mailbox. Folders that were never added report `FolderNotFound`.
#[derive(Clone, Default)]
pub struct FakeMailbox {
    folders: Arc<Mutex<HashMap<String, Vec<FakeMessage>>>>,
    drop_at: Option<(String, u32)>,
    pub connects: Arc<AtomicUsize>,
    pub credentials_seen: Arc<Mutex<Vec<Credentials>>>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(self, name: &str, messages: Vec<FakeMessage>) -> Self {
        self.folders.lock().unwrap().insert(name.to_string(), messages);
        self
    }

    /// INBOX plus an empty Gmail sent folder.
    pub fn gmail_inbox(messages: Vec<FakeMessage>) -> Self {
        Self::new()
            .with_folder("INBOX", messages)
            .with_folder("[Gmail]/Sent Mail", Vec::new())
    }

    /// The connection drops when the source of `seq` in `folder` is fetched.
    pub fn dropping_connection_at(mut self, folder: &str, seq: u32) -> Self {
        self.drop_at = Some((folder.to_string(), seq));
        self
    }

    pub fn push(&self, folder: &str, message: FakeMessage) {
        self.folders
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_default()
            .push(message);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    folders: HashMap<String, Vec<FakeMessage>>,
    selected: Option<String>,
    drop_at: Option<(String, u32)>,
}

impl FakeSession {
    fn selected(&self) -> Result<&Vec<FakeMessage>, ImapError> {
        self.selected
            .as_ref()
            .and_then(|name| self.folders.get(name))
            .ok_or_else(|| ImapError::Operation("no folder selected".to_string()))
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, ImapError> {
        let messages = self
            .folders
            .get(folder)
            .ok_or_else(|| ImapError::FolderNotFound(folder.to_string()))?;
        let exists = messages.len() as u32;
        self.selected = Some(folder.to_string());
        Ok(FolderStatus { exists })
    }

    async fn fetch_envelopes(&mut self, start: u32, end: u32) -> Result<Vec<EnvelopeSummary>, ImapError> {
        let messages = self.selected()?;
        Ok((start..=end)
            .filter_map(|seq| {
                messages.get(seq as usize - 1).map(|m| EnvelopeSummary {
                    seq,
                    uid: Some(seq),
                    from_email: Some(m.from.clone()),
                    thread_id: m.thread_id.clone(),
                    provider_message_id: m.provider_message_id.clone(),
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn fetch_source(&mut self, seq: u32) -> Result<Vec<u8>, ImapError> {
        if let (Some((folder, at)), Some(selected)) = (&self.drop_at, &self.selected) {
            if folder == selected && *at == seq {
                return Err(ImapError::Connection("connection reset by peer".to_string()));
            }
        }
        let messages = self.selected()?;
        messages
            .get(seq as usize - 1)
            .map(|m| m.raw.clone())
            .ok_or_else(|| ImapError::MissingData(format!("no message {}", seq)))
    }

    async fn close_folder(&mut self) -> Result<(), ImapError> {
        self.selected = None;
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        Ok(())
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(
        &self,
        _account: &Account,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailboxSession>, ImapError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.credentials_seen.lock().unwrap().push(credentials.clone());
        let folders = self.folders.lock().unwrap().clone();
        Ok(Box::new(FakeSession {
            folders,
            selected: None,
            drop_at: self.drop_at.clone(),
        }))
    }
}

// --- Transport fake ---

/// Replays scripted send outcomes and records every attempt.
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<Result<SentMessage, TransportError>>>,
    pub attempts: Mutex<Vec<OutgoingMessage>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<Result<SentMessage, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting(id: &str, thread_id: &str) -> Arc<Self> {
        Self::new(vec![Ok(sent(id, thread_id))])
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

pub fn sent(id: &str, thread_id: &str) -> SentMessage {
    SentMessage {
        provider_message_id: id.to_string(),
        provider_thread_id: Some(thread_id.to_string()),
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(
        &self,
        _account: &Account,
        _credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        self.attempts.lock().unwrap().push(message.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::from_http(503, "no scripted outcome left")))
    }
}

// --- Seed helpers ---

pub async fn seed_gmail_account(store: &Store, user_id: &str, expires_at: Option<DateTime<Utc>>) -> Account {
    store
        .accounts()
        .insert(NewAccount {
            user_id: user_id.to_string(),
            provider: ProviderKind::Gmail,
            email: ACCOUNT_EMAIL.to_string(),
            display_name: Some("Me".to_string()),
            imap_host: None,
            imap_port: None,
            smtp_host: None,
            smtp_port: None,
            credentials: StoredCredentials::OAuth {
                refresh_token: Some("refresh-token".to_string()),
                access_token: Some("access-token".to_string()),
                expires_at,
            },
        })
        .await
        .expect("seed account")
}

/// Account whose cached token stays valid for the whole test.
pub async fn seed_live_account(store: &Store) -> Account {
    seed_gmail_account(store, USER, Some(Utc::now() + Duration::hours(2))).await
}

pub async fn seed_lead(store: &Store, email: &str) -> unibox::models::Lead {
    let leads = store.leads();
    let campaign = leads.insert_campaign(USER, "Q3 outreach").await.expect("campaign");
    leads
        .insert_step(USER, &campaign, 1, "Quick question", "<p>Hi {{first_name}}</p>")
        .await
        .expect("step");
    leads.insert_lead(USER, &campaign, email, Some("Jane")).await.expect("lead")
}

pub fn inbound(account: &Account, message_id: &str, from: &str, thread_id: Option<&str>, at: DateTime<Utc>) -> InboundMessage {
    InboundMessage {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: account.user_id.clone(),
        account_id: account.id.clone(),
        lead_id: None,
        campaign_id: None,
        thread_id: thread_id.map(str::to_string),
        message_id: message_id.to_string(),
        from_email: from.to_string(),
        from_name: None,
        to_email: Some(account.email.clone()),
        to_name: None,
        subject: Some("Re: Quick question".to_string()),
        body_text: Some("Sounds good".to_string()),
        body_html: None,
        snippet: Some("Sounds good".to_string()),
        received_at: at,
        is_read: false,
        tags: HashMap::new(),
    }
}

// --- Component wiring ---

pub fn credentials(store: &Store, tokens: Arc<dyn TokenEndpoint>) -> Arc<CredentialProvider> {
    Arc::new(CredentialProvider::new(store.clone(), tokens, 300))
}

pub fn sync_engine(store: &Store, tokens: Arc<dyn TokenEndpoint>, mailbox: &FakeMailbox, events: &EventBus) -> SyncEngine {
    SyncEngine::new(
        store.clone(),
        credentials(store, tokens),
        Arc::new(mailbox.clone()),
        events.clone(),
        test_sync_config(),
    )
}

pub fn send_pipeline(store: &Store, transport: Arc<ScriptedTransport>, events: &EventBus) -> SendPipeline {
    SendPipeline::new(
        store.clone(),
        credentials(store, idle_tokens()),
        transport.clone(),
        transport,
        events.clone(),
        TRACKING_BASE,
    )
}
