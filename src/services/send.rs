// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outbound send pipeline: authorize, instrument, build, transmit, record.
//!
//! Nothing is written to the store unless the provider accepted the message.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use lettre::message::{header::ContentType, Mailbox};
use lettre::Message;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use super::credentials::{CredentialError, CredentialProvider};
use super::events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
use super::parse::normalize_message_id;
use super::tracking::instrument_html;
use super::transport::{MailTransport, OutgoingMessage, SentMessage, TransportError, TransportErrorKind};
use crate::error::ErrorClass;
use crate::models::{
    make_snippet, Account, AccountStatus, InboundMessage, OutboundRecord, OutboundStatus, ProviderKind, SNIPPET_CHARS,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[validate(length(min = 1, message = "accountId is required"))]
    pub account_id: String,
    #[validate(email(message = "to must be an email address"))]
    pub to: String,
    pub subject: String,
    #[validate(length(min = 1, message = "htmlBody must not be empty"))]
    pub html_body: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Message-ID of the message being answered.
    #[serde(default)]
    pub original_message_id: Option<String>,
    #[serde(default)]
    pub lead_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Account {0} does not belong to the requesting user")]
    NotOwner(String),
    #[error("Account {0} is not active")]
    Inactive(String),
    #[error("{0}")]
    Credentials(#[from] CredentialError),
    #[error("Invalid message: {0}")]
    Build(String),
    #[error("{0}")]
    Transport(TransportError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SendError::Credentials(e) => e.class(),
            SendError::Transport(e) if e.kind == TransportErrorKind::Unavailable => ErrorClass::Infrastructure,
            SendError::Store(_) => ErrorClass::Infrastructure,
            _ => ErrorClass::Client,
        }
    }
}

impl From<lettre::error::Error> for SendError {
    fn from(e: lettre::error::Error) -> Self {
        SendError::Build(e.to_string())
    }
}

/// Adds the reply prefix unless the subject already carries one.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim_start();
    if trimmed.get(..3).map_or(false, |prefix| prefix.eq_ignore_ascii_case("re:")) {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

fn address_domain(email: &str) -> &str {
    email.rsplit_once('@').map(|(_, d)| d).unwrap_or("unibox.local")
}

/// Renders the RFC-822 message. Returns the raw bytes and the Message-ID used.
pub fn build_message(
    account: &Account,
    to: &str,
    subject: &str,
    html: &str,
    in_reply_to: Option<&str>,
) -> Result<(Vec<u8>, String), SendError> {
    let from: Mailbox = match &account.display_name {
        Some(name) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), account.email),
        _ => account.email.clone(),
    }
    .parse()
    .map_err(|e| SendError::Build(format!("Invalid from address: {}", e)))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| SendError::Build(format!("Invalid to address {}: {}", to, e)))?;

    let message_id = format!("<{}@{}>", Uuid::new_v4(), address_domain(&account.email));
    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .message_id(Some(message_id.clone()));

    builder = match in_reply_to {
        Some(parent) => {
            let parent = normalize_message_id(parent);
            builder
                .subject(reply_subject(subject))
                .in_reply_to(parent.clone())
                .references(parent)
        }
        None => builder.subject(subject),
    };

    let email = builder.header(ContentType::TEXT_HTML).body(html.to_string())?;
    Ok((email.formatted(), message_id))
}

pub struct SendPipeline {
    store: Store,
    credentials: Arc<CredentialProvider>,
    api_transport: Arc<dyn MailTransport>,
    smtp_transport: Arc<dyn MailTransport>,
    events: EventBus,
    tracking_base_url: String,
}

impl SendPipeline {
    pub fn new(
        store: Store,
        credentials: Arc<CredentialProvider>,
        api_transport: Arc<dyn MailTransport>,
        smtp_transport: Arc<dyn MailTransport>,
        events: EventBus,
        tracking_base_url: &str,
    ) -> Self {
        Self {
            store,
            credentials,
            api_transport,
            smtp_transport,
            events,
            tracking_base_url: tracking_base_url.to_string(),
        }
    }

    fn transport_for(&self, account: &Account) -> &Arc<dyn MailTransport> {
        match account.provider {
            ProviderKind::Gmail => &self.api_transport,
            ProviderKind::Imap => &self.smtp_transport,
        }
    }

    pub async fn send(&self, user_id: &str, request: SendRequest) -> Result<SendResult, SendError> {
        let account = self
            .store
            .accounts()
            .get(&request.account_id)
            .await?
            .ok_or_else(|| SendError::AccountNotFound(request.account_id.clone()))?;
        if !account.owned_by(user_id) {
            warn!("User {} attempted to send from account {} they do not own", user_id, account.id);
            return Err(SendError::NotOwner(account.id.clone()));
        }
        if account.status != AccountStatus::Active {
            return Err(SendError::Inactive(account.id.clone()));
        }

        let credentials = self.credentials.resolve_token(&account).await?;

        // The record id doubles as the tracking id.
        let log_id = Uuid::new_v4().to_string();
        let html = instrument_html(&request.html_body, &self.tracking_base_url, &log_id);
        let (raw, rfc_message_id) = build_message(
            &account,
            &request.to,
            &request.subject,
            &html,
            request.original_message_id.as_deref(),
        )?;

        let mut outgoing = OutgoingMessage {
            from: account.email.clone(),
            to: request.to.clone(),
            raw,
            rfc_message_id: rfc_message_id.clone(),
            thread_id: request.thread_id.clone().filter(|t| !t.is_empty()),
        };

        let transport = self.transport_for(&account);
        let sent = match transport.send(&account, &credentials, &outgoing).await {
            Ok(sent) => sent,
            Err(e) if e.kind == TransportErrorKind::InvalidThread && outgoing.thread_id.is_some() => {
                warn!(
                    "Provider rejected thread {:?} for {}, retrying without it",
                    outgoing.thread_id, account.email
                );
                outgoing.thread_id = None;
                transport
                    .send(&account, &credentials, &outgoing)
                    .await
                    .map_err(SendError::Transport)?
            }
            Err(e) => {
                error!("Send from {} to {} failed: {}", account.email, request.to, e);
                return Err(SendError::Transport(e));
            }
        };

        self.record(user_id, &account, &request, &log_id, &rfc_message_id, &html, &sent)
            .await?;
        info!(
            "Sent {} from {} to {} (thread {:?})",
            sent.provider_message_id, account.email, request.to, sent.provider_thread_id
        );

        Ok(SendResult {
            provider_message_id: sent.provider_message_id,
            provider_thread_id: sent.provider_thread_id,
        })
    }

    /// Writes the sent log row and the conversation row for an accepted send.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        user_id: &str,
        account: &Account,
        request: &SendRequest,
        log_id: &str,
        rfc_message_id: &str,
        html: &str,
        sent: &SentMessage,
    ) -> Result<(), SendError> {
        let lead = match &request.lead_id {
            Some(lead_id) => self.store.leads().get(user_id, lead_id).await?,
            None => self.store.leads().find_by_email(user_id, &request.to).await?,
        };
        let subject = match &request.original_message_id {
            Some(_) => reply_subject(&request.subject),
            None => request.subject.clone(),
        };
        let now = Utc::now();

        let record = OutboundRecord {
            id: log_id.to_string(),
            user_id: user_id.to_string(),
            account_id: account.id.clone(),
            lead_id: lead.as_ref().map(|l| l.id.clone()),
            campaign_id: lead.as_ref().map(|l| l.campaign_id.clone()),
            sequence_step_id: None,
            recipient: request.to.clone(),
            subject: Some(subject.clone()),
            body_html: Some(html.to_string()),
            provider_message_id: Some(sent.provider_message_id.clone()),
            rfc_message_id: Some(rfc_message_id.to_string()),
            provider_thread_id: sent.provider_thread_id.clone(),
            status: OutboundStatus::Sent,
            error_detail: None,
            sent_at: Some(now),
            opened_at: None,
            clicked_at: None,
            replied_at: None,
            bounced_at: None,
            created_at: now,
        };
        self.store.messages().insert_outbound(&record).await.map_err(|e| {
            error!("Message {} was sent but could not be recorded: {}", sent.provider_message_id, e);
            e
        })?;

        let conversation = InboundMessage {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            account_id: account.id.clone(),
            lead_id: record.lead_id.clone(),
            campaign_id: record.campaign_id.clone(),
            thread_id: sent.provider_thread_id.clone(),
            message_id: rfc_message_id.to_string(),
            from_email: account.email.clone(),
            from_name: account.display_name.clone(),
            to_email: Some(request.to.clone()),
            to_name: None,
            subject: Some(subject),
            body_text: None,
            body_html: Some(request.html_body.clone()),
            snippet: Some(make_snippet(&request.html_body, SNIPPET_CHARS)),
            received_at: now,
            is_read: true,
            tags: HashMap::new(),
        };
        self.store
            .messages()
            .upsert_inbound_batch(std::slice::from_ref(&conversation))
            .await?;

        self.events
            .publish(
                ChangeEvent::new(user_id, ChangeTable::OutboundRecords, ChangeKind::Insert, &record.id)
                    .with_thread(record.provider_thread_id.clone(), record.lead_id.clone()),
            )
            .await;
        self.events
            .publish(
                ChangeEvent::new(user_id, ChangeTable::InboundMessages, ChangeKind::Insert, &conversation.id)
                    .with_thread(conversation.thread_id.clone(), conversation.lead_id.clone()),
            )
            .await;
        Ok(())
    }
}
