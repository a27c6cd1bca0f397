// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provider send paths. Failures are classified into a [`TransportErrorKind`]
//! right here, at the boundary, so callers never inspect provider text.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use lettre::address::{Address, Envelope};
use lettre::transport::smtp::authentication::{Credentials as SmtpCredentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use log::{debug, error, info};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Account, Credentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The thread id we passed is unknown to the provider.
    InvalidThread,
    /// Credentials were refused.
    Unauthorized,
    /// The provider refused the message itself.
    Rejected,
    /// Network failure, 5xx or rate limiting.
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Decides the kind of a provider HTTP failure from its status and message.
    pub fn from_http(status: u16, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let kind = match status {
            400 | 404 if lower.contains("thread") && (lower.contains("invalid") || status == 404) => {
                TransportErrorKind::InvalidThread
            }
            401 | 403 => TransportErrorKind::Unauthorized,
            429 | 500..=599 => TransportErrorKind::Unavailable,
            _ => TransportErrorKind::Rejected,
        };
        Self::new(kind, Some(status), message)
    }
}

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    /// RFC-822 bytes.
    pub raw: Vec<u8>,
    pub rfc_message_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        account: &Account,
        credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError>;
}

// --- Gmail REST API ---

#[derive(Serialize)]
struct GmailSendRequest<'a> {
    raw: String,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct GmailSendResponse {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct GmailErrorEnvelope {
    error: GmailErrorBody,
}

#[derive(Deserialize)]
struct GmailErrorBody {
    #[serde(default)]
    message: String,
}

pub struct GmailApiTransport {
    api_base: String,
    http_client: reqwest::Client,
}

impl GmailApiTransport {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MailTransport for GmailApiTransport {
    async fn send(
        &self,
        account: &Account,
        credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        let Credentials::OAuth { access_token, .. } = credentials else {
            return Err(TransportError::new(
                TransportErrorKind::Unauthorized,
                None,
                "send API requires an OAuth access token",
            ));
        };

        let url = format!("{}/users/me/messages/send", self.api_base);
        let body = GmailSendRequest {
            raw: URL_SAFE_NO_PAD.encode(&message.raw),
            thread_id: message.thread_id.as_deref(),
        };
        debug!(
            "Sending {} via send API for {} (thread {:?})",
            message.rfc_message_id, account.email, message.thread_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Unavailable, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<GmailErrorEnvelope>(&text)
                .map(|env| env.error.message)
                .unwrap_or(text);
            error!("Send API rejected message for {}: HTTP {} - {}", account.email, status, detail);
            return Err(TransportError::from_http(status.as_u16(), &detail));
        }

        let sent: GmailSendResponse = response
            .json()
            .await
            .map_err(|e| TransportError::new(TransportErrorKind::Unavailable, None, format!("JSON parse: {}", e)))?;
        info!("Message {} sent for {}", sent.id, account.email);
        Ok(SentMessage {
            provider_message_id: sent.id,
            provider_thread_id: sent.thread_id,
        })
    }
}

// --- SMTP ---

/// Generic accounts: SMTP AUTH with the stored password, or XOAUTH2 when the
/// credential is a bearer token.
#[derive(Debug, Default, Clone)]
pub struct SmtpMailTransport;

impl SmtpMailTransport {
    fn mailer(&self, account: &Account, credentials: &Credentials) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let host = account.smtp_host.as_deref().ok_or_else(|| {
            TransportError::new(TransportErrorKind::Rejected, None, format!("account {} has no SMTP host", account.id))
        })?;
        let port = account.smtp_port.unwrap_or(587);

        let builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| TransportError::new(TransportErrorKind::Unavailable, None, format!("SMTP relay error: {}", e)))?
        .port(port);

        let builder = match credentials {
            Credentials::Password { username, password } => {
                builder.credentials(SmtpCredentials::new(username.clone(), password.clone()))
            }
            Credentials::OAuth { user, access_token } => builder
                .credentials(SmtpCredentials::new(user.clone(), access_token.clone()))
                .authentication(vec![Mechanism::Xoauth2]),
        };
        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(
        &self,
        account: &Account,
        credentials: &Credentials,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, TransportError> {
        let invalid = |e: String| TransportError::new(TransportErrorKind::Rejected, None, e);
        let from: Address = message.from.parse().map_err(|e| invalid(format!("Invalid from address: {}", e)))?;
        let to: Address = message.to.parse().map_err(|e| invalid(format!("Invalid to address: {}", e)))?;
        let envelope = Envelope::new(Some(from), vec![to]).map_err(|e| invalid(e.to_string()))?;

        let mailer = self.mailer(account, credentials)?;
        mailer.send_raw(&envelope, &message.raw).await.map_err(|e| {
            let kind = if e.is_permanent() {
                TransportErrorKind::Rejected
            } else {
                TransportErrorKind::Unavailable
            };
            error!("SMTP send for {} failed: {}", account.email, e);
            TransportError::new(kind, None, e.to_string())
        })?;

        info!("Message {} relayed over SMTP for {}", message.rfc_message_id, account.email);
        Ok(SentMessage {
            provider_message_id: message.rfc_message_id.clone(),
            provider_thread_id: Some(
                message
                    .thread_id
                    .clone()
                    .unwrap_or_else(|| message.rfc_message_id.clone()),
            ),
        })
    }
}
