// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_imap::imap_proto::{AttributeValue, Response, Status};
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{debug, info, warn};
use rustls::pki_types::ServerName as PkiServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream as TokioTlsStreamClient, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::error::ImapError;
use super::session::{EnvelopeSummary, FolderStatus, MailboxConnector, MailboxSession};
use super::xoauth2::XOAuth2Authenticator;
use crate::models::{Account, Credentials};

type BaseTlsStream = TokioTlsStreamClient<TokioTcpStream>;
type CompatStream = Compat<BaseTlsStream>;
type UnderlyingImapSession = AsyncImapSession<CompatStream>;

/// Capability advertised by servers that expose Gmail thread and message ids.
const GMAIL_EXTENSION: &str = "X-GM-EXT-1";

/// Connects to real IMAP servers over implicit TLS.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    login_timeout: Duration,
    command_timeout: Duration,
}

impl ImapConnector {
    pub fn new(login_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            login_timeout,
            command_timeout,
        }
    }
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(60))
    }
}

fn tls_connector() -> Result<TlsConnector, ImapError> {
    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        warn!("Root certificate store is empty after loading native certs.");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn open_tls_stream(host: &str, port: u16, limit: Duration) -> Result<CompatStream, ImapError> {
    let server_name: PkiServerName<'static> = PkiServerName::try_from(host.to_string())
        .map_err(|_| ImapError::Connection(format!("Invalid server name format: {}", host)))?;
    let connector = tls_connector()?;

    debug!("Attempting TCP connection to {}:{}...", host, port);
    let tcp = timeout(limit, TokioTcpStream::connect((host, port))).await??;
    let tls = timeout(limit, connector.connect(server_name, tcp))
        .await?
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    debug!("TLS handshake with {} complete.", host);
    Ok(tls.compat())
}

async fn authenticate(
    stream: CompatStream,
    credentials: &Credentials,
    limit: Duration,
) -> Result<UnderlyingImapSession, ImapError> {
    let client = AsyncImapClient::new(stream);
    let attempt = match credentials {
        Credentials::OAuth { user, access_token } => {
            debug!("Authenticating {} with XOAUTH2", user);
            let auth = XOAuth2Authenticator::new(user, access_token);
            timeout(limit, client.authenticate("XOAUTH2", auth)).await?
        }
        Credentials::Password { username, password } => {
            debug!("Logging in {} with LOGIN", username);
            timeout(limit, client.login(username, password)).await?
        }
    };

    attempt.map_err(|(e, _client)| match e {
        async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => ImapError::Auth(msg),
        other => ImapError::from(other),
    })
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(
        &self,
        account: &Account,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailboxSession>, ImapError> {
        let (host, port) = account
            .imap_endpoint()
            .ok_or_else(|| ImapError::Connection(format!("account {} has no IMAP host", account.id)))?;

        info!("Connecting account {} to {}:{}", account.id, host, port);
        let stream = open_tls_stream(&host, port, self.login_timeout).await?;
        let mut session = authenticate(stream, credentials, self.login_timeout).await?;

        let gmail_ext = match timeout(self.command_timeout, session.capabilities()).await? {
            Ok(caps) => caps.has_str(GMAIL_EXTENSION),
            Err(e) => {
                warn!("CAPABILITY failed for {}: {}", account.id, e);
                false
            }
        };
        info!(
            "Session ready for {} (Gmail ids: {})",
            account.email,
            if gmail_ext { "yes" } else { "no" }
        );

        Ok(Box::new(ImapMailboxSession {
            session,
            gmail_ext,
            command_timeout: self.command_timeout,
        }))
    }
}

/// `MailboxSession` over a live async-imap session.
pub struct ImapMailboxSession {
    session: UnderlyingImapSession,
    gmail_ext: bool,
    command_timeout: Duration,
}

/// Gmail identifiers of one message, as lowercase hex to match the send API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GmailIds {
    thread_id: Option<String>,
    message_id: Option<String>,
}

impl ImapMailboxSession {
    async fn gmail_ids(&mut self, start: u32, end: u32) -> Result<HashMap<u32, GmailIds>, ImapError> {
        let command = format!("FETCH {}:{} (X-GM-MSGID X-GM-THRID)", start, end);
        timeout(self.command_timeout, read_gmail_ids(&mut self.session, &command)).await?
    }
}

/// Runs a raw FETCH and collects the Gmail attributes until its tagged reply.
async fn read_gmail_ids(
    session: &mut UnderlyingImapSession,
    command: &str,
) -> Result<HashMap<u32, GmailIds>, ImapError> {
    let tag = session.run_command(command).await?;
    let mut ids = HashMap::new();
    while let Some(response) = session.read_response().await {
        let response = response?;
        match response.parsed() {
            Response::Done {
                tag: done,
                status,
                information,
                ..
            } if *done == tag => {
                return match status {
                    Status::Ok => Ok(ids),
                    _ => Err(ImapError::Fetch(format!(
                        "{:?}: {}",
                        status,
                        information.as_deref().unwrap_or("no detail")
                    ))),
                };
            }
            parsed => {
                if let Some((seq, found)) = gmail_ids_from(parsed) {
                    ids.insert(seq, found);
                }
            }
        }
    }
    Err(ImapError::Connection("connection closed during X-GM fetch".to_string()))
}

/// Gmail ids carried by one untagged FETCH response, if any.
fn gmail_ids_from(response: &Response<'_>) -> Option<(u32, GmailIds)> {
    let Response::Fetch(seq, attributes) = response else {
        return None;
    };
    let mut found = GmailIds::default();
    for attribute in attributes {
        match attribute {
            AttributeValue::GmailThrId(id) => found.thread_id = Some(format!("{:x}", id)),
            AttributeValue::GmailMsgId(id) => found.message_id = Some(format!("{:x}", id)),
            _ => {}
        }
    }
    if found == GmailIds::default() {
        return None;
    }
    Some((*seq, found))
}

fn lossy(bytes: Option<&std::borrow::Cow<'_, [u8]>>) -> Option<String> {
    bytes
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn envelope_from_fetch(fetch: &async_imap::types::Fetch) -> EnvelopeSummary {
    let mut summary = EnvelopeSummary {
        seq: fetch.message,
        uid: fetch.uid,
        date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        ..Default::default()
    };

    if let Some(envelope) = fetch.envelope() {
        if let Some(sender) = envelope.from.as_ref().and_then(|list| list.first()) {
            let mailbox = lossy(sender.mailbox.as_ref());
            let host = lossy(sender.host.as_ref());
            summary.from_email = match (mailbox, host) {
                (Some(m), Some(h)) => Some(format!("{}@{}", m, h)),
                (Some(m), None) => Some(m),
                _ => None,
            };
            summary.from_name = lossy(sender.name.as_ref());
        }
        summary.subject = lossy(envelope.subject.as_ref());
        summary.message_id = lossy(envelope.message_id.as_ref());
        if let Some(date) = lossy(envelope.date.as_ref()) {
            if let Ok(parsed) = DateTime::parse_from_rfc2822(&date) {
                summary.date = Some(parsed.with_timezone(&Utc));
            }
        }
    }
    summary
}

#[async_trait]
impl MailboxSession for ImapMailboxSession {
    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, ImapError> {
        match timeout(self.command_timeout, self.session.examine(folder)).await? {
            Ok(mailbox) => Ok(FolderStatus { exists: mailbox.exists }),
            Err(async_imap::error::Error::No(_)) => Err(ImapError::FolderNotFound(folder.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_envelopes(&mut self, start: u32, end: u32) -> Result<Vec<EnvelopeSummary>, ImapError> {
        let range = format!("{}:{}", start, end);
        let fetches: Vec<async_imap::types::Fetch> = {
            let stream = timeout(
                self.command_timeout,
                self.session.fetch(&range, "(UID ENVELOPE INTERNALDATE)"),
            )
            .await?
            .map_err(|e| ImapError::Fetch(e.to_string()))?;
            timeout(self.command_timeout, stream.try_collect())
                .await?
                .map_err(|e| ImapError::Fetch(e.to_string()))?
        };

        let mut envelopes: Vec<EnvelopeSummary> = fetches.iter().map(envelope_from_fetch).collect();

        if self.gmail_ext {
            match self.gmail_ids(start, end).await {
                Ok(mut ids) => {
                    for envelope in envelopes.iter_mut() {
                        if let Some(found) = ids.remove(&envelope.seq) {
                            envelope.thread_id = found.thread_id;
                            envelope.provider_message_id = found.message_id;
                        }
                    }
                }
                Err(e) => warn!("X-GM id fetch failed for {}: {}", range, e),
            }
        }

        envelopes.sort_by_key(|e| e.seq);
        Ok(envelopes)
    }

    async fn fetch_source(&mut self, seq: u32) -> Result<Vec<u8>, ImapError> {
        let sequence = seq.to_string();
        let fetches: Vec<async_imap::types::Fetch> = {
            let stream = timeout(self.command_timeout, self.session.fetch(&sequence, "BODY.PEEK[]"))
                .await?
                .map_err(|e| ImapError::Fetch(e.to_string()))?;
            timeout(self.command_timeout, stream.try_collect())
                .await?
                .map_err(|e| ImapError::Fetch(e.to_string()))?
        };

        fetches
            .iter()
            .find(|f| f.message == seq)
            .and_then(|f| f.body())
            .map(|b| b.to_vec())
            .ok_or_else(|| ImapError::MissingData(format!("no body returned for message {}", seq)))
    }

    async fn close_folder(&mut self) -> Result<(), ImapError> {
        timeout(self.command_timeout, self.session.close()).await??;
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), ImapError> {
        timeout(self.command_timeout, self.session.logout()).await??;
        Ok(())
    }
}
