// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The mailbox operations the sync engine needs, independent of transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ImapError;
use crate::models::{Account, Credentials};

/// Result of opening a folder read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderStatus {
    pub exists: u32,
}

/// Envelope-level view of one message, enough to decide whether to fetch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeSummary {
    pub seq: u32,
    pub uid: Option<u32>,
    pub from_email: Option<String>,
    pub from_name: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Provider thread id, present only when the server exposes one.
    pub thread_id: Option<String>,
    /// Provider message id (Gmail's X-GM-MSGID), the key the send API returns.
    pub provider_message_id: Option<String>,
}

/// An authenticated mailbox connection.
///
/// `examine` takes the folder lock; callers must pair it with `close_folder`
/// on every path, including errors.
#[async_trait]
pub trait MailboxSession: Send {
    async fn examine(&mut self, folder: &str) -> Result<FolderStatus, ImapError>;

    /// Envelopes for the inclusive sequence range `start..=end`.
    async fn fetch_envelopes(&mut self, start: u32, end: u32) -> Result<Vec<EnvelopeSummary>, ImapError>;

    /// Full RFC-822 source of one message by sequence number.
    async fn fetch_source(&mut self, seq: u32) -> Result<Vec<u8>, ImapError>;

    async fn close_folder(&mut self) -> Result<(), ImapError>;

    async fn logout(&mut self) -> Result<(), ImapError>;
}

/// Opens authenticated sessions for an account.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(
        &self,
        account: &Account,
        credentials: &Credentials,
    ) -> Result<Box<dyn MailboxSession>, ImapError>;
}

/// Sequence range covering the last `count` of `exists` messages.
pub fn tail_range(exists: u32, count: u32) -> Option<(u32, u32)> {
    if exists == 0 || count == 0 {
        return None;
    }
    let start = exists.saturating_sub(count).saturating_add(1).max(1);
    Some((start, exists))
}
