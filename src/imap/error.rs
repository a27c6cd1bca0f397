// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Operation error: {0}")]
    Operation(String),
}

impl ImapError {
    /// The server refused the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, ImapError::Auth(_))
    }

    /// Network-level failures that are worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ImapError::Connection(_) | ImapError::Tls(_) | ImapError::Timeout(_)
        )
    }

    /// Errors confined to one message; the folder walk continues past them.
    pub fn is_per_item(&self) -> bool {
        matches!(self, ImapError::Parse(_) | ImapError::MissingData(_))
    }
}

impl From<async_imap::error::Error> for ImapError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Parse(e) => ImapError::Parse(e.to_string()),
            async_imap::error::Error::No(msg) => ImapError::Operation(msg),
            async_imap::error::Error::Bad(msg) => ImapError::BadResponse(msg),
            async_imap::error::Error::Io(e) => ImapError::Connection(e.to_string()),
            other => ImapError::Operation(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ImapError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ImapError::Timeout(err.to_string()),
            _ => ImapError::Connection(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ImapError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ImapError::Timeout(err.to_string())
    }
}
