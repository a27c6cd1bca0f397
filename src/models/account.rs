// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connected sender mailboxes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which protocol family an account speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OAuth-capable webmail with a send API.
    Gmail,
    /// Generic SMTP/IMAP with static credentials.
    Imap,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Imap => "imap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gmail" => Some(ProviderKind::Gmail),
            "imap" => Some(ProviderKind::Imap),
            _ => None,
        }
    }

    /// Canonical sent folder followed by the single fallback tried when it is missing.
    pub fn sent_folder_candidates(&self) -> [&'static str; 2] {
        match self {
            ProviderKind::Gmail => ["[Gmail]/Sent Mail", "Sent"],
            ProviderKind::Imap => ["Sent", "INBOX.Sent"],
        }
    }

    pub fn default_imap_host(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Gmail => Some("imap.gmail.com"),
            ProviderKind::Imap => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Paused,
    Disconnected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Paused => "paused",
            AccountStatus::Disconnected => "disconnected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "paused" => AccountStatus::Paused,
            "disconnected" => AccountStatus::Disconnected,
            _ => AccountStatus::Active,
        }
    }
}

/// Credential material stored on the account row.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredCredentials {
    OAuth {
        refresh_token: Option<String>,
        access_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    Password {
        username: String,
        password: Option<String>,
    },
}

/// Resolved credential handed to the mailbox and send layers.
#[derive(Clone, PartialEq)]
pub enum Credentials {
    /// Bearer access token for XOAUTH2 and the send API.
    OAuth { user: String, access_token: String },
    /// Static username/password for LOGIN and SMTP AUTH.
    Password { username: String, password: String },
}

impl Credentials {
    pub fn is_oauth(&self) -> bool {
        matches!(self, Credentials::OAuth { .. })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::OAuth { user, access_token } => f
                .debug_struct("OAuth")
                .field("user", user)
                .field("access_token", &mask_secret(access_token))
                .finish(),
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Keeps only a short prefix of a secret for log output.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}...", prefix)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub provider: ProviderKind,
    pub email: String,
    pub display_name: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    #[serde(skip)]
    pub credentials: Option<StoredCredentials>,
    pub status: AccountStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Case-insensitive comparison against the mailbox's own address.
    pub fn is_own_address(&self, address: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(address.trim())
    }

    pub fn imap_endpoint(&self) -> Option<(String, u16)> {
        let host = self
            .imap_host
            .clone()
            .or_else(|| self.provider.default_imap_host().map(str::to_string))?;
        Some((host, self.imap_port.unwrap_or(993)))
    }
}
