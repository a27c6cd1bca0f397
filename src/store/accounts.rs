// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::StoreError;
use crate::models::{Account, AccountStatus, ProviderKind, StoredCredentials};

#[derive(FromRow)]
struct AccountRow {
    id: String,
    user_id: String,
    provider: String,
    email: String,
    display_name: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<i64>,
    smtp_host: Option<String>,
    smtp_port: Option<i64>,
    username: Option<String>,
    password: Option<String>,
    refresh_token: Option<String>,
    access_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    status: String,
    last_synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let provider = ProviderKind::parse(&row.provider)
            .ok_or_else(|| StoreError::InvalidRow(format!("unknown provider '{}'", row.provider)))?;

        let credentials = match provider {
            ProviderKind::Gmail => StoredCredentials::OAuth {
                refresh_token: row.refresh_token,
                access_token: row.access_token,
                expires_at: row.token_expires_at,
            },
            ProviderKind::Imap => StoredCredentials::Password {
                username: row.username.unwrap_or_else(|| row.email.clone()),
                password: row.password,
            },
        };

        Ok(Account {
            id: row.id,
            user_id: row.user_id,
            provider,
            email: row.email,
            display_name: row.display_name,
            imap_host: row.imap_host,
            imap_port: row.imap_port.and_then(|p| u16::try_from(p).ok()),
            smtp_host: row.smtp_host,
            smtp_port: row.smtp_port.and_then(|p| u16::try_from(p).ok()),
            credentials: Some(credentials),
            status: AccountStatus::from_str(&row.status),
            last_synced_at: row.last_synced_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email, display_name, imap_host, imap_port, \
     smtp_host, smtp_port, username, password, refresh_token, access_token, token_expires_at, \
     status, last_synced_at";

/// Fields needed to register a mailbox.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub provider: ProviderKind,
    pub email: String,
    pub display_name: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub credentials: StoredCredentials,
}

pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: NewAccount) -> Result<Account, StoreError> {
        let id = Uuid::new_v4().to_string();
        let (username, password, refresh_token, access_token, expires_at) = match &new.credentials {
            StoredCredentials::OAuth {
                refresh_token,
                access_token,
                expires_at,
            } => (None, None, refresh_token.clone(), access_token.clone(), *expires_at),
            StoredCredentials::Password { username, password } => {
                (Some(username.clone()), password.clone(), None, None, None)
            }
        };

        sqlx::query(
            "INSERT INTO accounts (id, user_id, provider, email, display_name, imap_host, imap_port, \
             smtp_host, smtp_port, username, password, refresh_token, access_token, token_expires_at, \
             status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(new.provider.as_str())
        .bind(&new.email)
        .bind(&new.display_name)
        .bind(&new.imap_host)
        .bind(new.imap_port.map(i64::from))
        .bind(&new.smtp_host)
        .bind(new.smtp_port.map(i64::from))
        .bind(username)
        .bind(password)
        .bind(refresh_token)
        .bind(access_token)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        debug!("Inserted account {} ({}) for user {}", id, new.email, new.user_id);

        self.get(&id)
            .await?
            .ok_or_else(|| StoreError::InvalidRow(format!("account {} vanished after insert", id)))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    pub async fn list_active_for_user(&self, user_id: &str) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE user_id = ? AND status = 'active' ORDER BY created_at",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    /// Persists a refreshed access token. The refresh token is only replaced when
    /// the provider rotated it.
    pub async fn update_tokens(
        &self,
        id: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        rotated_refresh_token: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET access_token = ?, token_expires_at = ?, \
             refresh_token = COALESCE(?, refresh_token) WHERE id = ?",
        )
        .bind(access_token)
        .bind(expires_at)
        .bind(rotated_refresh_token)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_last_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET last_synced_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: AccountStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Removes the account; dependent messages and records cascade.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
