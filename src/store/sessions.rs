// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::StoreError;

/// Bearer tokens issued by the session layer, mapped to user ids.
pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        token: &str,
        user_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_sessions (token, user_id, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, expires_at = excluded.expires_at",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Returns the owning user for a live token.
    pub async fn user_for_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (String, Option<DateTime<Utc>>)>(
            "SELECT user_id, expires_at FROM user_sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.and_then(|(user_id, expires_at)| match expires_at {
            Some(exp) if exp <= now => None,
            _ => Some(user_id),
        }))
    }
}
