// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{FromRow, SqlitePool};

use super::StoreError;
use crate::models::{InboundMessage, OutboundRecord, OutboundStatus};

#[derive(FromRow)]
struct InboundRow {
    id: String,
    user_id: String,
    account_id: String,
    lead_id: Option<String>,
    campaign_id: Option<String>,
    thread_id: Option<String>,
    message_id: String,
    from_email: String,
    from_name: Option<String>,
    to_email: Option<String>,
    to_name: Option<String>,
    subject: Option<String>,
    body_text: Option<String>,
    body_html: Option<String>,
    snippet: Option<String>,
    received_at: DateTime<Utc>,
    is_read: bool,
    tags: Option<String>,
}

impl TryFrom<InboundRow> for InboundMessage {
    type Error = StoreError;

    fn try_from(row: InboundRow) -> Result<Self, Self::Error> {
        let tags: HashMap<String, String> = match row.tags.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => HashMap::new(),
        };
        Ok(InboundMessage {
            id: row.id,
            user_id: row.user_id,
            account_id: row.account_id,
            lead_id: row.lead_id,
            campaign_id: row.campaign_id,
            thread_id: row.thread_id,
            message_id: row.message_id,
            from_email: row.from_email,
            from_name: row.from_name,
            to_email: row.to_email,
            to_name: row.to_name,
            subject: row.subject,
            body_text: row.body_text,
            body_html: row.body_html,
            snippet: row.snippet,
            received_at: row.received_at,
            is_read: row.is_read,
            tags,
        })
    }
}

#[derive(FromRow)]
struct OutboundRow {
    id: String,
    user_id: String,
    account_id: String,
    lead_id: Option<String>,
    campaign_id: Option<String>,
    sequence_step_id: Option<String>,
    recipient: String,
    subject: Option<String>,
    body_html: Option<String>,
    provider_message_id: Option<String>,
    rfc_message_id: Option<String>,
    provider_thread_id: Option<String>,
    status: String,
    error_detail: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    replied_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<OutboundRow> for OutboundRecord {
    fn from(row: OutboundRow) -> Self {
        OutboundRecord {
            id: row.id,
            user_id: row.user_id,
            account_id: row.account_id,
            lead_id: row.lead_id,
            campaign_id: row.campaign_id,
            sequence_step_id: row.sequence_step_id,
            recipient: row.recipient,
            subject: row.subject,
            body_html: row.body_html,
            provider_message_id: row.provider_message_id,
            rfc_message_id: row.rfc_message_id,
            provider_thread_id: row.provider_thread_id,
            status: OutboundStatus::from_str(&row.status),
            error_detail: row.error_detail,
            sent_at: row.sent_at,
            opened_at: row.opened_at,
            clicked_at: row.clicked_at,
            replied_at: row.replied_at,
            bounced_at: row.bounced_at,
            created_at: row.created_at,
        }
    }
}

const INBOUND_COLUMNS: &str = "m.id, m.user_id, m.account_id, m.lead_id, m.campaign_id, m.thread_id, \
     m.message_id, m.from_email, m.from_name, m.to_email, m.to_name, m.subject, m.body_text, \
     m.body_html, m.snippet, m.received_at, m.is_read, m.tags";

const OUTBOUND_COLUMNS: &str = "o.id, o.user_id, o.account_id, o.lead_id, o.campaign_id, \
     o.sequence_step_id, o.recipient, o.subject, o.body_html, o.provider_message_id, \
     o.rfc_message_id, o.provider_thread_id, o.status, o.error_detail, o.sent_at, o.opened_at, \
     o.clicked_at, o.replied_at, o.bounced_at, o.created_at";

const UPSERT_INBOUND: &str = "INSERT INTO inbound_messages (id, user_id, account_id, lead_id, \
     campaign_id, thread_id, message_id, from_email, from_name, to_email, to_name, subject, \
     body_text, body_html, snippet, received_at, is_read, tags, created_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(account_id, message_id) DO UPDATE SET \
         lead_id = COALESCE(excluded.lead_id, inbound_messages.lead_id), \
         campaign_id = COALESCE(excluded.campaign_id, inbound_messages.campaign_id), \
         thread_id = COALESCE(excluded.thread_id, inbound_messages.thread_id), \
         subject = excluded.subject, \
         body_text = excluded.body_text, \
         body_html = excluded.body_html, \
         snippet = excluded.snippet";

pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    // --- Inbound ---

    /// Upserts a batch keyed on (account, message identifier) inside one transaction.
    /// Read state and tags set locally survive a re-sync.
    pub async fn upsert_inbound_batch(&self, batch: &[InboundMessage]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for msg in batch {
            let tags = if msg.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.tags)?)
            };
            affected += sqlx::query(UPSERT_INBOUND)
                .bind(&msg.id)
                .bind(&msg.user_id)
                .bind(&msg.account_id)
                .bind(&msg.lead_id)
                .bind(&msg.campaign_id)
                .bind(&msg.thread_id)
                .bind(&msg.message_id)
                .bind(&msg.from_email)
                .bind(&msg.from_name)
                .bind(&msg.to_email)
                .bind(&msg.to_name)
                .bind(&msg.subject)
                .bind(&msg.body_text)
                .bind(&msg.body_html)
                .bind(&msg.snippet)
                .bind(msg.received_at)
                .bind(msg.is_read)
                .bind(tags)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        debug!("Upserted {} inbound messages", batch.len());
        Ok(affected)
    }

    pub async fn get_inbound(&self, id: &str) -> Result<Option<InboundMessage>, StoreError> {
        let sql = format!("SELECT {} FROM inbound_messages m WHERE m.id = ?", INBOUND_COLUMNS);
        let row = sqlx::query_as::<_, InboundRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        row.map(InboundMessage::try_from).transpose()
    }

    pub async fn count_inbound_with_message_id(&self, account_id: &str, message_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM inbound_messages WHERE account_id = ? AND message_id = ?",
        )
        .bind(account_id)
        .bind(message_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Most recent inbound rows for the unified list.
    pub async fn list_recent_inbound(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM inbound_messages m WHERE m.user_id = ? \
             ORDER BY m.received_at DESC LIMIT ?",
            INBOUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, InboundRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(InboundMessage::try_from).collect()
    }

    pub async fn inbound_for_thread_or_lead(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
        lead_id: Option<&str>,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        if thread_id.is_none() && lead_id.is_none() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM inbound_messages m WHERE m.user_id = ? \
             AND ((? IS NOT NULL AND m.thread_id = ?) OR (? IS NOT NULL AND m.lead_id = ?))",
            INBOUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, InboundRow>(&sql)
            .bind(user_id)
            .bind(thread_id)
            .bind(thread_id)
            .bind(lead_id)
            .bind(lead_id)
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(InboundMessage::try_from).collect()
    }

    /// Inbound rows exchanged between two addresses, in either direction.
    pub async fn inbound_between(
        &self,
        user_id: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<InboundMessage>, StoreError> {
        let sql = format!(
            "SELECT {} FROM inbound_messages m WHERE m.user_id = ? AND ( \
                 (m.from_email = ? COLLATE NOCASE AND m.to_email = ? COLLATE NOCASE) OR \
                 (m.from_email = ? COLLATE NOCASE AND m.to_email = ? COLLATE NOCASE))",
            INBOUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, InboundRow>(&sql)
            .bind(user_id)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(self.pool)
            .await?;
        rows.into_iter().map(InboundMessage::try_from).collect()
    }

    pub async fn set_read(&self, user_id: &str, id: &str, read: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE inbound_messages SET is_read = ? WHERE id = ? AND user_id = ?")
            .bind(read)
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_tags(
        &self,
        user_id: &str,
        id: &str,
        tags: &HashMap<String, String>,
    ) -> Result<bool, StoreError> {
        let json = serde_json::to_string(tags)?;
        let result = sqlx::query("UPDATE inbound_messages SET tags = ? WHERE id = ? AND user_id = ?")
            .bind(json)
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Outbound ---

    pub async fn insert_outbound(&self, record: &OutboundRecord) -> Result<(), StoreError> {
        self.write_outbound(record, false).await.map(|_| ())
    }

    /// Insert-if-absent used by sent-folder sync. Conflicts on either the provider
    /// or RFC message id leave the existing row untouched.
    pub async fn upsert_outbound(&self, record: &OutboundRecord) -> Result<bool, StoreError> {
        self.write_outbound(record, true).await
    }

    async fn write_outbound(&self, r: &OutboundRecord, ignore_conflict: bool) -> Result<bool, StoreError> {
        let sql = format!(
            "INSERT INTO outbound_records (id, user_id, account_id, lead_id, campaign_id, \
             sequence_step_id, recipient, subject, body_html, provider_message_id, rfc_message_id, \
             provider_thread_id, status, error_detail, sent_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){}",
            if ignore_conflict { " ON CONFLICT DO NOTHING" } else { "" }
        );
        let result = sqlx::query(&sql)
            .bind(&r.id)
            .bind(&r.user_id)
            .bind(&r.account_id)
            .bind(&r.lead_id)
            .bind(&r.campaign_id)
            .bind(&r.sequence_step_id)
            .bind(&r.recipient)
            .bind(&r.subject)
            .bind(&r.body_html)
            .bind(&r.provider_message_id)
            .bind(&r.rfc_message_id)
            .bind(&r.provider_thread_id)
            .bind(r.status.as_str())
            .bind(&r.error_detail)
            .bind(r.sent_at)
            .bind(r.created_at)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_outbound(&self, id: &str) -> Result<Option<OutboundRecord>, StoreError> {
        let sql = format!("SELECT {} FROM outbound_records o WHERE o.id = ?", OUTBOUND_COLUMNS);
        let row = sqlx::query_as::<_, OutboundRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(OutboundRecord::from))
    }

    pub async fn count_outbound_for_account(&self, account_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM outbound_records WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    pub async fn outbound_for_thread_or_lead(
        &self,
        user_id: &str,
        thread_id: Option<&str>,
        lead_id: Option<&str>,
    ) -> Result<Vec<OutboundRecord>, StoreError> {
        if thread_id.is_none() && lead_id.is_none() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM outbound_records o WHERE o.user_id = ? \
             AND ((? IS NOT NULL AND o.provider_thread_id = ?) OR (? IS NOT NULL AND o.lead_id = ?))",
            OUTBOUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, OutboundRow>(&sql)
            .bind(user_id)
            .bind(thread_id)
            .bind(thread_id)
            .bind(lead_id)
            .bind(lead_id)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(OutboundRecord::from).collect())
    }

    /// Outbound rows between two addresses; the sender side comes from the account.
    pub async fn outbound_between(
        &self,
        user_id: &str,
        a: &str,
        b: &str,
    ) -> Result<Vec<OutboundRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM outbound_records o JOIN accounts acc ON acc.id = o.account_id \
             WHERE o.user_id = ? AND ( \
                 (acc.email = ? COLLATE NOCASE AND o.recipient = ? COLLATE NOCASE) OR \
                 (acc.email = ? COLLATE NOCASE AND o.recipient = ? COLLATE NOCASE))",
            OUTBOUND_COLUMNS
        );
        let rows = sqlx::query_as::<_, OutboundRow>(&sql)
            .bind(user_id)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(OutboundRecord::from).collect())
    }

    /// Sets `opened_at` only the first time. Returns whether anything changed.
    pub async fn record_open(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbound_records SET opened_at = ?, \
             status = CASE WHEN status IN ('sent', 'delivered') THEN 'opened' ELSE status END \
             WHERE id = ? AND opened_at IS NULL",
        )
        .bind(at)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets `clicked_at` only the first time. A click implies an open.
    pub async fn record_click(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbound_records SET clicked_at = ?, opened_at = COALESCE(opened_at, ?), \
             status = CASE WHEN status IN ('sent', 'delivered', 'opened') THEN 'clicked' ELSE status END \
             WHERE id = ? AND clicked_at IS NULL",
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamps `replied_at` on the lead's most recent send that has not been
    /// replied to yet.
    pub async fn mark_latest_replied(&self, lead_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbound_records SET replied_at = ?, status = 'replied' \
             WHERE id = ( \
                 SELECT id FROM outbound_records \
                 WHERE lead_id = ? AND replied_at IS NULL AND status NOT IN ('failed', 'bounced') \
                 ORDER BY COALESCE(sent_at, created_at) DESC LIMIT 1)",
        )
        .bind(at)
        .bind(lead_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
