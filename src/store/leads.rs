// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::StoreError;
use crate::models::{Lead, LeadStatus, SequenceStep};

#[derive(FromRow)]
struct LeadRow {
    id: String,
    user_id: String,
    campaign_id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    company: Option<String>,
    status: String,
    current_step: i64,
}

impl From<LeadRow> for Lead {
    fn from(row: LeadRow) -> Self {
        Lead {
            id: row.id,
            user_id: row.user_id,
            campaign_id: row.campaign_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            company: row.company,
            // Unknown labels written by other tools read as the initial status.
            status: LeadStatus::parse(&row.status).unwrap_or(LeadStatus::NotContacted),
            current_step: row.current_step,
        }
    }
}

const LEAD_COLUMNS: &str =
    "id, user_id, campaign_id, email, first_name, last_name, company, status, current_step";

pub struct LeadRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LeadRepository<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_campaign(&self, user_id: &str, name: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO campaigns (id, user_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(user_id)
            .bind(name)
            .bind(Utc::now())
            .execute(self.pool)
            .await?;
        Ok(id)
    }

    pub async fn insert_step(
        &self,
        user_id: &str,
        campaign_id: &str,
        step_number: i64,
        subject: &str,
        body: &str,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sequence_steps (id, user_id, campaign_id, step_number, subject, body) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(campaign_id)
        .bind(step_number)
        .bind(subject)
        .bind(body)
        .execute(self.pool)
        .await?;
        Ok(id)
    }

    pub async fn insert_lead(
        &self,
        user_id: &str,
        campaign_id: &str,
        email: &str,
        first_name: Option<&str>,
    ) -> Result<Lead, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO leads (id, user_id, campaign_id, email, first_name, status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'not_contacted', ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(campaign_id)
        .bind(email)
        .bind(first_name)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;
        self.get(user_id, &id)
            .await?
            .ok_or_else(|| StoreError::InvalidRow(format!("lead {} vanished after insert", id)))
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<Option<Lead>, StoreError> {
        let sql = format!("SELECT {} FROM leads WHERE id = ? AND user_id = ?", LEAD_COLUMNS);
        let row = sqlx::query_as::<_, LeadRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(Lead::from))
    }

    /// Exact address match within the user's leads. When the address is enrolled
    /// in several campaigns the most recently added lead wins.
    pub async fn find_by_email(&self, user_id: &str, email: &str) -> Result<Option<Lead>, StoreError> {
        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ? AND email = ? COLLATE NOCASE \
             ORDER BY created_at DESC LIMIT 1",
            LEAD_COLUMNS
        );
        let row = sqlx::query_as::<_, LeadRow>(&sql)
            .bind(user_id)
            .bind(email.trim())
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(Lead::from))
    }

    pub async fn set_status(&self, user_id: &str, id: &str, status: LeadStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE leads SET status = ? WHERE id = ? AND user_id = ?")
            .bind(status.as_str())
            .bind(id)
            .bind(user_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Moves an early-stage lead to `replied`; later statuses are left alone.
    pub async fn promote_to_replied(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE leads SET status = 'replied' \
             WHERE id = ? AND status IN ('not_contacted', 'contacted')",
        )
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn first_step(&self, campaign_id: &str) -> Result<Option<SequenceStep>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, i64, Option<String>, Option<String>, i64)>(
            "SELECT id, campaign_id, step_number, subject, body, delay_days FROM sequence_steps \
             WHERE campaign_id = ? ORDER BY step_number ASC LIMIT 1",
        )
        .bind(campaign_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(id, campaign_id, step_number, subject, body, delay_days)| SequenceStep {
            id,
            campaign_id,
            step_number,
            subject,
            body,
            delay_days,
        }))
    }
}
