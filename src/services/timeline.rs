// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unified conversation view over received and sent rows.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
use crate::models::{InboundMessage, LeadStatus, OutboundRecord};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("Message not found: {0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum TimelineItem {
    Inbound(InboundMessage),
    Outbound(OutboundRecord),
}

impl TimelineItem {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineItem::Inbound(m) => m.received_at,
            TimelineItem::Outbound(r) => r.timestamp(),
        }
    }

    /// Provider/RFC message id, falling back to the row id.
    pub fn dedup_key(&self) -> &str {
        match self {
            TimelineItem::Inbound(m) => &m.message_id,
            TimelineItem::Outbound(r) => r.dedup_key().unwrap_or(&r.id),
        }
    }

    pub fn lead_id(&self) -> Option<&str> {
        match self {
            TimelineItem::Inbound(m) => m.lead_id.as_deref(),
            TimelineItem::Outbound(r) => r.lead_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadQuery {
    pub thread_id: Option<String>,
    pub lead_id: Option<String>,
    pub participant_a: Option<String>,
    pub participant_b: Option<String>,
}

impl ThreadQuery {
    fn participants(&self) -> Option<(&str, &str)> {
        match (self.participant_a.as_deref(), self.participant_b.as_deref()) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => Some((a, b)),
            _ => None,
        }
    }
}

/// Where a thread status change ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", content = "id", rename_all = "snake_case")]
pub enum StatusTarget {
    Lead(String),
    Tag(String),
}

/// Merges an outbound and an inbound stream into one ascending timeline.
/// Sent rows win over their conversation copies sharing a message id.
pub fn merge_timeline(outbound: Vec<OutboundRecord>, inbound: Vec<InboundMessage>) -> Vec<TimelineItem> {
    let mut seen = HashSet::new();
    let mut items: Vec<TimelineItem> = outbound
        .into_iter()
        .map(TimelineItem::Outbound)
        .chain(inbound.into_iter().map(TimelineItem::Inbound))
        .filter(|item| seen.insert(item.dedup_key().to_string()))
        .collect();

    items.sort_by(|a, b| {
        a.timestamp()
            .cmp(&b.timestamp())
            .then_with(|| a.dedup_key().cmp(b.dedup_key()))
    });
    items
}

pub struct TimelineReconciler {
    store: Store,
    events: EventBus,
}

impl TimelineReconciler {
    pub fn new(store: Store, events: EventBus) -> Self {
        Self { store, events }
    }

    pub async fn get_thread(&self, user_id: &str, query: &ThreadQuery) -> Result<Vec<TimelineItem>, TimelineError> {
        let messages = self.store.messages();
        let thread_id = query.thread_id.as_deref().filter(|t| !t.is_empty());
        let lead_id = query.lead_id.as_deref().filter(|l| !l.is_empty());

        let mut outbound = messages.outbound_for_thread_or_lead(user_id, thread_id, lead_id).await?;
        let mut inbound = messages.inbound_for_thread_or_lead(user_id, thread_id, lead_id).await?;

        if outbound.len() + inbound.len() <= 1 {
            if let Some((a, b)) = query.participants() {
                debug!("Thread lookup sparse, falling back to participants {} / {}", a, b);
                outbound.extend(messages.outbound_between(user_id, a, b).await?);
                inbound.extend(messages.inbound_between(user_id, a, b).await?);
            }
        }

        Ok(merge_timeline(outbound, inbound))
    }

    /// The linked lead's status, else the status tag of the newest received message.
    pub async fn display_status(&self, user_id: &str, items: &[TimelineItem]) -> Result<Option<String>, TimelineError> {
        if let Some(lead_id) = items.iter().rev().find_map(TimelineItem::lead_id) {
            if let Some(lead) = self.store.leads().get(user_id, lead_id).await? {
                return Ok(Some(lead.status.as_str().to_string()));
            }
        }
        Ok(items.iter().rev().find_map(|item| match item {
            TimelineItem::Inbound(m) => m.status_tag().map(str::to_string),
            TimelineItem::Outbound(_) => None,
        }))
    }

    /// Sets the status of the conversation `message_id` belongs to. A linked or
    /// resolvable lead takes the status; otherwise it is kept as a tag.
    pub async fn set_thread_status(
        &self,
        user_id: &str,
        message_id: &str,
        status: LeadStatus,
    ) -> Result<StatusTarget, TimelineError> {
        let message = self
            .store
            .messages()
            .get_inbound(message_id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| TimelineError::NotFound(message_id.to_string()))?;

        let leads = self.store.leads();
        let lead = match &message.lead_id {
            Some(id) => leads.get(user_id, id).await?,
            None => match leads.find_by_email(user_id, &message.from_email).await? {
                Some(lead) => Some(lead),
                None => match &message.to_email {
                    Some(to) => leads.find_by_email(user_id, to).await?,
                    None => None,
                },
            },
        };

        if let Some(lead) = lead {
            leads.set_status(user_id, &lead.id, status).await?;
            info!("Lead {} set to {} from message {}", lead.id, status.as_str(), message.id);
            self.events
                .publish(ChangeEvent::new(user_id, ChangeTable::Leads, ChangeKind::Update, &lead.id))
                .await;
            return Ok(StatusTarget::Lead(lead.id));
        }

        let mut tags = message.tags.clone();
        tags.insert("status".to_string(), status.as_str().to_string());
        self.store.messages().set_tags(user_id, &message.id, &tags).await?;
        info!("No lead for message {}, status kept as tag", message.id);
        self.events
            .publish(
                ChangeEvent::new(user_id, ChangeTable::InboundMessages, ChangeKind::Update, &message.id)
                    .with_thread(message.thread_id.clone(), None),
            )
            .await;
        Ok(StatusTarget::Tag(message.id))
    }
}
