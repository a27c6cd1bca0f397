// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Optimistic outbound items for one viewing session.
//!
//! A send shows up in the open thread immediately as `Pending`. The send
//! result moves it to `Committed` or `Rejected`; a committed item disappears
//! once the stored row it became is visible, so the thread never shows the
//! same message twice.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::send::SendResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PendingState {
    Pending,
    Committed {
        provider_message_id: String,
        provider_thread_id: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingItem {
    pub local_id: String,
    pub thread_id: Option<String>,
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: PendingState,
}

#[derive(Debug, Default)]
pub struct OptimisticOutbox {
    items: Vec<PendingItem>,
    // Stored rows seen before their send call returned.
    settled: HashSet<String>,
}

impl OptimisticOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, thread_id: Option<String>, to: &str, subject: &str, html_body: &str) -> PendingItem {
        let item = PendingItem {
            local_id: Uuid::new_v4().to_string(),
            thread_id,
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            created_at: Utc::now(),
            state: PendingState::Pending,
        };
        self.items.push(item.clone());
        item
    }

    fn pending_mut(&mut self, local_id: &str) -> Option<&mut PendingItem> {
        self.items
            .iter_mut()
            .find(|i| i.local_id == local_id && i.state == PendingState::Pending)
    }

    /// Pending -> Committed. Returns the updated item, or `None` when it was
    /// already settled by the stored row or is not pending.
    pub fn commit(&mut self, local_id: &str, result: &SendResult) -> Option<PendingItem> {
        if self.settled.remove(&result.provider_message_id) {
            self.items.retain(|i| i.local_id != local_id);
            return None;
        }
        let item = self.pending_mut(local_id)?;
        item.state = PendingState::Committed {
            provider_message_id: result.provider_message_id.clone(),
            provider_thread_id: result.provider_thread_id.clone(),
        };
        if item.thread_id.is_none() {
            item.thread_id = result.provider_thread_id.clone();
        }
        Some(item.clone())
    }

    /// Pending -> Rejected. The item stays visible until dismissed.
    pub fn reject(&mut self, local_id: &str, reason: &str) -> Option<PendingItem> {
        let item = self.pending_mut(local_id)?;
        item.state = PendingState::Rejected {
            reason: reason.to_string(),
        };
        Some(item.clone())
    }

    /// Drops the committed item matching a stored row. Returns whether one was dropped.
    pub fn settle(&mut self, provider_message_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| {
            !matches!(&i.state, PendingState::Committed { provider_message_id: id, .. } if id == provider_message_id)
        });
        if self.items.len() == before {
            if self.items.iter().any(|i| i.state == PendingState::Pending) {
                self.settled.insert(provider_message_id.to_string());
            }
            return false;
        }
        true
    }

    pub fn dismiss(&mut self, local_id: &str) -> bool {
        let before = self.items.len();
        self.items
            .retain(|i| !(i.local_id == local_id && matches!(i.state, PendingState::Rejected { .. })));
        self.items.len() != before
    }

    /// Items to overlay on a thread; `None` selects items not yet bound to a thread.
    pub fn for_thread(&self, thread_id: Option<&str>) -> Vec<PendingItem> {
        self.items
            .iter()
            .filter(|i| i.thread_id.as_deref() == thread_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
