// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Change notifications for store writes, scoped per user.
//
// Writers (sync engine, send pipeline, beacons, status updates) publish a
// ChangeEvent after their write commits; viewing sessions subscribe with the
// user id they are rendering and only ever see that user's changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    InboundMessages,
    OutboundRecords,
    Leads,
    Accounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub user_id: String,
    pub table: ChangeTable,
    pub kind: ChangeKind,
    pub record_id: String,
    pub thread_id: Option<String>,
    pub lead_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(user_id: &str, table: ChangeTable, kind: ChangeKind, record_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            table,
            kind,
            record_id: record_id.to_string(),
            thread_id: None,
            lead_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_thread(mut self, thread_id: Option<String>, lead_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self.lead_id = lead_id;
        self
    }
}

pub struct Subscription {
    id: String,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }
}

struct Subscriber {
    user_id: String,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<String, Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();

        self.subscribers.write().await.insert(
            id.clone(),
            Subscriber {
                user_id: user_id.to_string(),
                sender: tx,
            },
        );
        info!("New change subscription {} for user {}", id, user_id);

        Subscription { id, receiver: rx }
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        if self.subscribers.write().await.remove(subscription_id).is_some() {
            info!("Change subscription removed: {}", subscription_id);
        }
    }

    /// A subscription is alive while registered and its receiver not dropped.
    pub async fn is_alive(&self, subscription_id: &str) -> bool {
        self.subscribers
            .read()
            .await
            .get(subscription_id)
            .map(|s| !s.sender.is_closed())
            .unwrap_or(false)
    }

    pub async fn publish(&self, event: ChangeEvent) {
        debug!(
            "Publishing {:?} {:?} {} for user {}",
            event.table, event.kind, event.record_id, event.user_id
        );

        let subscribers = self.subscribers.read().await;
        let mut failed = Vec::new();
        for (id, sub) in subscribers.iter().filter(|(_, s)| s.user_id == event.user_id) {
            if sub.sender.send(event.clone()).is_err() {
                failed.push(id.clone());
            }
        }

        if !failed.is_empty() {
            drop(subscribers);
            let mut subscribers = self.subscribers.write().await;
            for id in failed {
                subscribers.remove(&id);
                warn!("Removed closed subscriber: {}", id);
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
