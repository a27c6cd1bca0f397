// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A received message (or a conversation row written by the send pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub lead_id: Option<String>,
    pub campaign_id: Option<String>,
    pub thread_id: Option<String>,
    /// RFC Message-ID, the natural dedup key.
    pub message_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_email: Option<String>,
    pub to_name: Option<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub tags: HashMap<String, String>,
}

impl InboundMessage {
    pub fn status_tag(&self) -> Option<&str> {
        self.tags.get("status").map(String::as_str)
    }
}

/// Lifecycle of a sent message. Beacons only move it forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundStatus {
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Bounced,
    Failed,
}

impl OutboundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundStatus::Queued => "queued",
            OutboundStatus::Sent => "sent",
            OutboundStatus::Delivered => "delivered",
            OutboundStatus::Opened => "opened",
            OutboundStatus::Clicked => "clicked",
            OutboundStatus::Replied => "replied",
            OutboundStatus::Bounced => "bounced",
            OutboundStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "sent" => OutboundStatus::Sent,
            "delivered" => OutboundStatus::Delivered,
            "opened" => OutboundStatus::Opened,
            "clicked" => OutboundStatus::Clicked,
            "replied" => OutboundStatus::Replied,
            "bounced" => OutboundStatus::Bounced,
            "failed" => OutboundStatus::Failed,
            _ => OutboundStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub id: String,
    pub user_id: String,
    pub account_id: String,
    pub lead_id: Option<String>,
    pub campaign_id: Option<String>,
    pub sequence_step_id: Option<String>,
    pub recipient: String,
    pub subject: Option<String>,
    pub body_html: Option<String>,
    pub provider_message_id: Option<String>,
    pub rfc_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub status: OutboundStatus,
    pub error_detail: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboundRecord {
    /// Key used when merging with inbound rows in a timeline.
    pub fn dedup_key(&self) -> Option<&str> {
        self.rfc_message_id
            .as_deref()
            .or(self.provider_message_id.as_deref())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.sent_at.unwrap_or(self.created_at)
    }
}

/// Preview length stored with inbound rows.
pub const SNIPPET_CHARS: usize = 200;

/// Strips tags and collapses whitespace, then cuts to `max_chars`.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(max_chars);
    let mut in_tag = false;
    let mut last_space = true;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_whitespace() => {
                if !last_space {
                    out.push(' ');
                    last_space = true;
                }
            }
            c => {
                out.push(c);
                last_space = false;
            }
        }
    }
    let trimmed = out.trim();
    trimmed.chars().take(max_chars).collect()
}
