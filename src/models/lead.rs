// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    NotContacted,
    Contacted,
    Replied,
    Interested,
    NotInterested,
    MeetingBooked,
    Bounced,
    Unsubscribed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::NotContacted => "not_contacted",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Replied => "replied",
            LeadStatus::Interested => "interested",
            LeadStatus::NotInterested => "not_interested",
            LeadStatus::MeetingBooked => "meeting_booked",
            LeadStatus::Bounced => "bounced",
            LeadStatus::Unsubscribed => "unsubscribed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "not_contacted" => LeadStatus::NotContacted,
            "contacted" => LeadStatus::Contacted,
            "replied" => LeadStatus::Replied,
            "interested" => LeadStatus::Interested,
            "not_interested" => LeadStatus::NotInterested,
            "meeting_booked" => LeadStatus::MeetingBooked,
            "bounced" => LeadStatus::Bounced,
            "unsubscribed" => LeadStatus::Unsubscribed,
            _ => return None,
        };
        Some(status)
    }

    /// Terminal statuses stop further sequence steps. Any status may still be set
    /// from any other.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::NotInterested | LeadStatus::Bounced | LeadStatus::Unsubscribed
        )
    }

    /// Statuses an inbound reply may promote to `Replied`.
    pub fn accepts_reply_promotion(&self) -> bool {
        matches!(self, LeadStatus::NotContacted | LeadStatus::Contacted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub status: LeadStatus,
    pub current_step: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: String,
    pub campaign_id: String,
    pub step_number: i64,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub delay_days: i64,
}
