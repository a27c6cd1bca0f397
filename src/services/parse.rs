// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::{HeaderValue, Message};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("message source is not valid RFC-822")]
    Unparsable,
    #[error("message has no sender address")]
    MissingSender,
}

/// The fields the sync engine keeps from a raw message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMail {
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_email: Option<String>,
    pub to_name: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

fn first_address(value: &HeaderValue) -> Option<(String, Option<String>)> {
    let addr = match value {
        HeaderValue::Address(addr) => addr,
        HeaderValue::AddressList(list) => list.first()?,
        _ => return None,
    };
    let email = addr.address.as_ref()?.trim().to_string();
    if email.is_empty() {
        return None;
    }
    let name = addr
        .name
        .as_ref()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    Some((email, name))
}

fn first_text(value: &HeaderValue) -> Option<String> {
    match value {
        HeaderValue::Text(text) => Some(text.to_string()),
        HeaderValue::TextList(list) => list.first().map(|t| t.to_string()),
        _ => None,
    }
}

/// Wraps a bare message id in angle brackets so stored keys have one shape.
pub fn normalize_message_id(id: &str) -> String {
    let trimmed = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{}>", trimmed)
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedMail, ParseError> {
    let message = Message::parse(raw).ok_or(ParseError::Unparsable)?;
    let (from_email, from_name) = first_address(message.from()).ok_or(ParseError::MissingSender)?;
    let (to_email, to_name) = match first_address(message.to()) {
        Some((email, name)) => (Some(email), name),
        None => (None, None),
    };

    let date = message
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());

    Ok(ParsedMail {
        from_email,
        from_name,
        to_email,
        to_name,
        subject: message.subject().map(str::to_string),
        message_id: message.message_id().map(normalize_message_id),
        in_reply_to: first_text(message.in_reply_to()).map(|id| normalize_message_id(&id)),
        date,
        body_text: message.body_text(0).map(|b| b.into_owned()),
        body_html: message.body_html(0).map(|b| b.into_owned()),
    })
}
