// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Open and click beacons.
//!
//! Outgoing HTML gets a 1x1 pixel and every http(s) link routed through
//! `/api/track`. The beacon side only ever sets `opened_at`/`clicked_at`
//! once, so replays from image proxies or double clicks are harmless.

use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::{Captures, Regex};
use thiserror::Error;
use url::Url;

use super::events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
use crate::store::{Store, StoreError};

/// Transparent 1x1 GIF served for open beacons.
pub const TRACKING_PIXEL: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF,
    0x00, 0x00, 0x00, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

pub const TRACK_PATH: &str = "/api/track";

lazy_static! {
    static ref HREF_RE: Regex =
        Regex::new(r#"(?i)(href\s*=\s*)(?:"(https?://[^"]*)"|'(https?://[^']*)')"#).expect("href pattern");
}

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Unknown log id: {0}")]
    UnknownLog(String),
    #[error("Invalid redirect target: {0}")]
    InvalidUrl(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn track_base(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), TRACK_PATH)
}

pub fn open_url(base_url: &str, log_id: &str) -> String {
    format!("{}?type=open&logId={}", track_base(base_url), urlencoding::encode(log_id))
}

pub fn click_url(base_url: &str, log_id: &str, target: &str) -> String {
    format!(
        "{}?type=click&logId={}&url={}",
        track_base(base_url),
        urlencoding::encode(log_id),
        urlencoding::encode(target)
    )
}

fn rewrite_links(html: &str, base_url: &str, log_id: &str) -> String {
    let own = track_base(base_url);
    HREF_RE
        .replace_all(html, |caps: &Captures| {
            let prefix = &caps[1];
            let (target, quote) = match (caps.get(2), caps.get(3)) {
                (Some(m), _) => (m.as_str(), '"'),
                (None, Some(m)) => (m.as_str(), '\''),
                _ => return caps[0].to_string(),
            };
            if target.starts_with(&own) {
                return caps[0].to_string();
            }
            let decoded = target.replace("&amp;", "&");
            format!("{}{}{}{}", prefix, quote, click_url(base_url, log_id, &decoded), quote)
        })
        .into_owned()
}

fn inject_pixel(html: &str, base_url: &str, log_id: &str) -> String {
    let pixel = format!(
        r#"<img src="{}" width="1" height="1" style="display:none;width:1px;height:1px;border:0;" alt="" />"#,
        open_url(base_url, log_id)
    );
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], pixel, &html[pos..]),
        None => format!("{}{}", html, pixel),
    }
}

/// Adds the open pixel and routes every http(s) link through the click beacon.
/// `mailto:`, `tel:` and links already pointing at the beacon are left alone.
pub fn instrument_html(html: &str, base_url: &str, log_id: &str) -> String {
    let rewritten = rewrite_links(html, base_url, log_id);
    inject_pixel(&rewritten, base_url, log_id)
}

/// Only absolute http(s) targets are followed.
pub fn validate_redirect(target: &str) -> Result<Url, TrackingError> {
    let url = Url::parse(target).map_err(|_| TrackingError::InvalidUrl(target.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(TrackingError::InvalidUrl(target.to_string())),
    }
}

/// Records the first open of a sent message. Returns whether this call set it.
pub async fn record_open(store: &Store, events: &EventBus, log_id: &str) -> Result<bool, TrackingError> {
    let record = store
        .messages()
        .get_outbound(log_id)
        .await?
        .ok_or_else(|| TrackingError::UnknownLog(log_id.to_string()))?;

    let first = store.messages().record_open(log_id, Utc::now()).await?;
    if first {
        info!("First open recorded for {}", log_id);
        events
            .publish(
                ChangeEvent::new(&record.user_id, ChangeTable::OutboundRecords, ChangeKind::Update, log_id)
                    .with_thread(record.provider_thread_id, record.lead_id),
            )
            .await;
    } else {
        debug!("Repeat open for {} ignored", log_id);
    }
    Ok(first)
}

/// Records the first click and returns the validated redirect target.
pub async fn record_click(
    store: &Store,
    events: &EventBus,
    log_id: &str,
    target: &str,
) -> Result<Url, TrackingError> {
    let url = validate_redirect(target)?;
    let record = store
        .messages()
        .get_outbound(log_id)
        .await?
        .ok_or_else(|| TrackingError::UnknownLog(log_id.to_string()))?;

    if store.messages().record_click(log_id, Utc::now()).await? {
        info!("First click recorded for {}", log_id);
        events
            .publish(
                ChangeEvent::new(&record.user_id, ChangeTable::OutboundRecords, ChangeKind::Update, log_id)
                    .with_thread(record.provider_thread_id, record.lead_id),
            )
            .await;
    }
    Ok(url)
}
