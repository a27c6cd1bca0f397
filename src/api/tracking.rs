// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Public beacon endpoint hit by recipients' mail clients.
//!
//! Requests carry no session token. A beacon for an unknown or failing log
//! still answers with the pixel or the redirect so the recipient never sees
//! a broken image or a dead link.

use actix_web::{
    get,
    http::header::{self, CacheControl, CacheDirective},
    web::{Data, Query},
    HttpResponse,
};
use log::{error, warn};
use serde::Deserialize;

use super::errors::ApiError;
use super::AppState;
use crate::services::tracking::{self, TrackingError, TRACKING_PIXEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    Open,
    Click,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackQuery {
    #[serde(rename = "type")]
    pub kind: BeaconKind,
    pub log_id: String,
    pub url: Option<String>,
}

fn pixel_response() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/gif")
        .insert_header(CacheControl(vec![
            CacheDirective::NoStore,
            CacheDirective::NoCache,
            CacheDirective::MustRevalidate,
        ]))
        .insert_header((header::PRAGMA, "no-cache"))
        .body(TRACKING_PIXEL.to_vec())
}

fn redirect_response(target: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, target))
        .insert_header(CacheControl(vec![CacheDirective::NoStore]))
        .finish()
}

#[get("/api/track")]
pub async fn track(state: Data<AppState>, query: Query<TrackQuery>) -> Result<HttpResponse, ApiError> {
    match query.kind {
        BeaconKind::Open => {
            match tracking::record_open(&state.store, &state.events, &query.log_id).await {
                Ok(_) => {}
                Err(TrackingError::UnknownLog(id)) => warn!("Open beacon for unknown log {}", id),
                Err(e) => error!("Failed to record open for {}: {}", query.log_id, e),
            }
            Ok(pixel_response())
        }
        BeaconKind::Click => {
            let target = query.url.as_deref().ok_or_else(|| ApiError::BadRequest {
                message: "url is required for click beacons".to_string(),
            })?;
            let url = match tracking::record_click(&state.store, &state.events, &query.log_id, target).await {
                Ok(url) => url,
                Err(TrackingError::InvalidUrl(_)) => {
                    return Err(TrackingError::InvalidUrl(target.to_string()).into());
                }
                Err(e) => {
                    warn!("Click for {} not recorded: {}", query.log_id, e);
                    tracking::validate_redirect(target)?
                }
            };
            Ok(redirect_response(url.as_str()))
        }
    }
}
