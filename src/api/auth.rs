// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bearer authentication for the `/api` scope.
//!
//! The middleware resolves the bearer token against `user_sessions` and
//! stores the owning user in the request extensions, where handlers pick it
//! up through the `AuthenticatedUser` extractor. Browsers cannot set headers
//! on an `EventSource`, so the token is also accepted as `access_token` in
//! the query string.

use std::future::{ready, Ready};

use actix_web::{
    dev::{Payload, ServiceRequest, ServiceResponse},
    http::header::{HeaderMap, AUTHORIZATION},
    web::Data,
    Error as ActixError, FromRequest, HttpMessage, HttpRequest,
};
use actix_web_lab::middleware::Next;
use chrono::Utc;
use log::{debug, warn};

use super::errors::ApiError;
use super::AppState;

/// The user a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "access_token")
        .and_then(|(_, v)| urlencoding::decode(v).ok())
        .map(|v| v.into_owned())
        .filter(|t| !t.is_empty())
}

/// Bearer token from the `Authorization` header, else the `access_token` query parameter.
pub fn bearer_token(headers: &HeaderMap, query: &str) -> Option<String> {
    token_from_headers(headers).or_else(|| token_from_query(query))
}

/// Middleware rejecting requests without a live session token.
pub async fn require_bearer(
    req: ServiceRequest,
    next: Next<impl actix_web::body::MessageBody>,
) -> Result<ServiceResponse<impl actix_web::body::MessageBody>, ActixError> {
    let token = match bearer_token(req.headers(), req.query_string()) {
        Some(token) => token,
        None => {
            warn!("Request to {} missing bearer token", req.path());
            return Err(ApiError::Unauthorized.into());
        }
    };

    let state = req.app_data::<Data<AppState>>().cloned().ok_or_else(|| ApiError::InternalError {
        message: "application state not configured".to_string(),
    })?;

    let user_id = state
        .store
        .sessions()
        .user_for_token(&token, Utc::now())
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| {
            warn!("Rejected unknown or expired session token");
            ApiError::Unauthorized
        })?;

    debug!("Request to {} authenticated as {}", req.path(), user_id);
    req.extensions_mut().insert(AuthenticatedUser { user_id });
    next.call(req).await
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .cloned()
                .ok_or(ApiError::Unauthorized),
        )
    }
}
