// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use actix_web::{
    delete, get, post,
    web::{Data, Json, Path, Query},
    HttpResponse,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::auth::AuthenticatedUser;
use super::errors::ApiError;
use super::AppState;
use crate::models::{LeadStatus, ProviderKind, StoredCredentials};
use crate::services::{PendingItem, SendRequest, SessionIdentity, ThreadQuery, ThreadRef, TimelineItem};
use crate::store::NewAccount;

const INBOX_PAGE_MAX: i64 = 200;

// --- Request types ---

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[validate(length(min = 1, message = "accountId is required"))]
    pub account_id: String,
    /// Window size; omitted or zero selects the configured default.
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStatusRequest {
    #[validate(length(min = 1, message = "messageId is required"))]
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    #[serde(default = "default_true")]
    pub read: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConnectGoogleRequest {
    #[validate(length(min = 1, message = "code is required"))]
    pub code: String,
    #[validate(email(message = "email must be an email address"))]
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Overrides the configured redirect URI.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenThreadRequest {
    pub thread_id: Option<String>,
    pub lead_id: Option<String>,
}

impl OpenThreadRequest {
    fn into_thread_ref(self) -> Option<ThreadRef> {
        let thread_id = self.thread_id.filter(|t| !t.is_empty());
        let lead_id = self.lead_id.filter(|l| !l.is_empty());
        if thread_id.is_none() && lead_id.is_none() {
            return None;
        }
        Some(ThreadRef { thread_id, lead_id })
    }
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub items: Vec<TimelineItem>,
    pub status: Option<String>,
    pub pending: Vec<PendingItem>,
}

// --- Helpers ---

/// Fails unless the viewing session exists and belongs to `user`.
async fn owned_session(state: &AppState, user: &AuthenticatedUser, session_id: &str) -> Result<(), ApiError> {
    match state.coordinator.session_identity(session_id).await {
        None => Err(ApiError::NotFound {
            resource: format!("session {}", session_id),
        }),
        Some(identity) if identity.user_id != user.user_id => Err(ApiError::Forbidden {
            message: format!("session {} belongs to another user", session_id),
        }),
        Some(_) => Ok(()),
    }
}

fn session_param(query: &SessionQuery) -> Option<&str> {
    query.session_id.as_deref().filter(|s| !s.is_empty())
}

// === Sync ===

#[post("/sync")]
pub async fn sync_account(
    state: Data<AppState>,
    user: AuthenticatedUser,
    payload: Json<SyncRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let report = state
        .coordinator
        .run_sync(&user.user_id, &payload.account_id, payload.limit.unwrap_or(0), false)
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

#[get("/accounts/{account_id}/sync-state")]
pub async fn account_sync_state(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let account_id = path.into_inner();
    let account = state
        .store
        .accounts()
        .get(&account_id)
        .await?
        .filter(|a| a.owned_by(&user.user_id))
        .ok_or_else(|| ApiError::NotFound {
            resource: format!("account {}", account_id),
        })?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "account": account,
        "sync": state.coordinator.account_state(&account_id).unwrap_or_default(),
    })))
}

// === Accounts ===

#[post("/oauth/google/exchange")]
pub async fn connect_google(
    state: Data<AppState>,
    user: AuthenticatedUser,
    payload: Json<ConnectGoogleRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let payload = payload.into_inner();
    let redirect_uri = payload
        .redirect_uri
        .clone()
        .or_else(|| state.settings.oauth.google.redirect_uri.clone())
        .ok_or_else(|| ApiError::BadRequest {
            message: "redirectUri is required".to_string(),
        })?;

    let tokens = state.credentials.exchange_code(&payload.code, &redirect_uri).await?;
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in);

    let account = state
        .store
        .accounts()
        .insert(NewAccount {
            user_id: user.user_id.clone(),
            provider: ProviderKind::Gmail,
            email: payload.email.trim().to_lowercase(),
            display_name: payload.display_name,
            imap_host: None,
            imap_port: None,
            smtp_host: None,
            smtp_port: None,
            credentials: StoredCredentials::OAuth {
                refresh_token: tokens.refresh_token,
                access_token: Some(tokens.access_token),
                expires_at: Some(expires_at),
            },
        })
        .await?;

    info!("User {} connected mailbox {} ({})", user.user_id, account.email, account.id);
    Ok(HttpResponse::Created().json(account))
}

// === Send ===

#[post("/send")]
pub async fn send_message(
    state: Data<AppState>,
    user: AuthenticatedUser,
    query: Query<SessionQuery>,
    payload: Json<SendRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let request = payload.into_inner();

    let session_id = session_param(&query);
    let pending = match session_id {
        Some(id) => {
            owned_session(&state, &user, id).await?;
            state.coordinator.begin_send(id, &request).await
        }
        None => None,
    };

    let outcome = state.send.send(&user.user_id, request).await;

    if let (Some(id), Some(item)) = (session_id, &pending) {
        match &outcome {
            Ok(result) => state.coordinator.complete_send(id, &item.local_id, Ok(result)).await,
            Err(e) => {
                let reason = e.to_string();
                state.coordinator.complete_send(id, &item.local_id, Err(&reason)).await
            }
        }
    }

    let result = outcome?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "providerMessageId": result.provider_message_id,
        "providerThreadId": result.provider_thread_id,
        "localId": pending.map(|p| p.local_id),
    })))
}

// === Timeline ===

#[get("/thread")]
pub async fn get_thread(
    state: Data<AppState>,
    user: AuthenticatedUser,
    query: Query<ThreadQuery>,
    session: Query<SessionQuery>,
) -> Result<HttpResponse, ApiError> {
    let has_key = [&query.thread_id, &query.lead_id, &query.participant_a]
        .iter()
        .any(|v| v.as_deref().map_or(false, |s| !s.is_empty()));
    if !has_key {
        return Err(ApiError::BadRequest {
            message: "threadId, leadId or participants are required".to_string(),
        });
    }

    let items = state.timeline.get_thread(&user.user_id, &query).await?;
    let status = state.timeline.display_status(&user.user_id, &items).await?;

    let pending = match session_param(&session) {
        Some(id) => {
            owned_session(&state, &user, id).await?;
            state.coordinator.pending_for_thread(id, query.thread_id.as_deref()).await
        }
        None => Vec::new(),
    };

    debug!("Thread lookup for {} returned {} items", user.user_id, items.len());
    Ok(HttpResponse::Ok().json(ThreadResponse { items, status, pending }))
}

#[post("/thread/status")]
pub async fn set_thread_status(
    state: Data<AppState>,
    user: AuthenticatedUser,
    payload: Json<ThreadStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    payload.validate()?;
    let status = LeadStatus::parse(&payload.status).ok_or_else(|| ApiError::BadRequest {
        message: format!("unknown status '{}'", payload.status),
    })?;

    let target = state
        .timeline
        .set_thread_status(&user.user_id, &payload.message_id, status)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": status.as_str(),
        "applied": target,
    })))
}

// === Messages ===

#[get("/inbox")]
pub async fn list_inbox(
    state: Data<AppState>,
    user: AuthenticatedUser,
    query: Query<InboxQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, INBOX_PAGE_MAX);
    let messages = state.store.messages().list_recent_inbound(&user.user_id, limit).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "messages": messages,
        "count": messages.len(),
    })))
}

#[post("/messages/{message_id}/read")]
pub async fn mark_read(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<String>,
    payload: Json<ReadRequest>,
) -> Result<HttpResponse, ApiError> {
    let message_id = path.into_inner();
    let updated = state
        .store
        .messages()
        .set_read(&user.user_id, &message_id, payload.read)
        .await?;
    if !updated {
        return Err(ApiError::NotFound {
            resource: format!("message {}", message_id),
        });
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": message_id,
        "isRead": payload.read,
    })))
}

// === Viewing sessions ===

#[post("/sessions/{session_id}/visibility")]
pub async fn set_visibility(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<String>,
    payload: Json<VisibilityRequest>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    owned_session(&state, &user, &session_id).await?;
    state.coordinator.set_visible(&session_id, payload.visible).await;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/sessions/{session_id}/thread")]
pub async fn set_open_thread(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<String>,
    payload: Json<OpenThreadRequest>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    owned_session(&state, &user, &session_id).await?;
    state
        .coordinator
        .set_open_thread(&session_id, payload.into_inner().into_thread_ref())
        .await;
    Ok(HttpResponse::NoContent().finish())
}

/// Rebinds a viewing session to the user of the presented token.
#[post("/sessions/{session_id}/identity")]
pub async fn change_identity(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<String>,
) -> Result<HttpResponse, ApiError> {
    let session_id = path.into_inner();
    let changed = state
        .coordinator
        .change_identity(&session_id, SessionIdentity { user_id: user.user_id.clone() })
        .await;
    if !changed {
        return Err(ApiError::NotFound {
            resource: format!("session {}", session_id),
        });
    }
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/sessions/{session_id}/pending/{local_id}")]
pub async fn dismiss_pending(
    state: Data<AppState>,
    user: AuthenticatedUser,
    path: Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (session_id, local_id) = path.into_inner();
    owned_session(&state, &user, &session_id).await?;
    if !state.coordinator.dismiss_pending(&session_id, &local_id).await {
        return Err(ApiError::NotFound {
            resource: format!("pending item {}", local_id),
        });
    }
    Ok(HttpResponse::NoContent().finish())
}
