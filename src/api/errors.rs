// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error responses for the HTTP API.
//!
//! Component errors are mapped here once. Every failure renders as
//! `{"error": <message>, "status": <code>}` plus a machine code and, for
//! sync and credential failures, a short hint for the user.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{user_hint, ErrorClass};
use crate::imap::ImapError;
use crate::services::credentials::CredentialError;
use crate::services::tracking::TrackingError;
use crate::services::transport::TransportErrorKind;
use crate::services::{GuardedSyncError, SendError, SyncError, TimelineError};
use crate::services::coordinator::SkipReason;
use crate::store::StoreError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("{message}")]
    Forbidden { message: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Validation failed")]
    ValidationFailed { errors: Vec<FieldError> },

    /// Mailbox credentials were refused; the account must be re-authorized.
    #[error("{message}")]
    CredentialsRejected { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    ServiceUnavailable { message: String },

    /// The mail provider failed or refused; `message` carries its text.
    #[error("{message}")]
    BadGateway { message: String, class: ErrorClass },

    #[error("{message}")]
    GatewayTimeout { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "AUTH_REQUIRED",
            ApiError::Forbidden { .. } => "FORBIDDEN",
            ApiError::BadRequest { .. } => "BAD_REQUEST",
            ApiError::ValidationFailed { .. } => "VALIDATION_FAILED",
            ApiError::CredentialsRejected { .. } => "CREDENTIALS_REJECTED",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            ApiError::BadGateway { .. } => "PROVIDER_ERROR",
            ApiError::GatewayTimeout { .. } => "PROVIDER_TIMEOUT",
            ApiError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            ApiError::CredentialsRejected { .. } => Some(user_hint(ErrorClass::Client)),
            ApiError::BadGateway {
                class: ErrorClass::Infrastructure,
                ..
            }
            | ApiError::GatewayTimeout { .. }
            | ApiError::ServiceUnavailable { .. } => Some(user_hint(ErrorClass::Infrastructure)),
            _ => None,
        }
    }

    fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound {
            resource: resource.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden {
            message: message.into(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } | ApiError::ValidationFailed { .. } | ApiError::CredentialsRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match status.as_u16() {
            400..=499 => log::warn!("Client error: {} ({})", self, status),
            _ => log::error!("Server error: {} ({})", self, status),
        }

        let errors = match self {
            ApiError::ValidationFailed { errors } => Some(errors.clone()),
            _ => None,
        };
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
            code: self.code().to_string(),
            hint: self.hint().map(str::to_string),
            errors,
        })
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::InternalError { message: e.to_string() }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        let errors = e
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |err| FieldError {
                    field: field.to_string(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string()),
                })
            })
            .collect();
        ApiError::ValidationFailed { errors }
    }
}

fn from_mailbox(e: &ImapError, message: String) -> ApiError {
    match e {
        _ if e.is_auth() => ApiError::CredentialsRejected { message },
        ImapError::Timeout(_) => ApiError::GatewayTimeout { message },
        _ => ApiError::BadGateway {
            message,
            class: ErrorClass::Infrastructure,
        },
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        let message = e.to_string();
        match e {
            CredentialError::Store(inner) => inner.into(),
            CredentialError::Unreachable(_) => ApiError::BadGateway {
                message,
                class: ErrorClass::Infrastructure,
            },
            CredentialError::NotConfigured => ApiError::InternalError { message },
            _ => ApiError::CredentialsRejected { message },
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let message = e.to_string();
        match e {
            SyncError::AccountNotFound(id) => ApiError::not_found(format!("account {}", id)),
            SyncError::NotOwner(_) => ApiError::forbidden(message),
            SyncError::Credentials(inner) => inner.into(),
            SyncError::Connect(inner) | SyncError::Aborted(inner) => from_mailbox(&inner, message),
            SyncError::Store(inner) => inner.into(),
            SyncError::Failed(_) => ApiError::BadGateway {
                message,
                class: ErrorClass::Infrastructure,
            },
        }
    }
}

impl From<GuardedSyncError> for ApiError {
    fn from(e: GuardedSyncError) -> Self {
        let message = e.to_string();
        match e {
            GuardedSyncError::Skipped(SkipReason::InFlight) => ApiError::Conflict { message },
            GuardedSyncError::Skipped(SkipReason::BackingOff { .. }) => ApiError::ServiceUnavailable { message },
            GuardedSyncError::Sync(inner) => inner.into(),
        }
    }
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        let message = e.to_string();
        match e {
            SendError::AccountNotFound(id) => ApiError::not_found(format!("account {}", id)),
            SendError::NotOwner(_) => ApiError::forbidden(message),
            SendError::Inactive(_) => ApiError::Conflict { message },
            SendError::Credentials(inner) => inner.into(),
            SendError::Build(_) => ApiError::BadRequest { message },
            SendError::Transport(inner) => match inner.kind {
                TransportErrorKind::Unauthorized => ApiError::CredentialsRejected { message },
                TransportErrorKind::Unavailable => ApiError::BadGateway {
                    message,
                    class: ErrorClass::Infrastructure,
                },
                TransportErrorKind::Rejected | TransportErrorKind::InvalidThread => ApiError::BadGateway {
                    message,
                    class: ErrorClass::Client,
                },
            },
            SendError::Store(inner) => inner.into(),
        }
    }
}

impl From<TimelineError> for ApiError {
    fn from(e: TimelineError) -> Self {
        match e {
            TimelineError::NotFound(id) => ApiError::not_found(format!("message {}", id)),
            TimelineError::Store(inner) => inner.into(),
        }
    }
}

impl From<TrackingError> for ApiError {
    fn from(e: TrackingError) -> Self {
        match e {
            TrackingError::UnknownLog(id) => ApiError::not_found(format!("log {}", id)),
            TrackingError::InvalidUrl(_) => ApiError::BadRequest { message: e.to_string() },
            TrackingError::Store(inner) => inner.into(),
        }
    }
}
