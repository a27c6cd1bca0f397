// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Access-token resolution for mailbox accounts.
//!
//! OAuth accounts keep a cached access token on the account row. A token
//! that is still valid beyond the safety margin is used as-is; otherwise the
//! refresh token is exchanged and the result written back before returning.
//! Two concurrent refreshes for one account both succeed and the last write
//! wins.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GoogleOAuthConfig;
use crate::error::ErrorClass;
use crate::models::{mask_secret, Account, Credentials, StoredCredentials};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credentials missing: {0}")]
    Missing(String),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),
    #[error("OAuth client is not configured")]
    NotConfigured,
    #[error("Token endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CredentialError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CredentialError::Unreachable(_) | CredentialError::Store(_) => ErrorClass::Infrastructure,
            _ => ErrorClass::Client,
        }
    }
}

/// Token endpoint reply for both the refresh and authorization-code grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError>;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, CredentialError>;
}

/// The identity provider's form-encoded token endpoint.
pub struct GoogleTokenEndpoint {
    config: GoogleOAuthConfig,
    http_client: reqwest::Client,
}

impl GoogleTokenEndpoint {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    async fn post_grant(&self, params: &[(&str, &str)]) -> Result<Result<TokenResponse, String>, CredentialError> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(Err(format!("HTTP {}: {}", status, body)));
        }

        Ok(response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("JSON parse: {}", e)))
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, CredentialError> {
        if !self.config.is_configured() {
            return Err(CredentialError::NotConfigured);
        }
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        debug!("Refreshing access token with refresh token {}", mask_secret(refresh_token));
        self.post_grant(&params).await?.map_err(|detail| {
            error!("Token refresh failed: {}", detail);
            CredentialError::RefreshFailed(detail)
        })
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, CredentialError> {
        if !self.config.is_configured() {
            return Err(CredentialError::NotConfigured);
        }
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        info!("Exchanging authorization code for tokens");
        self.post_grant(&params).await?.map_err(|detail| {
            error!("Token exchange failed: {}", detail);
            CredentialError::ExchangeFailed(detail)
        })
    }
}

pub struct CredentialProvider {
    store: Store,
    endpoint: Arc<dyn TokenEndpoint>,
    safety_margin: Duration,
}

impl CredentialProvider {
    pub fn new(store: Store, endpoint: Arc<dyn TokenEndpoint>, safety_margin_secs: i64) -> Self {
        Self {
            store,
            endpoint,
            safety_margin: Duration::seconds(safety_margin_secs),
        }
    }

    pub async fn resolve_token(&self, account: &Account) -> Result<Credentials, CredentialError> {
        self.resolve_token_at(account, Utc::now()).await
    }

    /// Same as [`resolve_token`](Self::resolve_token) with an explicit clock.
    pub async fn resolve_token_at(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<Credentials, CredentialError> {
        let stored = account
            .credentials
            .as_ref()
            .ok_or_else(|| CredentialError::Missing(format!("account {} has no credentials", account.id)))?;

        match stored {
            StoredCredentials::Password { username, password } => {
                let password = password.clone().ok_or_else(|| {
                    CredentialError::Missing(format!("account {} has no password", account.id))
                })?;
                Ok(Credentials::Password {
                    username: username.clone(),
                    password,
                })
            }
            StoredCredentials::OAuth {
                refresh_token,
                access_token,
                expires_at,
            } => {
                if let (Some(token), Some(expiry)) = (access_token, expires_at) {
                    if *expiry > now + self.safety_margin {
                        debug!("Using cached access token for account {}", account.id);
                        return Ok(Credentials::OAuth {
                            user: account.email.clone(),
                            access_token: token.clone(),
                        });
                    }
                }

                let refresh_token = refresh_token.as_deref().ok_or_else(|| {
                    CredentialError::Missing(format!("account {} has no refresh token", account.id))
                })?;

                let response = self.endpoint.refresh(refresh_token).await?;
                let new_expiry = now + Duration::seconds(response.expires_in);
                self.store
                    .accounts()
                    .update_tokens(
                        &account.id,
                        &response.access_token,
                        new_expiry,
                        response.refresh_token.as_deref(),
                    )
                    .await?;
                info!(
                    "Refreshed access token for account {} (valid until {})",
                    account.id, new_expiry
                );

                Ok(Credentials::OAuth {
                    user: account.email.clone(),
                    access_token: response.access_token,
                })
            }
        }
    }

    /// Completes the connect flow by trading an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, CredentialError> {
        self.endpoint.exchange_code(code, redirect_uri).await
    }
}
