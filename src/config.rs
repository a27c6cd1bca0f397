// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::env;
use std::time::Duration;

use config::{Environment, File};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

impl GoogleOAuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub google: GoogleOAuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public origin the beacons point at, e.g. `https://app.example.com`.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub default_window: u32,
    /// Hard cap on messages fetched per folder, whatever the caller asks for.
    pub protocol_cap: u32,
    pub batch_size: usize,
    pub poll_interval_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub insert_grace_ms: u64,
    /// Cached access tokens closer than this to expiry are refreshed.
    pub token_safety_margin_secs: i64,
    pub login_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn insert_grace(&self) -> Duration {
        Duration::from_millis(self.insert_grace_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_window: 10,
            protocol_cap: 50,
            batch_size: 5,
            poll_interval_secs: 60,
            backoff_base_secs: 30,
            backoff_max_secs: 900,
            insert_grace_ms: 750,
            token_safety_margin_secs: 300,
            login_timeout_secs: 30,
            command_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
    pub oauth: OAuthSettings,
    pub gmail: GmailConfig,
    pub tracking: TrackingConfig,
    pub sync: SyncConfig,
}

impl Settings {
    pub fn new(config_path: Option<&str>) -> Result<Self, SettingsError> {
        let sync = SyncConfig::default();
        let mut builder = config::Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.cors_origins", Vec::<String>::new())?
            .set_default("database.url", "sqlite:data/unibox.db")?
            .set_default("database.max_connections", 5)?
            .set_default("log.level", "info")?
            .set_default("oauth.google.client_id", "")?
            .set_default("oauth.google.client_secret", "")?
            .set_default("oauth.google.token_url", GOOGLE_TOKEN_URL)?
            .set_default("gmail.api_base", GMAIL_API_BASE)?
            .set_default("tracking.base_url", "http://127.0.0.1:8080")?
            .set_default("sync.default_window", sync.default_window)?
            .set_default("sync.protocol_cap", sync.protocol_cap)?
            .set_default("sync.batch_size", sync.batch_size as u64)?
            .set_default("sync.poll_interval_secs", sync.poll_interval_secs)?
            .set_default("sync.backoff_base_secs", sync.backoff_base_secs)?
            .set_default("sync.backoff_max_secs", sync.backoff_max_secs)?
            .set_default("sync.insert_grace_ms", sync.insert_grace_ms)?
            .set_default("sync.token_safety_margin_secs", sync.token_safety_margin_secs)?
            .set_default("sync.login_timeout_secs", sync.login_timeout_secs)?
            .set_default("sync.command_timeout_secs", sync.command_timeout_secs)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        // e.g. `UNIBOX_SYNC__BATCH_SIZE=10` overrides `sync.batch_size`
        builder = builder.add_source(
            Environment::with_prefix("UNIBOX")
                .prefix_separator("_")
                .separator("__")
                .ignore_empty(true),
        );

        // Conventional variable names deployments already set.
        let env_vars = [
            ("DATABASE_URL", "database.url"),
            ("SERVER_HOST", "server.host"),
            ("SERVER_PORT", "server.port"),
            ("LOG_LEVEL", "log.level"),
            ("GOOGLE_CLIENT_ID", "oauth.google.client_id"),
            ("GOOGLE_CLIENT_SECRET", "oauth.google.client_secret"),
            ("GOOGLE_REDIRECT_URI", "oauth.google.redirect_uri"),
            ("TRACKING_BASE_URL", "tracking.base_url"),
        ];

        for (env_var, key) in &env_vars {
            if let Ok(value) = env::var(env_var) {
                if *env_var == "SERVER_PORT" {
                    match value.parse::<u16>() {
                        Ok(port) => builder = builder.set_override(*key, port)?,
                        Err(_) => warn!("Invalid port value in {}: {}", env_var, value),
                    }
                } else {
                    builder = builder.set_override(*key, value)?;
                }
            }
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: Vec::new(),
            },
            database: DatabaseConfig {
                url: "sqlite:data/unibox.db".to_string(),
                max_connections: 5,
            },
            log: LogConfig {
                level: "info".to_string(),
            },
            oauth: OAuthSettings {
                google: GoogleOAuthConfig {
                    client_id: String::new(),
                    client_secret: String::new(),
                    token_url: GOOGLE_TOKEN_URL.to_string(),
                    redirect_uri: None,
                },
            },
            gmail: GmailConfig {
                api_base: GMAIL_API_BASE.to_string(),
            },
            tracking: TrackingConfig {
                base_url: "http://127.0.0.1:8080".to_string(),
            },
            sync: SyncConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load or parse configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}
