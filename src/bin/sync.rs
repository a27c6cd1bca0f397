// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One-shot mailbox sync.
//!
//! Runs a single sync pass over a user's active accounts and exits, so it
//! can be driven by cron or a supervisor without the API server running.
//!
//! Usage:
//!   unibox-sync --user <id>                          # Sync every active account of the user
//!   unibox-sync --user <id> --account <id|email>     # Sync one account
//!   unibox-sync --user <id> --limit 25               # Larger window (capped by sync.protocol_cap)
//!
//! Exit codes:
//!   0 - Every account synced
//!   1 - Setup failed or at least one account could not be synced
//!   2 - Synced, but some messages were skipped (partial results)

use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use unibox::api::Backends;
use unibox::config::Settings;
use unibox::services::{CredentialProvider, EventBus, SyncEngine};
use unibox::store::Store;

#[derive(Parser)]
#[command(name = "unibox-sync", about = "Run one mailbox sync pass and exit")]
struct Cli {
    /// Optional configuration file (TOML)
    #[arg(long, env = "UNIBOX_CONFIG")]
    config: Option<String>,

    /// Overrides `database.url`
    #[arg(long)]
    database_url: Option<String>,

    /// Owner of the accounts to sync
    #[arg(long)]
    user: String,

    /// Sync only this account (id or email address)
    #[arg(long)]
    account: Option<String>,

    /// Messages per folder; 0 uses the configured default
    #[arg(long, default_value_t = 0)]
    limit: u32,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = match Settings::new(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            exit(1);
        }
    };
    if let Some(url) = cli.database_url.clone() {
        settings.database.url = url;
    }

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(settings.log.level.as_str()));
    info!("Starting sync process (pid: {}) for user {}", std::process::id(), cli.user);

    exit(run(&cli, settings).await);
}

async fn run(cli: &Cli, settings: Settings) -> i32 {
    let store = match Store::connect(&settings.database.url, settings.database.max_connections).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database {}: {}", settings.database.url, e);
            return 1;
        }
    };

    let accounts = match store.accounts().list_active_for_user(&cli.user).await {
        Ok(accounts) => accounts,
        Err(e) => {
            error!("Failed to list accounts for {}: {}", cli.user, e);
            return 1;
        }
    };
    let accounts: Vec<_> = match &cli.account {
        Some(filter) => accounts
            .into_iter()
            .filter(|a| a.id == *filter || a.is_own_address(filter))
            .collect(),
        None => accounts,
    };

    if accounts.is_empty() {
        if cli.account.is_some() {
            error!("Account not found or not active: {:?}", cli.account);
            return 1;
        }
        info!("No active accounts for {}, exiting", cli.user);
        return 0;
    }
    info!("Found {} account(s) to sync", accounts.len());

    let backends = Backends::from_settings(&settings);
    let credentials = Arc::new(CredentialProvider::new(
        store.clone(),
        backends.token_endpoint,
        settings.sync.token_safety_margin_secs,
    ));
    let engine = SyncEngine::new(store, credentials, backends.connector, EventBus::new(), settings.sync.clone());

    let mut failed = false;
    let mut partial = false;
    for account in accounts {
        match engine.sync_account(&cli.user, &account.id, cli.limit).await {
            Ok(report) => {
                info!(
                    "{}: {} inbox, {} sent{}",
                    account.email,
                    report.inbox_count,
                    report.sent_count,
                    if report.partial { " (partial)" } else { "" }
                );
                for e in &report.errors {
                    warn!("{}: {}", account.email, e);
                }
                partial |= !report.errors.is_empty();
            }
            Err(e) => {
                error!("Failed to sync {}: {}", account.email, e);
                failed = true;
            }
        }
    }

    info!("Sync complete, exiting");
    match (failed, partial) {
        (true, _) => 1,
        (false, true) => 2,
        (false, false) => 0,
    }
}
