// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::process::exit;

use actix_web::middleware::Logger;
use actix_web::{web::Data, App, HttpServer};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use unibox::api::{configure_routes, routes::build_cors, AppState, Backends};
use unibox::config::Settings;
use unibox::store::Store;

#[derive(Parser)]
#[command(name = "unibox-server", about = "Unified inbox API server")]
struct Cli {
    /// Optional configuration file (TOML)
    #[arg(long, env = "UNIBOX_CONFIG")]
    config: Option<String>,

    /// Overrides `database.url`
    #[arg(long)]
    database_url: Option<String>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // Missing .env is normal outside development.
        if !e.not_found() {
            eprintln!("Failed to load .env: {}", e);
        }
    }
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref()).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        exit(1);
    });
    if let Some(url) = cli.database_url {
        settings.database.url = url;
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log.level.as_str())).init();

    let store = match Store::connect(&settings.database.url, settings.database.max_connections).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open database {}: {}", settings.database.url, e);
            exit(1);
        }
    };

    if !settings.oauth.google.is_configured() {
        warn!("Google OAuth client is not configured; Gmail accounts cannot refresh tokens");
    }

    let bind_address = settings.bind_address();
    let cors_origins = settings.server.cors_origins.clone();
    let backends = Backends::from_settings(&settings);
    let app_state = Data::new(AppState::new(settings, store, backends));

    info!("Starting Unibox API server at {}", bind_address);
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(bind_address)?
    .run()
    .await
}
