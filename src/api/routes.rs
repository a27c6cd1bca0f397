// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use actix_cors::Cors;
use actix_web::{http::header, web, HttpResponse};
use actix_web_lab::middleware::from_fn as mw_from_fn;

use super::{auth::require_bearer, handlers, sse, tracking};

/// CORS restricted to the configured origins; none configured allows none.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT, header::ORIGIN])
        .supports_credentials()
        .max_age(3600);

    for origin in allowed_origins {
        cors = cors.allowed_origin(origin);
    }
    cors
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Unauthenticated; registered ahead of the scope so it matches first.
    cfg.service(tracking::track)
        .route("/health", web::get().to(health));

    cfg.service(
        web::scope("/api")
            .wrap(mw_from_fn(require_bearer))
            // Sync
            .service(handlers::sync_account)
            .service(handlers::account_sync_state)
            .service(handlers::connect_google)
            // Send and timeline
            .service(handlers::send_message)
            .service(handlers::get_thread)
            .service(handlers::set_thread_status)
            // Messages
            .service(handlers::list_inbox)
            .service(handlers::mark_read)
            // Viewing sessions
            .service(sse::events)
            .service(handlers::set_visibility)
            .service(handlers::set_open_thread)
            .service(handlers::change_identity)
            .service(handlers::dismiss_pending),
    );
}
