// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! HTTP surface wired to in-memory fakes.

#[cfg(test)]
mod api_tests {
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, web::Data, App};
    use serde_json::{json, Value};

    use unibox::api::{configure_routes, AppState, Backends};
    use unibox::config::Settings;
    use unibox::models::Account;
    use unibox::store::Store;

    use crate::common::*;

    const TOKEN: &str = "session-token";

    async fn state_with(mailbox: FakeMailbox, transport: Arc<ScriptedTransport>) -> (AppState, Account) {
        let store = Store::in_memory().await.unwrap();
        store.sessions().insert(TOKEN, USER, None).await.unwrap();
        let account = seed_live_account(&store).await;

        let mut settings = Settings::default();
        settings.sync = test_sync_config();
        settings.tracking.base_url = TRACKING_BASE.to_string();

        let backends = Backends {
            connector: Arc::new(mailbox),
            token_endpoint: idle_tokens(),
            api_transport: transport.clone(),
            smtp_transport: transport,
        };
        (AppState::new(settings, store, backends), account)
    }

    fn bearer() -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", TOKEN))
    }

    #[actix_web::test]
    async fn api_requires_a_live_session_token() {
        let (state, _) = state_with(FakeMailbox::new(), ScriptedTransport::new(vec![])).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/inbox").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/inbox")
            .insert_header(("Authorization", "Bearer wrong"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/api/inbox").insert_header(bearer()).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 0);
    }

    #[actix_web::test]
    async fn sync_endpoint_returns_the_report() {
        let mailbox = FakeMailbox::gmail_inbox(vec![
            FakeMessage::new("lead1@corp.com", ACCOUNT_EMAIL, "One", "<1@corp.com>"),
            FakeMessage::broken(),
        ]);
        let (state, account) = state_with(mailbox, ScriptedTransport::new(vec![])).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/sync")
            .insert_header(bearer())
            .set_json(json!({ "accountId": account.id, "limit": 10 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["inbox_count"], 1);
        assert_eq!(body["partial"], true);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::post()
            .uri("/api/sync")
            .insert_header(bearer())
            .set_json(json!({ "accountId": "missing" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn send_validation_and_provider_errors_are_reported() {
        let transport = ScriptedTransport::new(vec![Err(unibox::services::TransportError::from_http(
            400,
            "Invalid To header",
        ))]);
        let (state, account) = state_with(FakeMailbox::new(), transport).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/send")
            .insert_header(bearer())
            .set_json(json!({
                "accountId": account.id,
                "to": "not-an-address",
                "subject": "Hi",
                "htmlBody": "<p>Hi</p>"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "VALIDATION_FAILED");

        let req = test::TestRequest::post()
            .uri("/api/send")
            .insert_header(bearer())
            .set_json(json!({
                "accountId": account.id,
                "to": "jane@corp.com",
                "subject": "Hi",
                "htmlBody": "<p>Hi</p>"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid To header");
        assert_eq!(body["status"], 502);
    }

    #[actix_web::test]
    async fn send_then_thread_lookup() {
        let (state, account) = state_with(FakeMailbox::new(), ScriptedTransport::accepting("gm-1", "t1")).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/send")
            .insert_header(bearer())
            .set_json(json!({
                "accountId": account.id,
                "to": "jane@corp.com",
                "subject": "Hi",
                "htmlBody": "<p>Hi</p>"
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["providerMessageId"], "gm-1");
        assert_eq!(body["providerThreadId"], "t1");

        let req = test::TestRequest::get()
            .uri("/api/thread?threadId=t1")
            .insert_header(bearer())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["direction"], "outbound");

        let req = test::TestRequest::get().uri("/api/thread").insert_header(bearer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn message_and_status_endpoints_validate_input() {
        let (state, _) = state_with(FakeMailbox::new(), ScriptedTransport::new(vec![])).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/messages/nope/read")
            .insert_header(bearer())
            .set_json(json!({ "read": true }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/thread/status")
            .insert_header(bearer())
            .set_json(json!({ "messageId": "m1", "status": "ecstatic" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn tracking_beacon_is_public_and_always_answers() {
        let (state, _) = state_with(FakeMailbox::new(), ScriptedTransport::new(vec![])).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::get()
            .uri("/api/track?type=open&logId=unknown")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-type").unwrap(), "image/gif");

        let req = test::TestRequest::get()
            .uri("/api/track?type=click&logId=unknown&url=https%3A%2F%2Fexample.com%2F")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers().get("location").unwrap(), "https://example.com/");

        let req = test::TestRequest::get()
            .uri("/api/track?type=click&logId=unknown&url=javascript%3Aalert(1)")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn session_controls_reject_unknown_sessions() {
        let (state, _) = state_with(FakeMailbox::new(), ScriptedTransport::new(vec![])).await;
        let app = test::init_service(App::new().app_data(Data::new(state)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/sessions/nope/visibility")
            .insert_header(bearer())
            .set_json(json!({ "visible": false }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
