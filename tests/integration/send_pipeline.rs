// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outbound sends through a scripted transport.

#[cfg(test)]
mod send_pipeline_tests {
    use unibox::models::{AccountStatus, SNIPPET_CHARS};
    use unibox::services::{EventBus, SendError, SendRequest, TransportError, TransportErrorKind};
    use unibox::store::Store;

    use crate::common::*;

    fn request(account_id: &str, thread_id: Option<&str>) -> SendRequest {
        SendRequest {
            account_id: account_id.to_string(),
            to: "jane@corp.com".to_string(),
            subject: "Quick question".to_string(),
            html_body: r#"<p>Hi Jane, see <a href="https://example.com/deck">the deck</a></p>"#.to_string(),
            thread_id: thread_id.map(str::to_string),
            original_message_id: None,
            lead_id: None,
        }
    }

    #[tokio::test]
    async fn sender_copy_snippet_uses_the_shared_preview_length() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let pipeline = send_pipeline(&store, ScriptedTransport::accepting("gm-9", "t9"), &EventBus::new());

        let mut long = request(&account.id, None);
        long.html_body = format!("<p>{}</p>", "é".repeat(SNIPPET_CHARS + 50));
        pipeline.send(USER, long).await.unwrap();

        let copies = store.messages().list_recent_inbound(USER, 10).await.unwrap();
        assert_eq!(copies.len(), 1);
        let snippet = copies[0].snippet.clone().unwrap();
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS);
        assert!(snippet.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn stale_thread_is_retried_once_without_it() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::from_http(400, "Invalid thread_id value")),
            Ok(sent("gm-2", "fresh-thread")),
        ]);
        let pipeline = send_pipeline(&store, transport.clone(), &EventBus::new());

        let result = pipeline
            .send(USER, request(&account.id, Some("stale-thread")))
            .await
            .unwrap();

        assert_eq!(result.provider_message_id, "gm-2");
        assert_eq!(result.provider_thread_id.as_deref(), Some("fresh-thread"));

        let attempts = transport.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].thread_id.as_deref(), Some("stale-thread"));
        assert_eq!(attempts[1].thread_id, None);
        assert_eq!(attempts[0].rfc_message_id, attempts[1].rfc_message_id);

        assert_eq!(store.messages().count_outbound_for_account(&account.id).await.unwrap(), 1);
        let records = store
            .messages()
            .outbound_for_thread_or_lead(USER, Some("fresh-thread"), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provider_message_id.as_deref(), Some("gm-2"));
    }

    #[tokio::test]
    async fn rejected_send_writes_nothing() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let transport = ScriptedTransport::new(vec![Err(TransportError::from_http(400, "Invalid To header"))]);
        let pipeline = send_pipeline(&store, transport.clone(), &EventBus::new());

        let err = pipeline.send(USER, request(&account.id, None)).await.unwrap_err();

        match err {
            SendError::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::Rejected);
                assert_eq!(e.message, "Invalid To header");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(transport.attempt_count(), 1);
        assert_eq!(store.messages().count_outbound_for_account(&account.id).await.unwrap(), 0);
        assert!(store.messages().list_recent_inbound(USER, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn thread_error_without_thread_is_not_retried() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::from_http(404, "Requested thread not found")),
            Ok(sent("gm-9", "t9")),
        ]);
        let pipeline = send_pipeline(&store, transport.clone(), &EventBus::new());

        assert!(pipeline.send(USER, request(&account.id, None)).await.is_err());
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test]
    async fn accepted_send_is_instrumented_and_linked_to_the_lead() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let lead = seed_lead(&store, "jane@corp.com").await;
        let transport = ScriptedTransport::accepting("gm-1", "t1");
        let pipeline = send_pipeline(&store, transport.clone(), &EventBus::new());

        pipeline.send(USER, request(&account.id, None)).await.unwrap();

        let records = store
            .messages()
            .outbound_for_thread_or_lead(USER, None, Some(&lead.id))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        let body = record.body_html.as_deref().unwrap();
        assert!(body.contains(&format!("logId={}", record.id)));
        assert!(body.contains("type=click"));
        assert!(body.contains(TRACKING_BASE));

        let raw = String::from_utf8_lossy(&transport.attempts.lock().unwrap()[0].raw).to_string();
        assert!(raw.contains("jane@corp.com"));
        assert!(raw.contains(record.rfc_message_id.as_deref().unwrap()));

        // The sender's copy joins the conversation as read.
        let conversation = store.messages().list_recent_inbound(USER, 10).await.unwrap();
        assert_eq!(conversation.len(), 1);
        assert!(conversation[0].is_read);
        assert_eq!(conversation[0].thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn foreign_and_paused_accounts_are_refused() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let transport = ScriptedTransport::accepting("gm-1", "t1");
        let pipeline = send_pipeline(&store, transport.clone(), &EventBus::new());

        let err = pipeline.send(OTHER_USER, request(&account.id, None)).await.unwrap_err();
        assert!(matches!(err, SendError::NotOwner(_)));

        store.accounts().set_status(&account.id, AccountStatus::Paused).await.unwrap();
        let err = pipeline.send(USER, request(&account.id, None)).await.unwrap_err();
        assert!(matches!(err, SendError::Inactive(_)));

        assert_eq!(transport.attempt_count(), 0);
    }
}
