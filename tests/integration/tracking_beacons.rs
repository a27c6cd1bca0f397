// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Open/click beacons against records written by the send pipeline.

#[cfg(test)]
mod tracking_tests {
    use unibox::models::{OutboundRecord, OutboundStatus};
    use unibox::services::tracking::{record_click, record_open, TrackingError};
    use unibox::services::{EventBus, SendRequest};
    use unibox::store::Store;

    use crate::common::*;

    async fn sent_record(store: &Store, events: &EventBus) -> OutboundRecord {
        let account = seed_live_account(store).await;
        let pipeline = send_pipeline(store, ScriptedTransport::accepting("gm-1", "t1"), events);
        pipeline
            .send(
                USER,
                SendRequest {
                    account_id: account.id.clone(),
                    to: "jane@corp.com".to_string(),
                    subject: "Hello".to_string(),
                    html_body: "<p>Hello</p>".to_string(),
                    thread_id: None,
                    original_message_id: None,
                    lead_id: None,
                },
            )
            .await
            .unwrap();
        store
            .messages()
            .outbound_for_thread_or_lead(USER, Some("t1"), None)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn open_is_recorded_once() {
        let store = Store::in_memory().await.unwrap();
        let events = EventBus::new();
        let record = sent_record(&store, &events).await;

        assert!(record_open(&store, &events, &record.id).await.unwrap());
        let first = store.messages().get_outbound(&record.id).await.unwrap().unwrap();
        assert!(!record_open(&store, &events, &record.id).await.unwrap());
        let second = store.messages().get_outbound(&record.id).await.unwrap().unwrap();

        assert!(first.opened_at.is_some());
        assert_eq!(first.opened_at, second.opened_at);
        assert_eq!(second.status, OutboundStatus::Opened);
    }

    #[tokio::test]
    async fn click_implies_open_and_returns_target() {
        let store = Store::in_memory().await.unwrap();
        let events = EventBus::new();
        let record = sent_record(&store, &events).await;

        let url = record_click(&store, &events, &record.id, "https://example.com/deck?x=1")
            .await
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/deck?x=1");

        let stored = store.messages().get_outbound(&record.id).await.unwrap().unwrap();
        assert!(stored.clicked_at.is_some());
        assert_eq!(stored.opened_at, stored.clicked_at);
        assert_eq!(stored.status, OutboundStatus::Clicked);
    }

    #[tokio::test]
    async fn non_http_targets_and_unknown_logs_are_rejected() {
        let store = Store::in_memory().await.unwrap();
        let events = EventBus::new();
        let record = sent_record(&store, &events).await;

        let err = record_click(&store, &events, &record.id, "javascript:alert(1)")
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::InvalidUrl(_)));

        let err = record_open(&store, &events, "no-such-log").await.unwrap_err();
        assert!(matches!(err, TrackingError::UnknownLog(_)));

        let stored = store.messages().get_outbound(&record.id).await.unwrap().unwrap();
        assert!(stored.clicked_at.is_none());
    }
}
