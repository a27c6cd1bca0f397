// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mailbox sync against an in-memory mailbox and database.

#[cfg(test)]
mod sync_engine_tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use unibox::models::{Credentials, LeadStatus, OutboundStatus};
    use unibox::services::{EventBus, SendRequest, SyncError};
    use unibox::store::Store;

    use crate::common::*;

    fn lead_message(n: usize) -> FakeMessage {
        FakeMessage::new(
            &format!("lead{}@corp.com", n),
            ACCOUNT_EMAIL,
            &format!("Message {}", n),
            &format!("<m{}@corp.com>", n),
        )
    }

    #[tokio::test]
    async fn resync_does_not_duplicate_messages() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox((1..=3).map(lead_message).collect());
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let first = engine.sync_account(USER, &account.id, 10).await.unwrap();
        let second = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(first.inbox_count, 3);
        assert_eq!(second.inbox_count, 3);
        assert!(!second.partial);
        let stored = store.messages().list_recent_inbound(USER, 100).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn unparsable_message_is_skipped_and_reported() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let messages = (1..=10)
            .map(|n| if n == 7 { FakeMessage::broken() } else { lead_message(n) })
            .collect();
        let mailbox = FakeMailbox::gmail_inbox(messages);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.inbox_count, 9);
        assert!(report.partial);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("message 7"), "{:?}", report.errors);
        assert_eq!(store.messages().list_recent_inbound(USER, 100).await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn dropped_connection_keeps_rows_stored_before_it() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox((1..=10).map(lead_message).collect()).dropping_connection_at("INBOX", 8);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.inbox_count, 7);
        assert_eq!(report.sent_count, 0);
        assert!(report.partial);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("connection reset by peer"), "{:?}", report.errors);

        let mut senders: Vec<String> = store
            .messages()
            .list_recent_inbound(USER, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.from_email)
            .collect();
        senders.sort();
        let expected: Vec<String> = (1..=7).map(|n| format!("lead{}@corp.com", n)).collect();
        assert_eq!(senders, expected);
    }

    #[tokio::test]
    async fn connection_drop_on_the_first_message_is_fatal() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox(vec![lead_message(1)]).dropping_connection_at("INBOX", 1);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let err = engine.sync_account(USER, &account.id, 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted(ref e) if e.is_transient()), "{:?}", err);
    }

    #[tokio::test]
    async fn inbox_of_only_unparsable_messages_is_an_error() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox(vec![FakeMessage::broken(), FakeMessage::broken()]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let err = engine.sync_account(USER, &account.id, 10).await.unwrap_err();

        match err {
            SyncError::Failed(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("message 1"), "{:?}", errors);
            }
            other => panic!("unexpected error {:?}", other),
        }
        let refreshed = store.accounts().get(&account.id).await.unwrap().unwrap();
        assert!(refreshed.last_synced_at.is_none());
    }

    #[tokio::test]
    async fn same_message_in_two_accounts_is_kept_for_each() {
        let store = Store::in_memory().await.unwrap();
        let mine = seed_live_account(&store).await;
        let theirs = seed_gmail_account(&store, OTHER_USER, Some(Utc::now() + Duration::hours(2))).await;
        let lead = seed_lead(&store, "jane@corp.com").await;
        let mailbox = FakeMailbox::gmail_inbox(vec![FakeMessage::new(
            "jane@corp.com",
            ACCOUNT_EMAIL,
            "Re: Quick question",
            "<shared@corp.com>",
        )]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        engine.sync_account(USER, &mine.id, 10).await.unwrap();
        let report = engine.sync_account(OTHER_USER, &theirs.id, 10).await.unwrap();
        assert_eq!(report.inbox_count, 1);

        let ours = store.messages().list_recent_inbound(USER, 10).await.unwrap();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].account_id, mine.id);
        assert_eq!(ours[0].lead_id.as_deref(), Some(lead.id.as_str()));

        let other = store.messages().list_recent_inbound(OTHER_USER, 10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].account_id, theirs.id);
        assert_eq!(other[0].lead_id, None);

        let messages = store.messages();
        assert_eq!(messages.count_inbound_with_message_id(&mine.id, "<shared@corp.com>").await.unwrap(), 1);
        assert_eq!(messages.count_inbound_with_message_id(&theirs.id, "<shared@corp.com>").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn messages_from_the_account_itself_are_not_stored() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox(vec![
            lead_message(1),
            FakeMessage::new("ME@gmail.com", "lead1@corp.com", "Note to self", "<self@gmail.com>"),
        ]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.inbox_count, 1);
        let stored = store.messages().list_recent_inbound(USER, 100).await.unwrap();
        assert!(stored.iter().all(|m| m.from_email != "me@gmail.com"));
    }

    #[tokio::test]
    async fn window_is_capped_and_newest_messages_win() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox((1..=8).map(lead_message).collect());
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let report = engine.sync_account(USER, &account.id, 3).await.unwrap();

        assert_eq!(report.inbox_count, 3);
        let mut senders: Vec<String> = store
            .messages()
            .list_recent_inbound(USER, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.from_email)
            .collect();
        senders.sort();
        assert_eq!(senders, vec!["lead6@corp.com", "lead7@corp.com", "lead8@corp.com"]);
        assert_eq!(engine.effective_window(500), 50);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_exactly_once() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_gmail_account(&store, USER, Some(Utc::now() - Duration::minutes(5))).await;

        let mut tokens = MockTokens::new();
        tokens
            .expect_refresh()
            .withf(|refresh_token| refresh_token == "refresh-token")
            .times(1)
            .returning(|_| Ok(fresh_token("new-access-token")));
        tokens.expect_exchange_code().never();

        let mailbox = FakeMailbox::gmail_inbox(vec![lead_message(1)]);
        let engine = sync_engine(&store, Arc::new(tokens), &mailbox, &EventBus::new());

        engine.sync_account(USER, &account.id, 10).await.unwrap();
        // The refreshed token is persisted and reused.
        engine.sync_account(USER, &account.id, 10).await.unwrap();

        let seen = mailbox.credentials_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        for credentials in seen {
            match credentials {
                Credentials::OAuth { access_token, .. } => assert_eq!(access_token, "new-access-token"),
                other => panic!("unexpected credentials {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn foreign_account_is_refused_without_connecting() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::gmail_inbox(vec![lead_message(1)]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let err = engine.sync_account(OTHER_USER, &account.id, 10).await.unwrap_err();

        assert!(matches!(err, SyncError::NotOwner(_)));
        assert_eq!(mailbox.connect_count(), 0);
    }

    #[tokio::test]
    async fn missing_sent_folder_is_reported_but_inbox_is_kept() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::new().with_folder("INBOX", vec![lead_message(1)]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.inbox_count, 1);
        assert_eq!(report.sent_count, 0);
        assert!(report.partial);
        assert!(report.errors[0].contains("sent folder not found"));
    }

    #[tokio::test]
    async fn missing_inbox_with_nothing_stored_is_fatal() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::new();
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        let err = engine.sync_account(USER, &account.id, 10).await.unwrap_err();
        assert!(matches!(err, SyncError::Aborted(_)));
    }

    #[tokio::test]
    async fn lead_reply_promotes_the_lead() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let lead = seed_lead(&store, "jane@corp.com").await;

        let mailbox = FakeMailbox::gmail_inbox(vec![FakeMessage::new(
            "Jane@Corp.com",
            ACCOUNT_EMAIL,
            "Re: Quick question",
            "<reply@corp.com>",
        )]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());
        engine.sync_account(USER, &account.id, 10).await.unwrap();

        let lead = store.leads().get(USER, &lead.id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Replied);

        let stored = store.messages().list_recent_inbound(USER, 10).await.unwrap();
        assert_eq!(stored[0].lead_id.as_deref(), Some(lead.id.as_str()));
    }

    #[tokio::test]
    async fn sent_folder_rows_are_not_duplicated() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let mailbox = FakeMailbox::new().with_folder("INBOX", Vec::new()).with_folder(
            "[Gmail]/Sent Mail",
            vec![FakeMessage::new(ACCOUNT_EMAIL, "jane@corp.com", "Quick question", "<out1@gmail.com>").in_thread("18c2f")],
        );
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &EventBus::new());

        engine.sync_account(USER, &account.id, 10).await.unwrap();
        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.sent_count, 1);
        assert_eq!(store.messages().count_outbound_for_account(&account.id).await.unwrap(), 1);
        let records = store
            .messages()
            .outbound_for_thread_or_lead(USER, Some("18c2f"), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutboundStatus::Sent);
        assert_eq!(records[0].rfc_message_id.as_deref(), Some("<out1@gmail.com>"));
    }

    #[tokio::test]
    async fn sent_copy_of_an_api_send_matches_on_provider_id() {
        let store = Store::in_memory().await.unwrap();
        let events = EventBus::new();
        let account = seed_live_account(&store).await;

        send_pipeline(&store, ScriptedTransport::accepting("18c2f00a", "18c2f"), &events)
            .send(
                USER,
                SendRequest {
                    account_id: account.id.clone(),
                    to: "jane@corp.com".to_string(),
                    subject: "Quick question".to_string(),
                    html_body: "<p>Hi</p>".to_string(),
                    thread_id: None,
                    original_message_id: None,
                    lead_id: None,
                },
            )
            .await
            .unwrap();

        // The provider assigns its own Message-ID header, so only the provider id links the copy.
        let copy = FakeMessage::new(ACCOUNT_EMAIL, "jane@corp.com", "Quick question", "<CAF123@mail.gmail.com>")
            .in_thread("18c2f")
            .with_provider_id("18c2f00a");
        let mailbox = FakeMailbox::new()
            .with_folder("INBOX", vec![lead_message(1)])
            .with_folder("[Gmail]/Sent Mail", vec![copy]);
        let engine = sync_engine(&store, idle_tokens(), &mailbox, &events);

        let report = engine.sync_account(USER, &account.id, 10).await.unwrap();

        assert_eq!(report.sent_count, 1);
        assert_eq!(store.messages().count_outbound_for_account(&account.id).await.unwrap(), 1);
        let records = store
            .messages()
            .outbound_for_thread_or_lead(USER, Some("18c2f"), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provider_message_id.as_deref(), Some("18c2f00a"));
    }
}
