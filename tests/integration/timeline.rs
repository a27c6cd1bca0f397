// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Unified thread view over sent and received rows.

#[cfg(test)]
mod timeline_tests {
    use chrono::{Duration, Utc};

    use unibox::models::LeadStatus;
    use unibox::services::{EventBus, SendRequest, StatusTarget, ThreadQuery, TimelineItem, TimelineReconciler};
    use unibox::store::Store;

    use crate::common::*;

    fn thread(thread_id: &str) -> ThreadQuery {
        ThreadQuery {
            thread_id: Some(thread_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sent_message_and_reply_merge_without_duplicates() {
        let store = Store::in_memory().await.unwrap();
        let events = EventBus::new();
        let account = seed_live_account(&store).await;

        send_pipeline(&store, ScriptedTransport::accepting("gm-1", "t1"), &events)
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
        let reply = inbound(&account, "<reply@corp.com>", "jane@corp.com", Some("t1"), Utc::now() + Duration::minutes(5));
        store.messages().upsert_inbound_batch(&[reply]).await.unwrap();

        let timeline = TimelineReconciler::new(store.clone(), events);
        let items = timeline.get_thread(USER, &thread("t1")).await.unwrap();

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], TimelineItem::Outbound(r) if r.provider_message_id.as_deref() == Some("gm-1")));
        assert!(matches!(&items[1], TimelineItem::Inbound(m) if m.message_id == "<reply@corp.com>"));

        let again = timeline.get_thread(USER, &thread("t1")).await.unwrap();
        assert_eq!(items, again);
    }

    #[tokio::test]
    async fn thread_reads_are_stable_across_calls() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let at = Utc::now();
        // Equal timestamps must still come back in one fixed order.
        store
            .messages()
            .upsert_inbound_batch(&[
                inbound(&account, "<c@corp.com>", "jane@corp.com", Some("t1"), at),
                inbound(&account, "<a@corp.com>", "jane@corp.com", Some("t1"), at),
                inbound(&account, "<b@corp.com>", "jane@corp.com", Some("t1"), at),
            ])
            .await
            .unwrap();

        let timeline = TimelineReconciler::new(store.clone(), EventBus::new());
        let first = timeline.get_thread(USER, &thread("t1")).await.unwrap();
        let second = timeline.get_thread(USER, &thread("t1")).await.unwrap();

        assert_eq!(first, second);
        let keys: Vec<&str> = first.iter().map(TimelineItem::dedup_key).collect();
        assert_eq!(keys, vec!["<a@corp.com>", "<b@corp.com>", "<c@corp.com>"]);
    }

    #[tokio::test]
    async fn sparse_thread_falls_back_to_participants() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let now = Utc::now();
        store
            .messages()
            .upsert_inbound_batch(&[
                inbound(&account, "<a@corp.com>", "jane@corp.com", Some("t1"), now),
                inbound(&account, "<b@corp.com>", "jane@corp.com", None, now + Duration::minutes(1)),
            ])
            .await
            .unwrap();

        let timeline = TimelineReconciler::new(store.clone(), EventBus::new());
        let query = ThreadQuery {
            thread_id: Some("t1".to_string()),
            participant_a: Some("jane@corp.com".to_string()),
            participant_b: Some(ACCOUNT_EMAIL.to_string()),
            ..Default::default()
        };
        let items = timeline.get_thread(USER, &query).await.unwrap();
        assert_eq!(items.len(), 2);

        let other = timeline.get_thread(OTHER_USER, &query).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn status_goes_to_the_lead_when_one_exists() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let lead = seed_lead(&store, "jane@corp.com").await;
        let message = inbound(&account, "<a@corp.com>", "jane@corp.com", Some("t1"), Utc::now());
        store.messages().upsert_inbound_batch(&[message.clone()]).await.unwrap();

        let timeline = TimelineReconciler::new(store.clone(), EventBus::new());
        let target = timeline
            .set_thread_status(USER, &message.id, LeadStatus::Interested)
            .await
            .unwrap();

        assert_eq!(target, StatusTarget::Lead(lead.id.clone()));
        let lead = store.leads().get(USER, &lead.id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Interested);
    }

    #[tokio::test]
    async fn status_without_lead_is_kept_as_tag() {
        let store = Store::in_memory().await.unwrap();
        let account = seed_live_account(&store).await;
        let message = inbound(&account, "<a@corp.com>", "stranger@corp.com", Some("t1"), Utc::now());
        store.messages().upsert_inbound_batch(&[message.clone()]).await.unwrap();

        let timeline = TimelineReconciler::new(store.clone(), EventBus::new());
        let target = timeline
            .set_thread_status(USER, &message.id, LeadStatus::MeetingBooked)
            .await
            .unwrap();
        assert_eq!(target, StatusTarget::Tag(message.id.clone()));

        let items = timeline.get_thread(USER, &thread("t1")).await.unwrap();
        let status = timeline.display_status(USER, &items).await.unwrap();
        assert_eq!(status.as_deref(), Some("meeting_booked"));
    }
}
