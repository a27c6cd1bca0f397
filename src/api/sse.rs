// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Change-event stream for one viewing session.
//!
//! Each connection opens a coordinator session. The first event, `session`,
//! carries its id, which the client passes to the visibility, open-thread
//! and send endpoints. Dropping the connection closes the session's sink and
//! the coordinator tears the session down on its next tick.

use std::convert::Infallible;
use std::time::Duration;

use actix_web::{get, web::Data};
use actix_web_lab::sse::{self, Sse};
use futures::{Stream, StreamExt};
use log::{error, info};
use tokio::time::interval;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};

use super::auth::AuthenticatedUser;
use super::AppState;
use crate::services::{SessionIdentity, ViewUpdate};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

fn update_event(update: ViewUpdate) -> sse::Event {
    match serde_json::to_string(&update) {
        Ok(json) => sse::Event::Data(sse::Data::new(json).event(update.event_name())),
        Err(e) => {
            error!("Failed to serialize {} update: {}", update.event_name(), e);
            sse::Event::Comment("dropped update".into())
        }
    }
}

#[get("/events")]
pub async fn events(
    state: Data<AppState>,
    user: AuthenticatedUser,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let (session_id, rx) = state
        .coordinator
        .open_session(SessionIdentity {
            user_id: user.user_id.clone(),
        })
        .await;
    info!("Event stream opened for user {} (session {})", user.user_id, session_id);

    let welcome = sse::Event::Data(
        sse::Data::new(serde_json::json!({ "sessionId": session_id }).to_string()).event("session"),
    );

    let update_stream = futures::stream::once(async move { welcome })
        .chain(ReceiverStream::new(rx).map(update_event))
        .map(Ok::<_, Infallible>);

    let heartbeat = IntervalStream::new(interval(HEARTBEAT_INTERVAL))
        .map(|_| Ok::<_, Infallible>(sse::Event::Comment("heartbeat".into())));

    Sse::from_stream(futures::stream::select(update_stream, heartbeat))
}
