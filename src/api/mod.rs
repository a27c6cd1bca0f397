//! HTTP API using Actix Web.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod tracking;

use std::sync::Arc;

use crate::config::Settings;
use crate::imap::{ImapConnector, MailboxConnector};
use crate::services::{
    CredentialProvider, Coordinator, EventBus, GmailApiTransport, GoogleTokenEndpoint, MailTransport, SendPipeline,
    SmtpMailTransport, SyncEngine, TimelineReconciler, TokenEndpoint,
};
use crate::store::Store;

pub use auth::AuthenticatedUser;
pub use errors::ApiError;
pub use routes::configure_routes;

/// External edges of the system; swapped for fakes in tests.
pub struct Backends {
    pub connector: Arc<dyn MailboxConnector>,
    pub token_endpoint: Arc<dyn TokenEndpoint>,
    pub api_transport: Arc<dyn MailTransport>,
    pub smtp_transport: Arc<dyn MailTransport>,
}

impl Backends {
    /// Real IMAP, token, Gmail API and SMTP clients.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connector: Arc::new(ImapConnector::new(
                std::time::Duration::from_secs(settings.sync.login_timeout_secs),
                std::time::Duration::from_secs(settings.sync.command_timeout_secs),
            )),
            token_endpoint: Arc::new(GoogleTokenEndpoint::new(settings.oauth.google.clone())),
            api_transport: Arc::new(GmailApiTransport::new(&settings.gmail.api_base)),
            smtp_transport: Arc::new(SmtpMailTransport),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub events: EventBus,
    pub credentials: Arc<CredentialProvider>,
    pub coordinator: Coordinator,
    pub send: Arc<SendPipeline>,
    pub timeline: Arc<TimelineReconciler>,
}

impl AppState {
    pub fn new(settings: Settings, store: Store, backends: Backends) -> Self {
        let events = EventBus::new();
        let credentials = Arc::new(CredentialProvider::new(
            store.clone(),
            backends.token_endpoint,
            settings.sync.token_safety_margin_secs,
        ));
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            credentials.clone(),
            backends.connector,
            events.clone(),
            settings.sync.clone(),
        ));
        let coordinator = Coordinator::new(store.clone(), events.clone(), engine, settings.sync.clone());
        let send = Arc::new(SendPipeline::new(
            store.clone(),
            credentials.clone(),
            backends.api_transport,
            backends.smtp_transport,
            events.clone(),
            &settings.tracking.base_url,
        ));
        let timeline = Arc::new(TimelineReconciler::new(store.clone(), events.clone()));

        Self {
            settings: Arc::new(settings),
            store,
            events,
            credentials,
            coordinator,
            send,
            timeline,
        }
    }
}
