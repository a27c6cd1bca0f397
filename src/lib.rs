//! Library core for Unibox.
//!
//! Mailbox sync, outbound sending with open/click tracking, the unified
//! conversation timeline and the per-session refresh coordinator, exposed
//! over an actix-web API by the `unibox-server` binary.

pub mod api;
pub mod config;
pub mod error;
pub mod imap;
pub mod models;
pub mod services;
pub mod store;

pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::ErrorClass;
    pub use crate::imap::ImapError;
    pub use crate::models::{Account, InboundMessage, Lead, LeadStatus, OutboundRecord};
    pub use crate::services::{Coordinator, EventBus, SendPipeline, SyncEngine, TimelineReconciler};
    pub use crate::store::{Store, StoreError};

    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
}
