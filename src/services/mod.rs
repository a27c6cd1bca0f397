pub mod coordinator;
pub mod credentials;
pub mod events;
pub mod outbox;
pub mod parse;
pub mod send;
pub mod sync;
pub mod timeline;
pub mod tracking;
pub mod transport;

pub use coordinator::{AccountSyncer, Coordinator, GuardedSyncError, SessionIdentity, ThreadRef, ViewState, ViewUpdate};
pub use credentials::{CredentialError, CredentialProvider, GoogleTokenEndpoint, TokenEndpoint, TokenResponse};
pub use events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
pub use outbox::{OptimisticOutbox, PendingItem, PendingState};
pub use send::{SendError, SendPipeline, SendRequest, SendResult};
pub use sync::{SyncEngine, SyncError, SyncReport};
pub use timeline::{StatusTarget, ThreadQuery, TimelineError, TimelineItem, TimelineReconciler};
pub use transport::{GmailApiTransport, MailTransport, SmtpMailTransport, TransportError, TransportErrorKind};
