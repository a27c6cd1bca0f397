pub mod client;
pub mod error;
pub mod session;
pub mod xoauth2;

pub use client::{ImapConnector, ImapMailboxSession};
pub use error::ImapError;
pub use session::{tail_range, EnvelopeSummary, FolderStatus, MailboxConnector, MailboxSession};
pub use xoauth2::XOAuth2Authenticator;
