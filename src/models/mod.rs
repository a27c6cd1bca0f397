pub mod account;
pub mod lead;
pub mod message;

pub use account::{mask_secret, Account, AccountStatus, Credentials, ProviderKind, StoredCredentials};
pub use lead::{Lead, LeadStatus, SequenceStep};
pub use message::{make_snippet, InboundMessage, OutboundRecord, OutboundStatus, SNIPPET_CHARS};
