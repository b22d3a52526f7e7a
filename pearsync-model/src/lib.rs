//! Pearsync Model
//!
//! Pure data types for the pearsync system: strong key/hash types,
//! cryptographic helpers, domain operations and the typed event surface.
//! No storage engines, no network stacks.

pub mod clock;
pub mod crypto;
pub mod event;
pub mod identity;
pub mod op;
pub mod paths;
pub mod types;

pub use clock::{Clock, MockClock, SystemClock};
pub use event::SyncEvent;
pub use identity::{IdentityError, WriterIdentity};
pub use op::{FileMeta, Operation};
pub use paths::AppPaths;
pub use types::{Hash, KeyParseError, PubKey, Signature};
