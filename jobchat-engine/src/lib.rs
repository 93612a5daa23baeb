#![cfg_attr(not(test), forbid(unsafe_code))]
//! Client-side synchronization of JobChat conversations and notifications.
//!
//! Authoritative REST snapshots and a push event stream are merged into one
//! consistent local view. [`session::SyncSession`] drives everything; the
//! reconcilers below it are plain state machines that return the I/O they
//! need as [`reconciler::Command`] values.

pub mod api;
pub mod connection;
pub mod directory;
pub mod error;
pub mod notifications;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod sse;
pub mod store;
pub mod viewport;

pub use api::{HttpSnapshotApi, SnapshotApi};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionStatus, SessionIdentity, Transport,
    TransportSignal,
};
pub use error::{FetchError, SendError, TransportError, TransportResult};
pub use notifications::NotificationAggregator;
pub use reconciler::{Command, EventReconciler, SyncState};
pub use session::{LoadTarget, SessionCommand, SessionUpdate, SyncSession};
pub use sse::SseTransport;
pub use store::{DeliveryState, MessageStore, StoredMessage};
pub use viewport::{ViewportFrame, ViewportState};
