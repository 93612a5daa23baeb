//! # Push channel connection
//!
//! [`ConnectionManager`] owns the single push connection of a signed-in
//! session and the set of channels joined on it. The wire itself sits behind
//! the [`Transport`] trait so tests can substitute an in-memory double.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures_util::FutureExt;
use metrics::counter;
use serde_json::Value;
use shared::models::{Channel, ClientEvent, PushEvent, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};

/// Who the connection is opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    /// Bearer token presented to the server, if the deployment needs one
    pub token: Option<String>,
}

impl SessionIdentity {
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// What a transport reports back after it has been opened.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// One pushed event, not yet decoded
    Frame { event: String, payload: Value },
    /// The connection was lost; the transport is retrying on its own
    Dropped { reason: String },
    /// The connection is back after a drop
    Restored,
}

pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<TransportSignal>;

/// Wire-level push channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection and starts delivering signals on `signals`.
    /// Reconnecting after a drop is the transport's job.
    async fn open(&self, identity: &SessionIdentity, signals: SignalSender)
    -> TransportResult<()>;

    async fn emit(&self, event: &ClientEvent) -> TransportResult<()>;

    /// Sends an action and resolves with the server's acknowledgement.
    async fn emit_with_ack(&self, event: &ClientEvent) -> TransportResult<Value>;

    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Decoded outcome of a transport signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Event(PushEvent),
    Dropped,
    /// Back online with every channel re-joined
    Reconnected,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    identity: Option<SessionIdentity>,
    channels: BTreeSet<Channel>,
    status: ConnectionStatus,
    ack_timeout: Duration,
    signals: SignalSender,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identity", &self.identity.as_ref().map(|id| id.user_id))
            .field("channels", &self.channels)
            .field("status", &self.status)
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager and the receiving end of its transport signals.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, ack_timeout: Duration) -> (Self, SignalReceiver) {
        let (signals, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            transport,
            identity: None,
            channels: BTreeSet::new(),
            status: ConnectionStatus::Disconnected,
            ack_timeout,
            signals,
        };
        (manager, receiver)
    }

    /// Opens the connection for `identity`. Returns `false` when it was
    /// already open for the same identity; a different identity replaces the
    /// current connection.
    ///
    /// # Errors
    /// Returns the transport's error when the connection cannot be opened.
    pub async fn connect(&mut self, identity: SessionIdentity) -> TransportResult<bool> {
        if self.status != ConnectionStatus::Disconnected {
            if self.identity.as_ref() == Some(&identity) {
                debug!(user = %identity.user_id, "connection already open");
                return Ok(false);
            }
            self.disconnect().await;
        }

        self.transport.open(&identity, self.signals.clone()).await?;
        info!(user = %identity.user_id, "push channel connected");
        self.identity = Some(identity);
        self.status = ConnectionStatus::Connected;
        Ok(true)
    }

    /// Joins a channel. The channel is remembered even if the join could not
    /// be sent, so it is joined again after the next reconnect.
    ///
    /// # Errors
    /// Returns the transport's error when the join action fails.
    pub async fn subscribe(&mut self, channel: Channel) -> TransportResult<()> {
        if !self.channels.insert(channel) {
            return Ok(());
        }
        debug!(%channel, "subscribing");
        if self.status == ConnectionStatus::Connected {
            self.transport.emit(&channel.join_event()).await?;
        }
        Ok(())
    }

    /// Leaves a channel. The user channel is only dropped locally; the server
    /// releases it on disconnect.
    ///
    /// # Errors
    /// Returns the transport's error when the leave action fails.
    pub async fn unsubscribe(&mut self, channel: Channel) -> TransportResult<()> {
        if !self.channels.remove(&channel) {
            return Ok(());
        }
        debug!(%channel, "unsubscribing");
        if self.status == ConnectionStatus::Connected
            && let Some(leave) = channel.leave_event()
        {
            self.transport.emit(&leave).await?;
        }
        Ok(())
    }

    /// Fire-and-forget action.
    ///
    /// # Errors
    /// Returns [`TransportError::NotConnected`] while offline, or the
    /// transport's error.
    pub async fn send(&self, event: &ClientEvent) -> TransportResult<()> {
        if self.status != ConnectionStatus::Connected {
            return Err(TransportError::NotConnected);
        }
        self.transport.emit(event).await
    }

    /// Action with acknowledgement, bounded by the ack timeout. The returned
    /// future borrows nothing from the manager so it can be polled alongside
    /// other work.
    pub fn request(&self, event: ClientEvent) -> BoxFuture<'static, TransportResult<Value>> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.ack_timeout;
        let connected = self.status == ConnectionStatus::Connected;

        async move {
            if !connected {
                return Err(TransportError::NotConnected);
            }
            let name = event.name();
            match tokio::time::timeout(timeout, transport.emit_with_ack(&event)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::AckTimeout {
                    event: name,
                    timeout,
                }),
            }
        }
        .boxed()
    }

    /// Closes the connection; every channel is left implicitly.
    pub async fn disconnect(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            self.transport.close().await;
            info!("push channel disconnected");
        }
        self.channels.clear();
        self.identity = None;
        self.status = ConnectionStatus::Disconnected;
    }

    /// Interprets a transport signal. After a restore every channel that was
    /// active before the drop is joined again before this returns.
    pub async fn handle_signal(&mut self, signal: TransportSignal) -> Option<ConnectionEvent> {
        if self.status == ConnectionStatus::Disconnected {
            return None;
        }
        match signal {
            TransportSignal::Frame { event, payload } => {
                match PushEvent::from_frame(&event, payload) {
                    Ok(decoded) => Some(ConnectionEvent::Event(decoded)),
                    Err(error) => {
                        warn!(%event, %error, "undecodable push event dropped");
                        None
                    }
                }
            }
            TransportSignal::Dropped { reason } => {
                if self.status != ConnectionStatus::Connected {
                    return None;
                }
                warn!(%reason, "push channel dropped");
                self.status = ConnectionStatus::Reconnecting;
                Some(ConnectionEvent::Dropped)
            }
            TransportSignal::Restored => {
                self.status = ConnectionStatus::Connected;
                counter!("jobchat_reconnects_total").increment(1);
                for channel in &self.channels {
                    if let Err(error) = self.transport.emit(&channel.join_event()).await {
                        warn!(%channel, %error, "failed to re-join channel");
                    }
                }
                info!(channels = self.channels.len(), "push channel restored");
                Some(ConnectionEvent::Reconnected)
            }
        }
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub const fn channels(&self) -> &BTreeSet<Channel> {
        &self.channels
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }
}
