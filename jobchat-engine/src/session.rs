//! # Session driver
//!
//! [`SyncSession`] wires the connection, the REST collaborator and the
//! reconcilers together. It processes exactly one input at a time (a
//! transport signal, a user command or a finished request) and only awaits
//! I/O after the handler for that input has returned, so state transitions
//! are never observed half-applied.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use shared::config::Config;
use shared::models::{
    ClientEvent, Conversation, ConversationId, CreateConversationRequest, Message, MessageId,
    NotificationEvent, NotificationId, PushEvent, UserId,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::SnapshotApi;
use crate::connection::{
    ConnectionEvent, ConnectionManager, SessionIdentity, SignalReceiver, Transport,
    TransportSignal,
};
use crate::error::{FetchError, SendError, TransportError, TransportResult};
use crate::notifications::NotificationAggregator;
use crate::reconciler::{Command, EventReconciler};
use crate::retry::{RetryConfig, with_retry};
use crate::viewport::{ScrollThrottle, ViewportFrame, ViewportState};

/// Actions requested by the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SelectConversation(ConversationId),
    /// The conversation view was closed
    CloseConversation,
    SendMessage {
        conversation_id: ConversationId,
        content: String,
    },
    RetrySend {
        conversation_id: ConversationId,
        temp_id: MessageId,
    },
    DiscardFailed {
        conversation_id: ConversationId,
        temp_id: MessageId,
    },
    CreateConversation {
        participants: Vec<UserId>,
    },
    RefreshConversations,
    MarkNotificationRead(NotificationId),
    MarkAllNotificationsRead,
    RemoveNotification(NotificationId),
    /// Raw scroll offset of the message list, in pixels
    Scroll(f64),
    /// New viewport height, in pixels
    Resize(f64),
    Shutdown,
}

/// Which snapshot or bulk request gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    Conversations,
    Messages(ConversationId),
    Notifications,
    MarkAllNotificationsRead,
    CreateConversation,
}

/// Changes published for the user interface.
#[derive(Debug)]
pub enum SessionUpdate {
    UnreadTotal(u32),
    ConversationChanged(ConversationId),
    Viewport {
        conversation_id: ConversationId,
        frame: ViewportFrame,
    },
    MessageDelivered {
        temp_id: MessageId,
        message_id: MessageId,
    },
    SendFailed {
        conversation_id: ConversationId,
        error: SendError,
    },
    ConversationCreated(ConversationId),
    /// An acknowledged push action was refused or timed out
    ActionFailed {
        event: &'static str,
        error: TransportError,
    },
    NotificationsChanged {
        unread: usize,
        revision: u64,
    },
    LoadFailed {
        target: LoadTarget,
        error: FetchError,
    },
    Reconnecting,
    Reconnected,
}

/// A request that was in flight when the handler that issued it returned.
#[derive(Debug)]
enum Completion {
    SendAck {
        conversation_id: ConversationId,
        temp_id: MessageId,
        result: TransportResult<Value>,
    },
    ConversationCreate {
        request: CreateConversationRequest,
        result: TransportResult<Value>,
    },
    ConversationCreatedViaApi(Result<Conversation, FetchError>),
    Conversations(Result<Vec<Conversation>, FetchError>),
    Messages {
        conversation_id: ConversationId,
        result: Result<Vec<Message>, FetchError>,
    },
    Notifications(Result<Vec<NotificationEvent>, FetchError>),
    MarkAllRead(Result<(), FetchError>),
}

enum LoopEvent {
    Command(Option<SessionCommand>),
    Signal(Option<TransportSignal>),
    Completion(Completion),
    ScrollDue,
    Cancelled,
}

pub struct SyncSession {
    connection: ConnectionManager,
    signals: SignalReceiver,
    api: Arc<dyn SnapshotApi>,
    reconciler: EventReconciler,
    notifications: NotificationAggregator,
    viewport: ViewportState,
    throttle: ScrollThrottle,
    fetch_retry: RetryConfig,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    published_unread_total: Option<u32>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("connection", &self.connection)
            .field("selected", &self.reconciler.selected())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        api: Arc<dyn SnapshotApi>,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (connection, signals) =
            ConnectionManager::new(transport, config.connection.ack_timeout());
        let (updates, receiver) = mpsc::unbounded_channel();
        let session = Self {
            connection,
            signals,
            api,
            reconciler: EventReconciler::new(config.connection.staleness_threshold()),
            notifications: NotificationAggregator::new(),
            viewport: ViewportState::new(&config.viewport),
            throttle: ScrollThrottle::new(std::time::Duration::from_millis(
                config.viewport.scroll_throttle_ms,
            )),
            fetch_retry: RetryConfig::for_fetches(&config.connection),
            in_flight: FuturesUnordered::new(),
            updates,
            published_unread_total: None,
        };
        (session, receiver)
    }

    /// Connects and requests the cold-start snapshots. Connecting again with
    /// the same identity does nothing.
    ///
    /// # Errors
    /// Returns the transport's error when the connection cannot be opened.
    pub async fn connect(&mut self, identity: SessionIdentity) -> TransportResult<()> {
        let user_id = identity.user_id;
        if !self.connection.connect(identity).await? {
            return Ok(());
        }
        let mut commands = self.reconciler.start(user_id);
        commands.extend(self.notifications.attach(user_id));
        self.execute(commands).await;
        self.publish_changes();
        Ok(())
    }

    /// Tears the session down and forgets all synchronized state.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
        self.reconciler.reset();
        self.notifications.detach();
        self.viewport.clear();
        self.in_flight = FuturesUnordered::new();
        self.published_unread_total = None;
    }

    /// Drives the session until `commands` closes, a
    /// [`SessionCommand::Shutdown`] arrives, or `cancel` fires.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.throttle.deadline();
            let event = tokio::select! {
                () = cancel.cancelled() => LoopEvent::Cancelled,
                command = commands.recv() => LoopEvent::Command(command),
                signal = self.signals.recv() => LoopEvent::Signal(signal),
                Some(completion) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    LoopEvent::Completion(completion)
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    LoopEvent::ScrollDue
                }
            };

            match event {
                LoopEvent::Cancelled | LoopEvent::Command(None | Some(SessionCommand::Shutdown)) => {
                    break;
                }
                LoopEvent::Command(Some(command)) => self.handle(command).await,
                LoopEvent::Signal(Some(signal)) => self.handle_signal(signal).await,
                LoopEvent::Signal(None) => {}
                LoopEvent::Completion(completion) => self.handle_completion(completion).await,
                LoopEvent::ScrollDue => self.flush_scroll(),
            }
        }

        self.disconnect().await;
        info!("sync session stopped");
    }

    /// Processes queued transport signals and waits for every in-flight
    /// request, including the ones those results trigger.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(signal) = self.signals.try_recv() {
                self.handle_signal(signal).await;
            }
            let Some(completion) = self.in_flight.next().await else {
                break;
            };
            self.handle_completion(completion).await;
        }
    }

    /// Applies one user command.
    pub async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectConversation(conversation_id) => {
                let commands = self.reconciler.select(conversation_id);
                self.follow_selection();
                self.execute(commands).await;
            }
            SessionCommand::CloseConversation => {
                let commands = self.reconciler.deselect();
                self.follow_selection();
                self.execute(commands).await;
            }
            SessionCommand::SendMessage {
                conversation_id,
                content,
            } => match self.reconciler.send_message(conversation_id, content) {
                Ok((_, commands)) => self.execute(commands).await,
                Err(error) => self.publish(SessionUpdate::SendFailed {
                    conversation_id,
                    error,
                }),
            },
            SessionCommand::RetrySend {
                conversation_id,
                temp_id,
            } => match self.reconciler.retry_send(conversation_id, temp_id) {
                Ok(commands) => self.execute(commands).await,
                Err(error) => self.publish(SessionUpdate::SendFailed {
                    conversation_id,
                    error,
                }),
            },
            SessionCommand::DiscardFailed {
                conversation_id,
                temp_id,
            } => {
                if let Err(error) = self.reconciler.discard_failed(conversation_id, temp_id) {
                    self.publish(SessionUpdate::SendFailed {
                        conversation_id,
                        error,
                    });
                }
            }
            SessionCommand::CreateConversation { participants } => {
                let commands = self.reconciler.create_conversation(participants);
                self.execute(commands).await;
            }
            SessionCommand::RefreshConversations => {
                let commands = self.reconciler.refresh_directory();
                self.execute(commands).await;
            }
            SessionCommand::MarkNotificationRead(id) => {
                if self.notifications.mark_read(&id) {
                    self.publish_notifications();
                }
            }
            SessionCommand::MarkAllNotificationsRead => {
                let commands = self.notifications.mark_all_read();
                if !commands.is_empty() {
                    self.publish_notifications();
                }
                self.execute(commands).await;
            }
            SessionCommand::RemoveNotification(id) => {
                if self.notifications.remove(&id).is_some() {
                    self.publish_notifications();
                }
            }
            SessionCommand::Scroll(offset) => {
                if let Some(offset) = self.throttle.offer(offset, Instant::now()) {
                    self.viewport.on_scroll(offset);
                    self.render_viewport();
                }
            }
            SessionCommand::Resize(height) => {
                self.viewport.resize(height);
                self.render_viewport();
            }
            SessionCommand::Shutdown => {}
        }
        self.publish_changes();
    }

    async fn handle_signal(&mut self, signal: TransportSignal) {
        let Some(event) = self.connection.handle_signal(signal).await else {
            return;
        };
        match event {
            ConnectionEvent::Event(PushEvent::NewNotification(notification)) => {
                if self.notifications.on_notification(notification) {
                    self.publish_notifications();
                }
            }
            ConnectionEvent::Event(event) => {
                let commands = self.reconciler.on_push_event(event);
                self.follow_selection();
                self.execute(commands).await;
            }
            ConnectionEvent::Dropped => self.publish(SessionUpdate::Reconnecting),
            ConnectionEvent::Reconnected => {
                let mut commands = self.reconciler.on_reconnect(Instant::now());
                commands.extend(self.notifications.on_reconnect());
                self.publish(SessionUpdate::Reconnected);
                self.execute(commands).await;
            }
        }
        self.publish_changes();
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::SendAck {
                conversation_id,
                temp_id,
                result,
            } => match result.and_then(|ack| Ok(serde_json::from_value::<Message>(ack)?)) {
                Ok(message) => {
                    let message_id = message.id;
                    let commands = self.reconciler.on_send_ack(temp_id, message);
                    self.publish(SessionUpdate::MessageDelivered {
                        temp_id,
                        message_id,
                    });
                    self.execute(commands).await;
                }
                Err(source) => {
                    if self.reconciler.on_send_failed(conversation_id, temp_id) {
                        self.publish(SessionUpdate::SendFailed {
                            conversation_id,
                            error: SendError::Undelivered { temp_id, source },
                        });
                    }
                }
            },
            Completion::ConversationCreate { request, result } => {
                match result.and_then(|ack| Ok(serde_json::from_value::<Conversation>(ack)?)) {
                    Ok(conversation) => self.conversation_created(conversation).await,
                    Err(TransportError::NotConnected) => {
                        debug!("push channel offline, creating conversation over REST");
                        let api = Arc::clone(&self.api);
                        self.in_flight.push(
                            async move {
                                Completion::ConversationCreatedViaApi(
                                    api.create_conversation(request.participants).await,
                                )
                            }
                            .boxed(),
                        );
                    }
                    Err(error) => {
                        warn!(%error, "conversation creation failed");
                        self.publish(SessionUpdate::ActionFailed {
                            event: "conversation:create",
                            error,
                        });
                    }
                }
            }
            Completion::ConversationCreatedViaApi(result) => match result {
                Ok(conversation) => self.conversation_created(conversation).await,
                Err(error) => self.publish(SessionUpdate::LoadFailed {
                    target: LoadTarget::CreateConversation,
                    error,
                }),
            },
            Completion::Conversations(result) => match result {
                Ok(conversations) => {
                    let commands = self.reconciler.apply_conversations(conversations);
                    self.execute(commands).await;
                }
                Err(error) => self.publish(SessionUpdate::LoadFailed {
                    target: LoadTarget::Conversations,
                    error,
                }),
            },
            Completion::Messages {
                conversation_id,
                result,
            } => match result {
                Ok(messages) => {
                    let commands = self.reconciler.apply_messages(conversation_id, messages);
                    self.execute(commands).await;
                }
                Err(error) => {
                    self.reconciler.messages_failed(conversation_id);
                    self.publish(SessionUpdate::LoadFailed {
                        target: LoadTarget::Messages(conversation_id),
                        error,
                    });
                }
            },
            Completion::Notifications(result) => match result {
                Ok(snapshot) => {
                    self.notifications.apply_snapshot(snapshot);
                    self.publish_notifications();
                }
                Err(error) => {
                    self.notifications.snapshot_failed();
                    self.publish(SessionUpdate::LoadFailed {
                        target: LoadTarget::Notifications,
                        error,
                    });
                }
            },
            Completion::MarkAllRead(result) => {
                if let Err(error) = result {
                    self.publish(SessionUpdate::LoadFailed {
                        target: LoadTarget::MarkAllNotificationsRead,
                        error,
                    });
                }
            }
        }
        self.publish_changes();
    }

    async fn conversation_created(&mut self, conversation: Conversation) {
        let conversation_id = conversation.id;
        let commands = self.reconciler.on_conversation_created(conversation);
        self.follow_selection();
        self.publish(SessionUpdate::ConversationCreated(conversation_id));
        self.execute(commands).await;
    }

    /// Points the view at whatever the reconciler has open. Handlers may
    /// select a conversation on their own, as `conversation:new` does when
    /// nothing is open yet.
    fn follow_selection(&mut self) {
        match self.reconciler.selected() {
            Some(conversation_id) => {
                if self.viewport.select(conversation_id) {
                    debug!(conversation = %conversation_id, "view follows selection");
                }
            }
            None => self.viewport.clear(),
        }
    }

    /// Performs the I/O a handler asked for. Acknowledged actions and
    /// fetches are queued and complete later as separate inputs.
    async fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::Subscribe(channel) => {
                    if let Err(error) = self.connection.subscribe(channel).await {
                        warn!(%channel, %error, "subscribe failed");
                    }
                }
                Command::Unsubscribe(channel) => {
                    if let Err(error) = self.connection.unsubscribe(channel).await {
                        warn!(%channel, %error, "unsubscribe failed");
                    }
                }
                Command::Emit(event) => {
                    if let Err(error) = self.connection.send(&event).await {
                        warn!(event = event.name(), %error, "push action failed");
                    }
                }
                Command::SendMessage { temp_id, request } => {
                    let conversation_id = request.conversation_id;
                    let ack = self.connection.request(ClientEvent::SendMessage(request));
                    self.in_flight.push(
                        async move {
                            Completion::SendAck {
                                conversation_id,
                                temp_id,
                                result: ack.await,
                            }
                        }
                        .boxed(),
                    );
                }
                Command::CreateConversation(request) => {
                    let ack = self
                        .connection
                        .request(ClientEvent::ConversationCreate(request.clone()));
                    self.in_flight.push(
                        async move {
                            Completion::ConversationCreate {
                                request,
                                result: ack.await,
                            }
                        }
                        .boxed(),
                    );
                }
                Command::FetchMessages(conversation_id) => {
                    let api = Arc::clone(&self.api);
                    let retry = self.fetch_retry.clone();
                    self.in_flight.push(
                        async move {
                            let result = with_retry(retry, FetchError::is_transient, || {
                                api.fetch_messages(conversation_id)
                            })
                            .await
                            .map_err(FetchError::from);
                            Completion::Messages {
                                conversation_id,
                                result,
                            }
                        }
                        .boxed(),
                    );
                }
                Command::FetchConversations(user_id) => {
                    let api = Arc::clone(&self.api);
                    let retry = self.fetch_retry.clone();
                    self.in_flight.push(
                        async move {
                            let result = with_retry(retry, FetchError::is_transient, || {
                                api.fetch_conversations(user_id)
                            })
                            .await
                            .map_err(FetchError::from);
                            Completion::Conversations(result)
                        }
                        .boxed(),
                    );
                }
                Command::FetchNotifications(user_id) => {
                    let api = Arc::clone(&self.api);
                    let retry = self.fetch_retry.clone();
                    self.in_flight.push(
                        async move {
                            let result = with_retry(retry, FetchError::is_transient, || {
                                api.fetch_notifications(user_id)
                            })
                            .await
                            .map_err(FetchError::from);
                            Completion::Notifications(result)
                        }
                        .boxed(),
                    );
                }
                Command::MarkAllNotificationsRead(user_id) => {
                    let api = Arc::clone(&self.api);
                    let retry = self.fetch_retry.clone();
                    self.in_flight.push(
                        async move {
                            let result = with_retry(retry, FetchError::is_transient, || {
                                api.mark_all_notifications_read(user_id)
                            })
                            .await
                            .map_err(FetchError::from);
                            Completion::MarkAllRead(result)
                        }
                        .boxed(),
                    );
                }
                Command::AutoScroll(conversation_id) => {
                    if self.viewport.conversation_id() == Some(conversation_id) {
                        self.viewport.request_auto_scroll();
                    }
                }
            }
        }
    }

    fn flush_scroll(&mut self) {
        if let Some(offset) = self.throttle.flush(Instant::now()) {
            self.viewport.on_scroll(offset);
            self.render_viewport();
        }
    }

    fn render_viewport(&mut self) {
        let Some(conversation_id) = self.viewport.conversation_id() else {
            return;
        };
        let length = self.reconciler.messages().len(&conversation_id);
        let frame = self.viewport.render(length);
        self.publish(SessionUpdate::Viewport {
            conversation_id,
            frame,
        });
    }

    fn publish_changes(&mut self) {
        let total = self.reconciler.unread_total();
        if self.published_unread_total != Some(total) {
            self.published_unread_total = Some(total);
            self.publish(SessionUpdate::UnreadTotal(total));
        }

        let open = self.viewport.conversation_id();
        let mut render = false;
        for conversation_id in self.reconciler.take_changed() {
            render |= open == Some(conversation_id);
            self.publish(SessionUpdate::ConversationChanged(conversation_id));
        }
        if render {
            self.render_viewport();
        }
    }

    fn publish_notifications(&self) {
        self.publish(SessionUpdate::NotificationsChanged {
            unread: self.notifications.unread_count(),
            revision: self.notifications.revision(),
        });
    }

    fn publish(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            debug!("session update dropped, no listener");
        }
    }

    #[must_use]
    pub const fn reconciler(&self) -> &EventReconciler {
        &self.reconciler
    }

    #[must_use]
    pub const fn notifications(&self) -> &NotificationAggregator {
        &self.notifications
    }

    #[must_use]
    pub const fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}
