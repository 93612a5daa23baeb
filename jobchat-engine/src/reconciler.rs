//! # Event reconciliation
//!
//! [`EventReconciler`] is the single writer of the [`MessageStore`] and the
//! [`ConversationDirectory`]. Push events, snapshot results and local user
//! actions all enter through its handlers. Every handler is synchronous, runs
//! its whole mutation to completion and hands back the I/O it wants performed
//! as a list of [`Command`]s for the session driver to execute afterwards.
//!
//! Each conversation moves through [`SyncState`]: `Cold` until its history is
//! fetched, `Synced` while live events are applied on top of that history,
//! and `Stale` after a reconnect may have dropped events, until the next
//! fetch completes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use metrics::counter;
use shared::models::{
    Channel, ClientEvent, Conversation, ConversationId, ConversationPatch,
    CreateConversationRequest, Message, MessageId, PushEvent, ReadReceipt, SendMessageRequest,
    Timestamp, UserId,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::ConversationDirectory;
use crate::error::SendError;
use crate::store::{AppendOutcome, DeliveryState, MessageStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No snapshot loaded yet
    #[default]
    Cold,
    /// Snapshot loaded and live events applied
    Synced,
    /// Events may have been missed; refetch before trusting
    Stale,
}

/// I/O requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(Channel),
    Unsubscribe(Channel),
    /// Fire-and-forget push action
    Emit(ClientEvent),
    /// `sendMessage` with acknowledgement
    SendMessage {
        temp_id: MessageId,
        request: SendMessageRequest,
    },
    FetchMessages(ConversationId),
    FetchConversations(UserId),
    FetchNotifications(UserId),
    MarkAllNotificationsRead(UserId),
    /// `conversation:create` with acknowledgement
    CreateConversation(CreateConversationRequest),
    /// The open conversation grew; pin the view to the bottom
    AutoScroll(ConversationId),
}

#[derive(Debug, Default)]
struct ConversationSync {
    state: SyncState,
    last_event_at: Option<Instant>,
    fetching: bool,
    /// Messages applied while a fetch is in flight, re-applied on top of it
    replay: Vec<Message>,
}

#[derive(Debug)]
pub struct EventReconciler {
    viewer: Option<UserId>,
    messages: MessageStore,
    directory: ConversationDirectory,
    directory_state: SyncState,
    sync: HashMap<ConversationId, ConversationSync>,
    selected: Option<ConversationId>,
    counted_for_unread: HashSet<MessageId>,
    unread_total: u32,
    changed: BTreeSet<ConversationId>,
    staleness_threshold: Duration,
}

impl EventReconciler {
    #[must_use]
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            viewer: None,
            messages: MessageStore::new(),
            directory: ConversationDirectory::new(),
            directory_state: SyncState::Cold,
            sync: HashMap::new(),
            selected: None,
            counted_for_unread: HashSet::new(),
            unread_total: 0,
            changed: BTreeSet::new(),
            staleness_threshold,
        }
    }

    /// Binds the reconciler to a signed-in user and requests the cold start.
    /// Switching to a different user drops everything known so far.
    pub fn start(&mut self, viewer: UserId) -> Vec<Command> {
        if self.viewer.is_some_and(|current| current != viewer) {
            self.reset();
        }
        self.viewer = Some(viewer);
        self.directory_state = SyncState::Cold;
        info!(%viewer, "starting conversation sync");
        vec![
            Command::Subscribe(Channel::User(viewer)),
            Command::FetchConversations(viewer),
        ]
    }

    /// Forgets all state; used when the session disconnects.
    pub fn reset(&mut self) {
        *self = Self::new(self.staleness_threshold);
    }

    /// Routes a conversation-domain push event to its handler.
    pub fn on_push_event(&mut self, event: PushEvent) -> Vec<Command> {
        match event {
            PushEvent::NewMessage(message) => self.on_new_message(message),
            PushEvent::ConversationNew(conversation) => self.on_conversation_new(conversation),
            PushEvent::UnreadReset(receipt) => self.on_unread_reset(receipt),
            PushEvent::NewNotification(notification) => {
                debug!(id = %notification.id, "notification event ignored by conversation sync");
                Vec::new()
            }
        }
    }

    pub fn on_new_message(&mut self, message: Message) -> Vec<Command> {
        let Some(viewer) = self.viewer else {
            debug!(id = %message.id, "message before session start ignored");
            return Vec::new();
        };
        let conversation_id = message.conversation_id;

        if message.sender_id == viewer
            && !self.messages.contains(&conversation_id, &message.id)
            && let Some(temp_id) =
                self.messages
                    .find_local_echo(&conversation_id, &viewer, &message.content)
        {
            self.messages.remove_pending(&conversation_id, &temp_id);
            debug!(%temp_id, id = %message.id, "echo resolved local message");
        }

        let sync = self.sync.entry(conversation_id).or_default();
        sync.last_event_at = Some(Instant::now());
        if sync.fetching {
            sync.replay.push(message.clone());
        }

        if self.messages.append(&message) == AppendOutcome::Duplicate {
            counter!("jobchat_duplicate_events_total", "event" => "newMessage").increment(1);
            debug!(
                id = %message.id,
                conversation = %conversation_id,
                "duplicate message absorbed"
            );
            return Vec::new();
        }

        if !self.directory.contains(&conversation_id) {
            self.directory.upsert(
                ConversationPatch::new(conversation_id).with_participants([message.sender_id, viewer]),
            );
        }
        self.directory
            .upsert(ConversationPatch::new(conversation_id).with_last_message(&message));

        let viewing = self.selected == Some(conversation_id);
        let first_sighting = self.counted_for_unread.insert(message.id);
        if first_sighting && !viewing && message.sender_id != viewer {
            self.directory
                .increment_unread(&conversation_id, &message.sender_id);
        }

        self.changed.insert(conversation_id);
        self.recompute_unread_total();

        if viewing {
            vec![Command::AutoScroll(conversation_id)]
        } else {
            Vec::new()
        }
    }

    /// Server-announced conversation. Selects it when nothing is open yet.
    pub fn on_conversation_new(&mut self, conversation: Conversation) -> Vec<Command> {
        let conversation_id = conversation.id;
        self.directory.upsert(conversation.into());
        self.sync.entry(conversation_id).or_default().last_event_at = Some(Instant::now());
        self.changed.insert(conversation_id);
        self.recompute_unread_total();

        if self.selected.is_none() {
            debug!(conversation = %conversation_id, "bootstrapping first conversation");
            return self.select(conversation_id);
        }
        Vec::new()
    }

    pub fn on_unread_reset(&mut self, receipt: ReadReceipt) -> Vec<Command> {
        if self.viewer == Some(receipt.user_id)
            && self
                .directory
                .reset_unread(&receipt.conversation_id, &receipt.user_id)
        {
            self.changed.insert(receipt.conversation_id);
        }
        self.recompute_unread_total();
        Vec::new()
    }

    /// Opens a conversation: marks it read locally and on the server, moves
    /// the message subscription to it, and fetches its history unless it is
    /// already synced.
    pub fn select(&mut self, conversation_id: ConversationId) -> Vec<Command> {
        let Some(viewer) = self.viewer else {
            return Vec::new();
        };
        let mut commands = Vec::new();

        if self.selected != Some(conversation_id) {
            if let Some(previous) = self.selected.replace(conversation_id) {
                commands.push(Command::Unsubscribe(Channel::Conversation(previous)));
            }
            commands.push(Command::Subscribe(Channel::Conversation(conversation_id)));
        }

        self.directory.reset_unread(&conversation_id, &viewer);
        commands.push(Command::Emit(ClientEvent::ReadConversation(ReadReceipt {
            conversation_id,
            user_id: viewer,
        })));

        if self.state_of(&conversation_id) != SyncState::Synced
            && let Some(fetch) = self.begin_fetch(conversation_id)
        {
            commands.push(fetch);
        }

        self.changed.insert(conversation_id);
        self.recompute_unread_total();
        commands
    }

    /// Closes the open conversation. The user channel stays subscribed.
    pub fn deselect(&mut self) -> Vec<Command> {
        self.selected
            .take()
            .map(|previous| vec![Command::Unsubscribe(Channel::Conversation(previous))])
            .unwrap_or_default()
    }

    fn begin_fetch(&mut self, conversation_id: ConversationId) -> Option<Command> {
        let sync = self.sync.entry(conversation_id).or_default();
        if sync.fetching {
            return None;
        }
        sync.fetching = true;
        sync.replay.clear();
        Some(Command::FetchMessages(conversation_id))
    }

    /// Applies a history snapshot, then replays messages that raced it.
    pub fn apply_messages(
        &mut self,
        conversation_id: ConversationId,
        messages: Vec<Message>,
    ) -> Vec<Command> {
        let sync = self.sync.entry(conversation_id).or_default();
        let replay = std::mem::take(&mut sync.replay);
        sync.fetching = false;
        sync.state = SyncState::Synced;
        sync.last_event_at = Some(Instant::now());

        let kept = self.messages.replace_all(conversation_id, messages);
        for message in &replay {
            self.messages.append(message);
        }
        for entry in self.messages.get(&conversation_id) {
            if !entry.is_local() {
                self.counted_for_unread.insert(entry.message.id);
            }
        }
        if let Some(last) = self.messages.last_confirmed(&conversation_id) {
            let patch = ConversationPatch::new(conversation_id).with_last_message(last);
            self.directory.upsert(patch);
        }

        info!(
            conversation = %conversation_id,
            messages = kept,
            replayed = replay.len(),
            "conversation snapshot loaded"
        );
        self.changed.insert(conversation_id);
        self.recompute_unread_total();
        Vec::new()
    }

    /// A history fetch gave up. Already-applied state is left as it was.
    pub fn messages_failed(&mut self, conversation_id: ConversationId) {
        if let Some(sync) = self.sync.get_mut(&conversation_id) {
            sync.fetching = false;
            sync.replay.clear();
        }
        warn!(conversation = %conversation_id, "conversation snapshot unavailable");
    }

    /// Merges the conversation list snapshot. Entries are never removed.
    pub fn apply_conversations(&mut self, conversations: Vec<Conversation>) -> Vec<Command> {
        let count = conversations.len();
        for conversation in conversations {
            self.changed.insert(conversation.id);
            self.directory.upsert(conversation.into());
        }
        self.directory_state = SyncState::Synced;
        self.recompute_unread_total();
        info!(conversations = count, "conversation list loaded");
        Vec::new()
    }

    pub fn refresh_directory(&mut self) -> Vec<Command> {
        self.viewer
            .map(|viewer| vec![Command::FetchConversations(viewer)])
            .unwrap_or_default()
    }

    /// Optimistically appends a message under a temporary id and asks for it
    /// to be sent.
    ///
    /// # Errors
    /// Returns [`SendError::NoSession`] before [`Self::start`].
    pub fn send_message(
        &mut self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<(MessageId, Vec<Command>), SendError> {
        let viewer = self.viewer.ok_or(SendError::NoSession)?;
        let temp_id = Uuid::new_v4();

        // Local clocks may lag the server; keep the draft at the bottom.
        let newest = self
            .messages
            .get(&conversation_id)
            .last()
            .map(|entry| entry.message.created_at);
        let created_at = newest.map_or_else(Timestamp::now, |newest| newest.max(Timestamp::now()));

        let message = Message {
            id: temp_id,
            conversation_id,
            sender_id: viewer,
            content: content.into(),
            created_at,
        };
        let request = SendMessageRequest::from(&message);
        self.messages.append_pending(message);
        self.changed.insert(conversation_id);
        debug!(%temp_id, conversation = %conversation_id, "optimistic send");

        let mut commands = vec![Command::SendMessage { temp_id, request }];
        if self.selected == Some(conversation_id) {
            commands.push(Command::AutoScroll(conversation_id));
        }
        Ok((temp_id, commands))
    }

    /// Swaps the temporary entry for the authoritative message.
    pub fn on_send_ack(&mut self, temp_id: MessageId, message: Message) -> Vec<Command> {
        let conversation_id = message.conversation_id;
        self.messages.remove_pending(&conversation_id, &temp_id);
        self.counted_for_unread.insert(message.id);

        match self.messages.append(&message) {
            AppendOutcome::Inserted { .. } => {
                self.directory
                    .upsert(ConversationPatch::new(conversation_id).with_last_message(&message));
            }
            AppendOutcome::Duplicate => {
                debug!(%temp_id, id = %message.id, "ack after echo");
            }
        }
        debug!(%temp_id, id = %message.id, "send acknowledged");

        self.changed.insert(conversation_id);
        self.recompute_unread_total();
        if self.selected == Some(conversation_id) {
            vec![Command::AutoScroll(conversation_id)]
        } else {
            Vec::new()
        }
    }

    /// Marks an unacknowledged send as failed. Returns `false` when the entry
    /// was already resolved by its echo.
    pub fn on_send_failed(&mut self, conversation_id: ConversationId, temp_id: MessageId) -> bool {
        let marked = self.messages.mark_failed(&conversation_id, &temp_id);
        if marked {
            counter!("jobchat_send_failures_total").increment(1);
            warn!(%temp_id, conversation = %conversation_id, "message send failed");
            self.changed.insert(conversation_id);
        }
        marked
    }

    /// Re-sends a failed message under the same temporary id.
    ///
    /// # Errors
    /// Returns [`SendError::NotFailed`] when the entry is not failed.
    pub fn retry_send(
        &mut self,
        conversation_id: ConversationId,
        temp_id: MessageId,
    ) -> Result<Vec<Command>, SendError> {
        if !self.messages.mark_pending(&conversation_id, &temp_id) {
            return Err(SendError::NotFailed { temp_id });
        }
        let entry = self
            .messages
            .entry(&conversation_id, &temp_id)
            .ok_or(SendError::NotFailed { temp_id })?;
        let request = SendMessageRequest::from(&entry.message);
        self.changed.insert(conversation_id);
        Ok(vec![Command::SendMessage { temp_id, request }])
    }

    /// Drops a failed message at the user's request.
    ///
    /// # Errors
    /// Returns [`SendError::NotFailed`] when the entry is not failed.
    pub fn discard_failed(
        &mut self,
        conversation_id: ConversationId,
        temp_id: MessageId,
    ) -> Result<(), SendError> {
        let failed = self
            .messages
            .entry(&conversation_id, &temp_id)
            .is_some_and(|entry| entry.state == DeliveryState::Failed);
        if !failed {
            return Err(SendError::NotFailed { temp_id });
        }
        self.messages.remove_pending(&conversation_id, &temp_id);
        self.changed.insert(conversation_id);
        Ok(())
    }

    /// Requests a conversation with `participants`; the viewer is always
    /// included.
    pub fn create_conversation(&mut self, participants: Vec<UserId>) -> Vec<Command> {
        let Some(viewer) = self.viewer else {
            return Vec::new();
        };
        let mut participants: BTreeSet<UserId> = participants.into_iter().collect();
        participants.insert(viewer);
        vec![Command::CreateConversation(CreateConversationRequest {
            participants: participants.into_iter().collect(),
        })]
    }

    /// The server confirmed a conversation this client asked for.
    pub fn on_conversation_created(&mut self, conversation: Conversation) -> Vec<Command> {
        let conversation_id = conversation.id;
        self.directory.upsert(conversation.into());
        self.sync.entry(conversation_id).or_default();
        self.changed.insert(conversation_id);
        self.select(conversation_id)
    }

    /// The push channel came back after a drop.
    ///
    /// Synced conversations quiet for at least the staleness threshold become
    /// stale. The conversation list is refetched and so is the open
    /// conversation if it went stale; others refetch when next selected.
    pub fn on_reconnect(&mut self, now: Instant) -> Vec<Command> {
        let mut stale = 0usize;
        for (conversation_id, sync) in &mut self.sync {
            let quiet_long_enough = sync.last_event_at.is_none_or(|at| {
                now.saturating_duration_since(at) >= self.staleness_threshold
            });
            if sync.state == SyncState::Synced && quiet_long_enough {
                sync.state = SyncState::Stale;
                self.changed.insert(*conversation_id);
                stale += 1;
            }
        }
        info!(stale, "push channel restored");

        let mut commands = Vec::new();
        if let Some(viewer) = self.viewer {
            if self.directory_state == SyncState::Synced {
                self.directory_state = SyncState::Stale;
            }
            commands.push(Command::FetchConversations(viewer));
        }
        if let Some(selected) = self.selected
            && self.state_of(&selected) == SyncState::Stale
            && let Some(fetch) = self.begin_fetch(selected)
        {
            commands.push(fetch);
        }
        commands
    }

    fn recompute_unread_total(&mut self) {
        self.unread_total = self
            .viewer
            .map_or(0, |viewer| self.directory.unread_total_for(&viewer));
    }

    /// Conversations touched since the last call.
    pub fn take_changed(&mut self) -> Vec<ConversationId> {
        std::mem::take(&mut self.changed).into_iter().collect()
    }

    #[must_use]
    pub fn state_of(&self, conversation_id: &ConversationId) -> SyncState {
        self.sync
            .get(conversation_id)
            .map(|sync| sync.state)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_fetching(&self, conversation_id: &ConversationId) -> bool {
        self.sync
            .get(conversation_id)
            .is_some_and(|sync| sync.fetching)
    }

    #[must_use]
    pub const fn directory_state(&self) -> SyncState {
        self.directory_state
    }

    #[must_use]
    pub const fn viewer(&self) -> Option<UserId> {
        self.viewer
    }

    #[must_use]
    pub const fn selected(&self) -> Option<ConversationId> {
        self.selected
    }

    #[must_use]
    pub const fn unread_total(&self) -> u32 {
        self.unread_total
    }

    #[must_use]
    pub const fn messages(&self) -> &MessageStore {
        &self.messages
    }

    #[must_use]
    pub const fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }
}
