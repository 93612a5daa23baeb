//! Per-conversation message sequences.
//!
//! Sequences are ordered by `createdAt`, ties by insertion order, and never
//! hold two entries with the same id. Confirmed entries are only ever
//! appended; local entries created by an optimistic send are tagged with a
//! [`DeliveryState`] and swapped out once the authoritative copy is known.

use std::collections::{HashMap, HashSet};

use shared::models::{ConversationId, Message, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Accepted by the server under its authoritative id
    Confirmed,
    /// Sent optimistically under a temporary id, awaiting acknowledgement
    Pending,
    /// Acknowledgement never arrived; waiting for retry or discard
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    pub state: DeliveryState,
}

impl StoredMessage {
    #[must_use]
    pub const fn is_local(&self) -> bool {
        !matches!(self.state, DeliveryState::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { index: usize },
    /// The id was already present; nothing changed
    Duplicate,
}

impl AppendOutcome {
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}

#[derive(Debug, Default)]
struct Sequence {
    entries: Vec<StoredMessage>,
    ids: HashSet<MessageId>,
}

impl Sequence {
    fn insert(&mut self, entry: StoredMessage) -> AppendOutcome {
        if !self.ids.insert(entry.message.id) {
            return AppendOutcome::Duplicate;
        }
        let created_at = entry.message.created_at;
        let index = self
            .entries
            .partition_point(|existing| existing.message.created_at <= created_at);
        self.entries.insert(index, entry);
        AppendOutcome::Inserted { index }
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().position(|entry| entry.message.id == *id)
    }
}

#[derive(Debug, Default)]
pub struct MessageStore {
    sequences: HashMap<ConversationId, Sequence>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insert of a server-confirmed message.
    pub fn append(&mut self, message: &Message) -> AppendOutcome {
        self.sequences
            .entry(message.conversation_id)
            .or_default()
            .insert(StoredMessage {
                message: message.clone(),
                state: DeliveryState::Confirmed,
            })
    }

    /// Inserts an optimistic local message under its temporary id.
    pub fn append_pending(&mut self, message: Message) -> AppendOutcome {
        self.sequences
            .entry(message.conversation_id)
            .or_default()
            .insert(StoredMessage {
                message,
                state: DeliveryState::Pending,
            })
    }

    /// Removes a local entry. Confirmed messages are never removed.
    pub fn remove_pending(
        &mut self,
        conversation_id: &ConversationId,
        temp_id: &MessageId,
    ) -> Option<StoredMessage> {
        let sequence = self.sequences.get_mut(conversation_id)?;
        let index = sequence.position(temp_id)?;
        if !sequence.entries[index].is_local() {
            return None;
        }
        sequence.ids.remove(temp_id);
        Some(sequence.entries.remove(index))
    }

    /// Flags a pending entry as failed. Returns whether anything changed.
    pub fn mark_failed(&mut self, conversation_id: &ConversationId, temp_id: &MessageId) -> bool {
        self.transition(
            conversation_id,
            temp_id,
            DeliveryState::Pending,
            DeliveryState::Failed,
        )
    }

    /// Puts a failed entry back in flight for a retry.
    pub fn mark_pending(&mut self, conversation_id: &ConversationId, temp_id: &MessageId) -> bool {
        self.transition(
            conversation_id,
            temp_id,
            DeliveryState::Failed,
            DeliveryState::Pending,
        )
    }

    fn transition(
        &mut self,
        conversation_id: &ConversationId,
        temp_id: &MessageId,
        from: DeliveryState,
        to: DeliveryState,
    ) -> bool {
        let Some(sequence) = self.sequences.get_mut(conversation_id) else {
            return false;
        };
        let Some(index) = sequence.position(temp_id) else {
            return false;
        };
        let entry = &mut sequence.entries[index];
        if entry.state != from {
            return false;
        }
        entry.state = to;
        true
    }

    /// Replaces a conversation's confirmed history with a snapshot.
    ///
    /// The snapshot is re-sorted (stable, so server order breaks ties) and
    /// de-duplicated. Local pending and failed entries survive the swap.
    /// Returns the number of confirmed messages kept.
    pub fn replace_all(&mut self, conversation_id: ConversationId, mut messages: Vec<Message>) -> usize {
        messages.sort_by_key(|message| message.created_at);

        let local: Vec<StoredMessage> = self
            .sequences
            .remove(&conversation_id)
            .map(|sequence| {
                sequence
                    .entries
                    .into_iter()
                    .filter(StoredMessage::is_local)
                    .collect()
            })
            .unwrap_or_default();

        let mut sequence = Sequence::default();
        let mut kept = 0;
        for message in messages {
            if message.conversation_id != conversation_id {
                continue;
            }
            let outcome = sequence.insert(StoredMessage {
                message,
                state: DeliveryState::Confirmed,
            });
            if outcome.is_inserted() {
                kept += 1;
            }
        }
        for entry in local {
            sequence.insert(entry);
        }

        self.sequences.insert(conversation_id, sequence);
        kept
    }

    /// The ordered sequence; empty for unknown conversations.
    #[must_use]
    pub fn get(&self, conversation_id: &ConversationId) -> &[StoredMessage] {
        self.sequences
            .get(conversation_id)
            .map(|sequence| sequence.entries.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn entry(&self, conversation_id: &ConversationId, id: &MessageId) -> Option<&StoredMessage> {
        let sequence = self.sequences.get(conversation_id)?;
        sequence.position(id).map(|index| &sequence.entries[index])
    }

    #[must_use]
    pub fn contains(&self, conversation_id: &ConversationId, id: &MessageId) -> bool {
        self.sequences
            .get(conversation_id)
            .is_some_and(|sequence| sequence.ids.contains(id))
    }

    #[must_use]
    pub fn len(&self, conversation_id: &ConversationId) -> usize {
        self.get(conversation_id).len()
    }

    /// Most recent server-confirmed message.
    #[must_use]
    pub fn last_confirmed(&self, conversation_id: &ConversationId) -> Option<&Message> {
        self.get(conversation_id)
            .iter()
            .rev()
            .find(|entry| !entry.is_local())
            .map(|entry| &entry.message)
    }

    /// The oldest local entry by `sender_id` with exactly this content; the
    /// twin of a push echo. Failed entries match too, since a timed-out send
    /// may still have been stored by the server.
    #[must_use]
    pub fn find_local_echo(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        content: &str,
    ) -> Option<MessageId> {
        self.get(conversation_id)
            .iter()
            .find(|entry| {
                entry.is_local()
                    && entry.message.sender_id == *sender_id
                    && entry.message.content == content
            })
            .map(|entry| entry.message.id)
    }

    /// Entries awaiting retry or discard.
    pub fn failed(&self, conversation_id: &ConversationId) -> impl Iterator<Item = &StoredMessage> {
        self.get(conversation_id)
            .iter()
            .filter(|entry| entry.state == DeliveryState::Failed)
    }
}
