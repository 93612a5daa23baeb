use std::collections::HashMap;

use shared::models::{Conversation, ConversationId, ConversationPatch, UserId};

/// Conversation summaries keyed by id.
#[derive(Debug, Default)]
pub struct ConversationDirectory {
    entries: HashMap<ConversationId, Conversation>,
}

impl ConversationDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a partial summary into the entry, creating it when absent.
    ///
    /// `lastMessage` only moves forward in time. Unread counters present in
    /// the patch replace the stored value key by key. Returns `true` when the
    /// entry was created.
    pub fn upsert(&mut self, patch: ConversationPatch) -> bool {
        let ConversationPatch {
            id,
            participants,
            last_message,
            unread_counters,
        } = patch;

        let mut created = false;
        let entry = self.entries.entry(id).or_insert_with(|| {
            created = true;
            Conversation::placeholder(id, [])
        });

        if let Some(participants) = participants
            && !participants.is_empty()
        {
            entry.participants = participants;
        }

        if let Some(incoming) = last_message {
            let newer = entry
                .last_message
                .as_ref()
                .is_none_or(|current| incoming.created_at >= current.created_at);
            if newer {
                entry.last_message = Some(incoming);
            }
        }

        if let Some(counters) = unread_counters {
            entry.unread_counters.extend(counters);
        }

        created
    }

    /// Adds one unseen message for every participant except `exclude`.
    /// Returns how many counters moved.
    pub fn increment_unread(&mut self, conversation_id: &ConversationId, exclude: &UserId) -> usize {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return 0;
        };
        let mut touched = 0;
        for participant in &entry.participants {
            if participant == exclude {
                continue;
            }
            let counter = entry.unread_counters.entry(*participant).or_insert(0);
            *counter = counter.saturating_add(1);
            touched += 1;
        }
        touched
    }

    /// Sets the user's counter to zero. Returns whether it was non-zero.
    pub fn reset_unread(&mut self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };
        match entry.unread_counters.get_mut(user_id) {
            Some(counter) if *counter > 0 => {
                *counter = 0;
                true
            }
            _ => false,
        }
    }

    /// Display order: most recent activity first, conversations without
    /// messages last, ties by id. Stored order is untouched.
    #[must_use]
    pub fn reorder_by_last_message_desc(&self) -> Vec<&Conversation> {
        let mut ordered: Vec<&Conversation> = self.entries.values().collect();
        ordered.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.id.cmp(&b.id))
        });
        ordered
    }

    /// Sum of the user's counters over every conversation, recomputed from
    /// scratch on each call.
    #[must_use]
    pub fn unread_total_for(&self, user_id: &UserId) -> u32 {
        self.entries
            .values()
            .map(|conversation| conversation.unread_for(user_id))
            .fold(0, u32::saturating_add)
    }

    #[must_use]
    pub fn get(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.entries.get(conversation_id)
    }

    #[must_use]
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.entries.contains_key(conversation_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{LastMessage, Timestamp};
    use uuid::Uuid;

    fn last_message(millis: i64, content: &str) -> LastMessage {
        LastMessage {
            id: Uuid::new_v4(),
            content: content.to_string(),
            sender_id: Uuid::nil(),
            created_at: Timestamp::from_millis(millis),
        }
    }

    fn seeded(alice: UserId, bob: UserId) -> (ConversationDirectory, ConversationId) {
        let mut directory = ConversationDirectory::new();
        let id = Uuid::new_v4();
        directory.upsert(ConversationPatch::new(id).with_participants([alice, bob]));
        (directory, id)
    }

    #[test]
    fn upsert_creates_then_merges() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut directory = ConversationDirectory::new();
        let id = Uuid::new_v4();

        assert!(directory.upsert(ConversationPatch::new(id).with_participants([alice, bob])));
        assert!(!directory.upsert(ConversationPatch::new(id)));
        assert_eq!(directory.get(&id).map(|c| c.participants.len()), Some(2));
    }

    #[test]
    fn last_message_never_moves_backwards() {
        let (mut directory, id) = seeded(Uuid::new_v4(), Uuid::new_v4());
        let mut patch = ConversationPatch::new(id);
        patch.last_message = Some(last_message(20, "newer"));
        directory.upsert(patch);

        let mut older = ConversationPatch::new(id);
        older.last_message = Some(last_message(10, "older"));
        directory.upsert(older);

        let mut same_time = ConversationPatch::new(id);
        same_time.last_message = Some(last_message(20, "same time"));
        directory.upsert(same_time);

        let current = directory.get(&id).and_then(|c| c.last_message.as_ref());
        assert_eq!(current.map(|m| m.content.as_str()), Some("same time"));
    }

    #[test]
    fn counters_from_patch_replace_per_key() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (mut directory, id) = seeded(alice, bob);
        directory.increment_unread(&id, &bob);
        directory.increment_unread(&id, &alice);

        let mut patch = ConversationPatch::new(id);
        patch.unread_counters = Some(HashMap::from([(alice, 7)]));
        directory.upsert(patch);

        let conversation = directory.get(&id).unwrap();
        assert_eq!(conversation.unread_for(&alice), 7);
        assert_eq!(conversation.unread_for(&bob), 1);
    }

    #[test]
    fn increment_skips_sender_and_reset_zeroes() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (mut directory, id) = seeded(alice, bob);

        assert_eq!(directory.increment_unread(&id, &bob), 1);
        assert_eq!(directory.increment_unread(&id, &bob), 1);
        assert_eq!(directory.get(&id).unwrap().unread_for(&alice), 2);
        assert_eq!(directory.get(&id).unwrap().unread_for(&bob), 0);

        assert!(directory.reset_unread(&id, &alice));
        assert!(!directory.reset_unread(&id, &alice));
        assert_eq!(directory.unread_total_for(&alice), 0);
    }

    #[test]
    fn unread_total_sums_every_conversation() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (mut directory, first) = seeded(alice, bob);
        let second = Uuid::new_v4();
        directory.upsert(ConversationPatch::new(second).with_participants([alice, bob]));

        directory.increment_unread(&first, &bob);
        directory.increment_unread(&second, &bob);
        directory.increment_unread(&second, &bob);

        assert_eq!(directory.unread_total_for(&alice), 3);
        assert_eq!(directory.unread_total_for(&bob), 0);
    }

    #[test]
    fn reorder_puts_recent_first_and_empty_last() {
        let mut directory = ConversationDirectory::new();
        let quiet = Uuid::new_v4();
        let old = Uuid::new_v4();
        let recent = Uuid::new_v4();
        directory.upsert(ConversationPatch::new(quiet));
        for (id, millis) in [(old, 10), (recent, 30)] {
            let mut patch = ConversationPatch::new(id);
            patch.last_message = Some(last_message(millis, "x"));
            directory.upsert(patch);
        }

        let order: Vec<ConversationId> = directory
            .reorder_by_last_message_desc()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(order, [recent, old, quiet]);
    }
}
