use std::collections::HashSet;

use metrics::counter;
use shared::models::{
    Channel, ClientEvent, MarkAllReadRequest, NotificationEvent, NotificationId, UserId,
};
use tracing::{debug, info};

use crate::reconciler::{Command, SyncState};

/// Flat, newest-first list of a user's notifications.
///
/// `is_read` only ever goes from false to true; removing a record is the
/// only way to clear it. Every state transition, including the bulk
/// "mark all read", advances [`Self::revision`] exactly once.
#[derive(Debug, Default)]
pub struct NotificationAggregator {
    recipient: Option<UserId>,
    items: Vec<NotificationEvent>,
    ids: HashSet<NotificationId>,
    state: SyncState,
    fetching: bool,
    revision: u64,
}

impl NotificationAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, recipient: UserId) -> Vec<Command> {
        if self.recipient != Some(recipient) {
            *self = Self {
                recipient: Some(recipient),
                ..Self::default()
            };
        }
        let mut commands = vec![Command::Subscribe(Channel::Notifications(recipient))];
        commands.extend(self.begin_fetch());
        commands
    }

    pub fn detach(&mut self) -> Vec<Command> {
        let commands = self
            .recipient
            .map(|recipient| vec![Command::Unsubscribe(Channel::Notifications(recipient))])
            .unwrap_or_default();
        *self = Self::default();
        commands
    }

    fn begin_fetch(&mut self) -> Option<Command> {
        let recipient = self.recipient?;
        if self.fetching {
            return None;
        }
        self.fetching = true;
        Some(Command::FetchNotifications(recipient))
    }

    /// Merges a snapshot. Records already known keep a local read flag;
    /// records only known locally are kept.
    pub fn apply_snapshot(&mut self, snapshot: Vec<NotificationEvent>) {
        self.fetching = false;
        let count = snapshot.len();
        for incoming in snapshot {
            if let Some(existing) = self.find_mut(&incoming.id) {
                existing.is_read |= incoming.is_read;
            } else {
                self.insert(incoming);
            }
        }
        self.state = SyncState::Synced;
        self.bump();
        info!(notifications = count, unread = self.unread_count(), "notifications loaded");
    }

    pub fn snapshot_failed(&mut self) {
        self.fetching = false;
    }

    /// Idempotent insert of a pushed notification. Returns `true` when the
    /// list changed.
    pub fn on_notification(&mut self, event: NotificationEvent) -> bool {
        if self.recipient.is_some_and(|recipient| recipient != event.recipient_id) {
            debug!(id = %event.id, "notification for another recipient ignored");
            return false;
        }
        if let Some(existing) = self.find_mut(&event.id) {
            counter!("jobchat_duplicate_events_total", "event" => "newNotification").increment(1);
            debug!(id = %event.id, "duplicate notification absorbed");
            if event.is_read && !existing.is_read {
                existing.is_read = true;
                self.bump();
                return true;
            }
            return false;
        }
        self.insert(event);
        self.bump();
        true
    }

    pub fn mark_read(&mut self, id: &NotificationId) -> bool {
        match self.find_mut(id) {
            Some(item) if !item.is_read => {
                item.is_read = true;
                self.bump();
                true
            }
            _ => false,
        }
    }

    /// One bulk transition, then the server-side REST call and push action.
    pub fn mark_all_read(&mut self) -> Vec<Command> {
        let Some(recipient) = self.recipient else {
            return Vec::new();
        };
        let mut flipped = 0usize;
        for item in self.items.iter_mut().filter(|item| !item.is_read) {
            item.is_read = true;
            flipped += 1;
        }
        if flipped == 0 {
            return Vec::new();
        }
        self.bump();
        debug!(flipped, "marked all notifications read");
        vec![
            Command::MarkAllNotificationsRead(recipient),
            Command::Emit(ClientEvent::NotificationReadAll(MarkAllReadRequest {
                user_id: recipient,
            })),
        ]
    }

    pub fn remove(&mut self, id: &NotificationId) -> Option<NotificationEvent> {
        if !self.ids.remove(id) {
            return None;
        }
        let index = self.items.iter().position(|item| item.id == *id)?;
        self.bump();
        Some(self.items.remove(index))
    }

    /// The push channel came back; trust nothing until refetched.
    pub fn on_reconnect(&mut self) -> Vec<Command> {
        if self.state == SyncState::Synced {
            self.state = SyncState::Stale;
        }
        self.begin_fetch().into_iter().collect()
    }

    fn insert(&mut self, event: NotificationEvent) {
        self.ids.insert(event.id);
        let index = self
            .items
            .partition_point(|existing| existing.created_at > event.created_at);
        self.items.insert(index, event);
    }

    fn find_mut(&mut self, id: &NotificationId) -> Option<&mut NotificationEvent> {
        if !self.ids.contains(id) {
            return None;
        }
        self.items.iter_mut().find(|item| item.id == *id)
    }

    const fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    #[must_use]
    pub fn items(&self) -> &[NotificationEvent] {
        &self.items
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_read).count()
    }

    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub const fn recipient(&self) -> Option<UserId> {
        self.recipient
    }
}
