use anyhow::{Context, Result};
use clap::Args;
use engine::{Command, NotificationAggregator, SnapshotApi};
use shared::models::{NotificationEvent, NotificationPayload};
use tracing::debug;
use uuid::Uuid;

use super::{SessionContext, build_client};

#[derive(Args, Debug)]
#[command(about = "List notifications, optionally marking them all read")]
pub struct NotificationsArgs {
    /// Recipient of the notifications
    #[arg(long)]
    pub user: Uuid,

    /// Mark every notification read after listing
    #[arg(long)]
    pub mark_all_read: bool,

    /// Only show unread notifications
    #[arg(long)]
    pub unread: bool,
}

pub async fn list_notifications(context: SessionContext, args: NotificationsArgs) -> Result<()> {
    let api = context.snapshot_api(build_client()?);
    let mut aggregator = NotificationAggregator::new();
    let commands = aggregator.attach(args.user);
    run_rest_commands(&api, &mut aggregator, commands).await?;

    let mut shown = 0usize;
    for item in aggregator
        .items()
        .iter()
        .filter(|item| !args.unread || !item.is_read)
    {
        println!("{}", render_row(item));
        shown += 1;
    }
    if shown == 0 {
        println!("No notifications.");
    }

    if args.mark_all_read {
        let before = aggregator.unread_count();
        let commands = aggregator.mark_all_read();
        run_rest_commands(&api, &mut aggregator, commands).await?;
        println!("Marked {before} notification(s) read.");
    } else {
        println!("{} unread", aggregator.unread_count());
    }
    Ok(())
}

/// Performs the REST side of the aggregator's commands. A one-shot command
/// has no push channel, so subscriptions and push actions are skipped.
async fn run_rest_commands(
    api: &dyn SnapshotApi,
    aggregator: &mut NotificationAggregator,
    commands: Vec<Command>,
) -> Result<()> {
    for command in commands {
        match command {
            Command::FetchNotifications(user_id) => {
                let snapshot = api
                    .fetch_notifications(user_id)
                    .await
                    .context("failed to load notifications")?;
                aggregator.apply_snapshot(snapshot);
            }
            Command::MarkAllNotificationsRead(user_id) => api
                .mark_all_notifications_read(user_id)
                .await
                .context("failed to mark notifications read")?,
            other => debug!(command = ?other, "skipped without a push channel"),
        }
    }
    Ok(())
}

fn render_row(item: &NotificationEvent) -> String {
    let marker = if item.is_read { " " } else { "*" };
    let detail = match &item.payload {
        NotificationPayload::Message {
            conversation_id, ..
        } => format!("new message in {conversation_id}"),
        NotificationPayload::JobApplication { job_id, .. } => {
            format!("new application for job {job_id}")
        }
        NotificationPayload::ApplicationStatus { job_id, status } => {
            format!("application for job {job_id} is now {status}")
        }
        NotificationPayload::System { text } => text.clone(),
        NotificationPayload::Other => item.payload.kind().to_string(),
    };
    format!("{marker} {} {detail}", item.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine::FetchError;
    use shared::models::{Conversation, ConversationId, Message, Timestamp, UserId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        inbox: Vec<NotificationEvent>,
        read_all: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl SnapshotApi for RecordingApi {
        async fn fetch_conversations(&self, _: UserId) -> Result<Vec<Conversation>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_messages(&self, _: ConversationId) -> Result<Vec<Message>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_notifications(
            &self,
            _: UserId,
        ) -> Result<Vec<NotificationEvent>, FetchError> {
            Ok(self.inbox.clone())
        }

        async fn mark_all_notifications_read(&self, user_id: UserId) -> Result<(), FetchError> {
            self.read_all.lock().unwrap().push(user_id);
            Ok(())
        }

        async fn create_conversation(&self, _: Vec<UserId>) -> Result<Conversation, FetchError> {
            Err(FetchError::status(501, "not used"))
        }
    }

    fn unread_system(recipient: UserId) -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            recipient_id: recipient,
            payload: NotificationPayload::System {
                text: "profile viewed".to_string(),
            },
            is_read: false,
            created_at: Timestamp::from_millis(0),
        }
    }

    #[tokio::test]
    async fn mark_all_read_goes_through_the_aggregator() {
        let user = Uuid::new_v4();
        let api = RecordingApi {
            inbox: vec![unread_system(user), unread_system(user)],
            ..RecordingApi::default()
        };
        let mut aggregator = NotificationAggregator::new();

        let commands = aggregator.attach(user);
        run_rest_commands(&api, &mut aggregator, commands)
            .await
            .unwrap();
        assert_eq!(aggregator.unread_count(), 2);
        let revision = aggregator.revision();

        let commands = aggregator.mark_all_read();
        run_rest_commands(&api, &mut aggregator, commands)
            .await
            .unwrap();
        assert_eq!(aggregator.unread_count(), 0);
        assert_eq!(aggregator.revision(), revision + 1);
        assert_eq!(*api.read_all.lock().unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn nothing_unread_skips_the_bulk_call() {
        let user = Uuid::new_v4();
        let api = RecordingApi::default();
        let mut aggregator = NotificationAggregator::new();
        let commands = aggregator.attach(user);
        run_rest_commands(&api, &mut aggregator, commands)
            .await
            .unwrap();

        let commands = aggregator.mark_all_read();
        run_rest_commands(&api, &mut aggregator, commands)
            .await
            .unwrap();
        assert!(api.read_all.lock().unwrap().is_empty());
    }

    #[test]
    fn unread_rows_are_starred() {
        let item = NotificationEvent {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            payload: NotificationPayload::ApplicationStatus {
                job_id: Uuid::nil(),
                status: "shortlisted".to_string(),
            },
            is_read: false,
            created_at: Timestamp::from_millis(0),
        };
        let row = render_row(&item);
        assert!(row.starts_with("* 1970-01-01 00:00:00"));
        assert!(row.ends_with("is now shortlisted"));
    }
}
