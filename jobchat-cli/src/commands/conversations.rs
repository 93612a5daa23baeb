use anyhow::{Context, Result};
use clap::Args;
use engine::SnapshotApi;
use engine::directory::ConversationDirectory;
use shared::models::Conversation;
use uuid::Uuid;

use super::{SessionContext, build_client};

#[derive(Args, Debug)]
#[command(about = "List conversations with unread counts, most recent first")]
pub struct ConversationsArgs {
    /// User whose conversations are listed
    #[arg(long)]
    pub user: Uuid,
}

pub async fn list_conversations(context: SessionContext, args: ConversationsArgs) -> Result<()> {
    let api = context.snapshot_api(build_client()?);
    let snapshot = api
        .fetch_conversations(args.user)
        .await
        .context("failed to load conversations")?;

    let mut directory = ConversationDirectory::new();
    for conversation in snapshot {
        directory.upsert(conversation.into());
    }

    if directory.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for conversation in directory.reorder_by_last_message_desc() {
        println!("{}", render_row(conversation, &args.user));
    }
    println!(
        "{} conversation(s), {} unread message(s)",
        directory.len(),
        directory.unread_total_for(&args.user)
    );
    Ok(())
}

fn render_row(conversation: &Conversation, viewer: &Uuid) -> String {
    let unread = conversation.unread_for(viewer);
    let badge = if unread > 0 {
        format!("[{unread:>3}]")
    } else {
        "[   ]".to_string()
    };
    let preview = conversation.last_message.as_ref().map_or_else(
        || "(no messages)".to_string(),
        |last| format!("{} {}", last.created_at, truncate(&last.content, 60)),
    );
    format!("{badge} {} {preview}", conversation.id)
}

fn truncate(text: &str, limit: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= limit {
        return line.to_string();
    }
    let cut: String = line.chars().take(limit.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{LastMessage, Timestamp};

    #[test]
    fn rows_show_badge_and_preview() {
        let viewer = Uuid::new_v4();
        let mut conversation = Conversation::placeholder(Uuid::new_v4(), [viewer]);
        conversation.unread_counters.insert(viewer, 4);
        conversation.last_message = Some(LastMessage {
            id: Uuid::new_v4(),
            content: "Interview moved to Friday\nsee details".to_string(),
            sender_id: Uuid::new_v4(),
            created_at: Timestamp::from_millis(0),
        });

        let row = render_row(&conversation, &viewer);
        assert!(row.starts_with("[  4]"));
        assert!(row.ends_with("Interview moved to Friday"));
    }

    #[test]
    fn long_previews_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
