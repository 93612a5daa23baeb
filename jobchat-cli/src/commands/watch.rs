use anyhow::{Context, Result};
use clap::Args;
use engine::{LoadTarget, SessionCommand, SessionUpdate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::SessionContext;

#[derive(Args, Debug)]
#[command(about = "Follow conversations and notifications live")]
pub struct WatchArgs {
    /// Signed-in user
    #[arg(long)]
    pub user: Uuid,

    /// Conversation to open; lines typed on stdin are sent to it
    #[arg(long, alias = "conv")]
    pub conversation: Option<Uuid>,
}

pub async fn watch(context: SessionContext, args: WatchArgs) -> Result<()> {
    let (mut session, mut updates) = context.session()?;
    session
        .connect(context.identity(args.user))
        .await
        .context("failed to connect to the event stream")?;

    let (commands, receiver) = mpsc::channel(32);
    if let Some(conversation_id) = args.conversation {
        commands
            .send(SessionCommand::SelectConversation(conversation_id))
            .await
            .context("session stopped before the conversation was opened")?;
        println!(
            "Watching conversation {conversation_id} as {}. Type a line to send it, Ctrl+C to stop.",
            args.user
        );
    } else {
        println!("Watching as {}. Press Ctrl+C to stop.", args.user);
    }

    let cancel = CancellationToken::new();
    let driver = tokio::spawn(session.run(receiver, cancel.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = args.conversation.is_some();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Some(update) => render_update(&update),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line.context("failed to read stdin")? {
                Some(text) if !text.trim().is_empty() => {
                    if let Some(conversation_id) = args.conversation {
                        let command = SessionCommand::SendMessage { conversation_id, content: text };
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                }
                Some(_) => {}
                None => stdin_open = false,
            },
        }
    }

    let _ = commands.send(SessionCommand::Shutdown).await;
    cancel.cancel();
    driver.await.context("session task failed")?;
    Ok(())
}

fn render_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::UnreadTotal(total) => println!("[unread] {total} unread message(s)"),
        SessionUpdate::ConversationChanged(id) => println!("[conversation] {id} updated"),
        SessionUpdate::Viewport {
            conversation_id,
            frame,
        } => {
            tracing::debug!(
                conversation = %conversation_id,
                start = frame.range.start,
                end = frame.range.end,
                "viewport"
            );
        }
        SessionUpdate::MessageDelivered { message_id, .. } => {
            println!("[sent] delivered as {message_id}");
        }
        SessionUpdate::SendFailed {
            conversation_id,
            error,
        } => eprintln!("[sent] failed in {conversation_id}: {error}"),
        SessionUpdate::ConversationCreated(id) => println!("[conversation] {id} created"),
        SessionUpdate::ActionFailed { event, error } => eprintln!("[action] {event} failed: {error}"),
        SessionUpdate::NotificationsChanged { unread, .. } => {
            println!("[notifications] {unread} unread");
        }
        SessionUpdate::LoadFailed { target, error } => {
            let what = match target {
                LoadTarget::Conversations => "conversation list".to_string(),
                LoadTarget::Messages(id) => format!("history of {id}"),
                LoadTarget::Notifications => "notifications".to_string(),
                LoadTarget::MarkAllNotificationsRead => "mark-all-read".to_string(),
                LoadTarget::CreateConversation => "conversation creation".to_string(),
            };
            eprintln!("[load] {what} failed: {error}");
        }
        SessionUpdate::Reconnecting => eprintln!("[stream] connection lost, reconnecting"),
        SessionUpdate::Reconnected => println!("[stream] reconnected"),
    }
}
