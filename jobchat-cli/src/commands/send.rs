use anyhow::{Context, Result, bail};
use clap::Args;
use engine::{SessionCommand, SessionUpdate};
use uuid::Uuid;

use super::SessionContext;

#[derive(Args, Debug)]
#[command(about = "Send a message and wait for the server to acknowledge it")]
pub struct SendArgs {
    /// Sending user
    #[arg(long)]
    pub user: Uuid,

    /// Conversation to post into
    #[arg(long, alias = "conv")]
    pub conversation: Uuid,

    /// Message text
    #[arg()]
    pub text: String,
}

pub async fn send_message(context: SessionContext, args: SendArgs) -> Result<()> {
    if args.text.trim().is_empty() {
        bail!("message text must not be empty");
    }

    let (mut session, mut updates) = context.session()?;
    session
        .connect(context.identity(args.user))
        .await
        .context("failed to connect to the event stream")?;
    session.settle().await;

    session
        .handle(SessionCommand::SendMessage {
            conversation_id: args.conversation,
            content: args.text,
        })
        .await;
    session.settle().await;
    session.disconnect().await;

    let mut outcome = None;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::MessageDelivered { message_id, .. } => outcome = Some(Ok(message_id)),
            SessionUpdate::SendFailed { error, .. } => outcome = Some(Err(error)),
            _ => {}
        }
    }

    match outcome {
        Some(Ok(message_id)) => {
            println!(
                "Message delivered: message={message_id} conversation={}",
                args.conversation
            );
            Ok(())
        }
        Some(Err(error)) => Err(error).context("message was not delivered"),
        None => bail!("message was not acknowledged"),
    }
}
