use std::sync::Arc;

use teloxide::prelude::*;

use mm_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::PollError,
    messaging::port::MessagingPort,
    poll::{ReactionEvent, ReactionKind, VoteOutcome},
    render::VOTE_CALLBACK_PREFIX,
};

use crate::router::AppState;

/// Text of the popup shown to the voter after a button press.
fn answer_text(emoji: &str, res: &Result<VoteOutcome, PollError>) -> Option<String> {
    match res {
        Ok(VoteOutcome::Recorded) => Some(format!("Voted {emoji}")),
        Ok(VoteOutcome::Retracted) => Some(format!("Vote {emoji} removed")),
        Ok(VoteOutcome::Unchanged) => None,
        Ok(VoteOutcome::Ignored) => Some("This poll is no longer active.".to_string()),
        Err(PollError::Persistence(_)) => {
            Some("Could not save your vote. Please try again.".to_string())
        }
        Err(PollError::ShuttingDown) => {
            Some("The bot is restarting. Please vote again in a moment.".to_string())
        }
        Err(e) => Some(e.to_string()),
    }
}

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();

    let (Some(message), Some(emoji)) = (q.message.as_ref(), data.strip_prefix(VOTE_CALLBACK_PREFIX))
    else {
        // Always answer callback query eventually.
        let _ = state.messenger.answer_callback_query(&cb_id, None).await;
        return Ok(());
    };

    let ev = ReactionEvent {
        message: MessageRef {
            chat_id: ChatId(message.chat.id.0),
            message_id: MessageId(message.id.0),
        },
        emoji: emoji.to_string(),
        user_id: UserId(q.from.id.0 as i64),
        kind: ReactionKind::Toggle,
    };

    let res = state.polls.dispatch(ev).await;
    if let Err(e) = &res {
        if !e.is_rejection() {
            tracing::warn!(message = message.id.0, error = %e, "vote failed");
        }
    }

    let text = answer_text(emoji, &res);
    if let Err(e) = state
        .messenger
        .answer_callback_query(&cb_id, text.as_deref())
        .await
    {
        tracing::warn!(error = %e, "callback answer failed");
    }
    Ok(())
}
