use std::sync::Arc;

use teloxide::prelude::*;

use mm_core::{
    domain::{ChatId, UserId},
    errors::{Error, PollError},
    messaging::port::MessagingPort,
    poll::command::{self, PollCommand},
    render::{escape_html, help_html},
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// What the user gets to see when a command fails.
fn user_message(err: &Error) -> String {
    match err {
        Error::InvalidPoll(m) => format!(
            "⚠️ {}\nSee <code>/poll help</code> for the syntax.",
            escape_html(m)
        ),
        Error::Poll(PollError::Persistence(_)) => {
            "⚠️ Could not reach the poll storage. Please try again.".to_string()
        }
        Error::Poll(PollError::NotFound) => "⚠️ No poll with that id.".to_string(),
        Error::Poll(PollError::ShuttingDown) => {
            "⚠️ The bot is restarting. Please try again in a moment.".to_string()
        }
        Error::Poll(p) => format!("⚠️ {}", escape_html(&p.to_string())),
        _ => "⚠️ Something went wrong. Please try again.".to_string(),
    }
}

async fn reply(messenger: &Arc<dyn MessagingPort>, chat_id: ChatId, html: &str) {
    if let Err(e) = messenger.send_html(chat_id, html).await {
        tracing::warn!(chat = chat_id.0, error = %e, "reply failed");
    }
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let messenger = &state.messenger;

    let (cmd, arg) = parse_command(text);

    match cmd.as_str() {
        "start" | "help" => {
            reply(messenger, chat_id, &help_html()).await;
        }
        "poll" => {
            let parsed = match command::parse(&arg) {
                Ok(c) => c,
                Err(e) => {
                    reply(messenger, chat_id, &user_message(&e)).await;
                    return Ok(());
                }
            };
            tracing::debug!(chat = chat_id.0, user = user_id.0, command = ?parsed, "poll command");

            match parsed {
                PollCommand::Help => reply(messenger, chat_id, &help_html()).await,
                PollCommand::Create(req) => {
                    if let Err(e) = state.polls.create_poll(chat_id, user_id, req).await {
                        reply(messenger, chat_id, &user_message(&e)).await;
                    }
                }
                PollCommand::End(id) => match state.polls.end_poll(id, user_id).await {
                    Ok(poll) => {
                        let html = format!(
                            "🔒 Poll <b>{}</b> has ended. See the outcome with <code>/poll result {}</code>.",
                            escape_html(&poll.title),
                            poll.id
                        );
                        reply(messenger, chat_id, &html).await;
                    }
                    Err(e) => reply(messenger, chat_id, &user_message(&e)).await,
                },
                PollCommand::Result(id) => match state.polls.result(id).await {
                    Ok(result) => reply(messenger, chat_id, &result.to_html()).await,
                    Err(e) => reply(messenger, chat_id, &user_message(&e)).await,
                },
            }
        }
        _ => {}
    }

    Ok(())
}
