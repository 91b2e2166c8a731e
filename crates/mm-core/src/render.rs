//! Telegram-HTML rendering of polls, results and help.
//!
//! Telegram HTML supports only a small subset: `<b>`, `<i>`, `<code>`, `<pre>`, `<a href="...">`.

use crate::{
    messaging::types::{InlineButton, InlineKeyboard},
    poll::{
        model::{Choice, Poll},
        state::PollSnapshot,
        tally::Tally,
    },
};

/// Prefix of the callback data carried by choice buttons.
pub const VOTE_CALLBACK_PREFIX: &str = "vote:";

const BUTTONS_PER_ROW: usize = 5;
const BAR_CELL: &str = "\u{2B1C}";

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn choice_label(choice: &Choice) -> String {
    if choice.emoji == choice.value {
        escape_html(&choice.emoji)
    } else {
        format!("{} {}", escape_html(&choice.emoji), escape_html(&choice.value))
    }
}

/// The live poll message.
///
/// Counts are shown per choice unless the poll is hidden, in which case only
/// the number of votes cast is shown.
pub fn poll_message_html(snapshot: &PollSnapshot) -> String {
    let poll = &snapshot.poll;
    let mut out = format!("📊 <b>{}</b>\n", escape_html(&poll.title));
    if let Some(limit) = poll.limit {
        out.push_str(&format!("<i>You can vote for up to {limit} choice(s).</i>\n"));
    }
    out.push('\n');

    for (choice, count) in poll.choices.iter().zip(snapshot.counts.iter()) {
        if poll.hidden {
            out.push_str(&format!("{}\n", choice_label(choice)));
        } else {
            out.push_str(&format!("{}  <b>{count}</b>\n", choice_label(choice)));
        }
    }
    if poll.hidden {
        let total: u64 = snapshot.counts.iter().sum();
        out.push_str(&format!("\nVotes cast: <b>{total}</b>\n"));
    }

    out.push_str(&format!(
        "\nPoll ID: <code>{id}</code>\nResult: <code>/poll result {id}</code>\nEnd: <code>/poll end {id}</code>\n",
        id = poll.id
    ));

    if poll.is_ended() {
        out.push_str("\n🔒 <i>This poll has ended. Further votes are ignored.</i>");
    } else if poll.hidden {
        out.push_str("\n<i>Press a button to vote. This is an anonymous poll: individual votes are not shown.</i>");
    } else {
        out.push_str("\n<i>Press a button to vote, press it again to take the vote back.</i>");
    }
    out
}

/// One button per choice; none once the poll has ended.
pub fn poll_keyboard(poll: &Poll) -> InlineKeyboard {
    if poll.is_ended() {
        return InlineKeyboard { rows: Vec::new() };
    }
    let buttons = poll
        .choices
        .iter()
        .map(|c| InlineButton {
            label: c.emoji.clone(),
            callback_data: format!("{VOTE_CALLBACK_PREFIX}{}", c.emoji),
        })
        .collect();
    InlineKeyboard::grid(buttons, BUTTONS_PER_ROW)
}

/// Placeholder shown while the poll row is being created.
pub fn pending_poll_html() -> String {
    "📊 <i>Creating poll, please wait…</i>".to_string()
}

pub fn result_html(poll: &Poll, tally: &Tally) -> String {
    let mut out = format!("📊 <b>{}</b>", escape_html(&poll.title));
    if poll.is_ended() {
        out.push_str(" <i>(ended)</i>");
    }
    out.push_str("\n\n");

    for row in &tally.rows {
        out.push_str(&format!(
            "{} {}  ({} votes)\n",
            escape_html(&row.choice.emoji),
            escape_html(&row.choice.value),
            row.count
        ));
        out.push_str(&format!("{}  {}%\n\n", BAR_CELL.repeat(row.weight()), row.percent));
    }

    if !poll.is_ended() {
        out.push_str(&format!(
            "<i>End the poll with</i> <code>/poll end {}</code>",
            poll.id
        ));
    }
    out.trim_end().to_string()
}

pub fn help_html() -> String {
    let mut out = String::new();
    out.push_str("📊 <b>Polls</b>\n\n");
    out.push_str("<b>Create</b>\n");
    out.push_str("<code>/poll [hidden] &lt;title&gt; [[emoji] choice ...]</code>\n");
    out.push_str("• Alternate emoji and choice to pick each choice's emoji.\n");
    out.push_str("• Choices without emoji get the letters 🇦 to 🇹.\n");
    out.push_str("• Emoji only: each emoji is its own choice.\n");
    out.push_str("• Title only: a ⭕ / ❌ poll.\n");
    out.push_str("• <code>hidden</code> keeps individual votes out of sight.\n");
    out.push_str("• Up to 20 choices.\n\n");
    out.push_str("<b>Limit votes per person</b>\n");
    out.push_str("<code>/poll limited &lt;N&gt; [hidden] &lt;title&gt; [[emoji] choice ...]</code>\n\n");
    out.push_str("<b>End</b>\n");
    out.push_str("<code>/poll end &lt;id&gt;</code> stops the poll. Later votes are ignored.\n\n");
    out.push_str("<b>Result</b>\n");
    out.push_str("<code>/poll result &lt;id&gt;</code> counts the votes. An ended poll only counts votes cast before it ended.\n\n");
    out.push_str("<b>Examples</b>\n");
    out.push_str("<code>/poll Favourite fruit apple orange strawberry</code>\n");
    out.push_str("<code>/poll hidden Best captain 🐱 Cat 🐶 Dog</code>\n");
    out.push_str("<code>/poll limited 1 Who wins? Eagles Lions Bears</code>");
    out
}
