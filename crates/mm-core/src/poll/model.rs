use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChoiceId, MessageRef, PollId, UserId},
    Error, Result,
};

/// Upper bound on choices per poll (one regional-indicator letter per slot, A..T).
pub const MAX_CHOICES: usize = 20;

/// Telegram caps callback data at 64 bytes and the button payload is `vote:<emoji>`.
pub const MAX_EMOJI_BYTES: usize = 48;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub emoji: String,
    pub value: String,
    pub position: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    /// The message voters react to. Its chat is the poll's channel.
    pub message: MessageRef,
    pub owner_id: UserId,
    pub title: String,
    /// Sorted by `position`.
    pub choices: Vec<Choice>,
    pub limit: Option<u32>,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Poll {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn choice_by_emoji(&self, emoji: &str) -> Option<&Choice> {
        let wanted = normalize_emoji(emoji);
        self.choices
            .iter()
            .find(|c| normalize_emoji(&c.emoji) == wanted)
    }

    pub fn choice(&self, id: ChoiceId) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub poll_id: PollId,
    pub choice_id: ChoiceId,
    pub voter_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewChoice {
    pub emoji: String,
    pub value: String,
}

impl NewChoice {
    pub fn new(emoji: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            emoji: emoji.into(),
            value: value.into(),
        }
    }
}

/// Everything a store needs to create a poll row and its choices in one go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPoll {
    pub title: String,
    pub choices: Vec<NewChoice>,
    pub limit: Option<u32>,
    pub hidden: bool,
    pub owner_id: UserId,
    pub message: MessageRef,
}

impl NewPoll {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidPoll("the title is empty".to_string()));
        }
        if self.choices.is_empty() {
            return Err(Error::InvalidPoll("a poll needs at least one choice".to_string()));
        }
        if self.choices.len() > MAX_CHOICES {
            return Err(Error::InvalidPoll(format!(
                "at most {MAX_CHOICES} choices are allowed"
            )));
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidPoll("the vote limit must be at least 1".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for c in &self.choices {
            if c.emoji.trim().is_empty() {
                return Err(Error::InvalidPoll("a choice has no emoji".to_string()));
            }
            if c.emoji.len() > MAX_EMOJI_BYTES {
                return Err(Error::InvalidPoll(format!("{} is too long", c.emoji)));
            }
            if !seen.insert(normalize_emoji(&c.emoji)) {
                return Err(Error::InvalidPoll(format!("{} is used twice", c.emoji)));
            }
        }
        Ok(())
    }
}

/// Emoji compare equal with or without the U+FE0F presentation selector.
pub fn normalize_emoji(emoji: &str) -> String {
    emoji.trim().chars().filter(|c| *c != '\u{FE0F}').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId};

    fn new_poll(choices: Vec<NewChoice>) -> NewPoll {
        NewPoll {
            title: "Lunch".to_string(),
            choices,
            limit: None,
            hidden: false,
            owner_id: UserId(1),
            message: MessageRef {
                chat_id: ChatId(10),
                message_id: MessageId(20),
            },
        }
    }

    #[test]
    fn rejects_duplicate_emoji_even_with_variation_selector() {
        let p = new_poll(vec![
            NewChoice::new("\u{2764}\u{FE0F}", "love"),
            NewChoice::new("\u{2764}", "also love"),
        ]);
        let err = p.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidPoll(_)));
    }

    #[test]
    fn rejects_zero_limit_and_empty_title() {
        let mut p = new_poll(vec![NewChoice::new("🍣", "sushi")]);
        p.limit = Some(0);
        assert!(p.validate().is_err());

        let mut p = new_poll(vec![NewChoice::new("🍣", "sushi")]);
        p.title = "   ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_too_many_choices() {
        let choices = (0..=MAX_CHOICES)
            .map(|i| NewChoice::new(format!("e{i}"), format!("c{i}")))
            .collect();
        assert!(new_poll(choices).validate().is_err());
    }

    #[test]
    fn accepts_a_plain_poll() {
        let p = new_poll(vec![NewChoice::new("🍣", "sushi"), NewChoice::new("🍜", "ramen")]);
        assert!(p.validate().is_ok());
    }
}
