//! In-memory vote state of one poll.
//!
//! This is the state machine the controller task drives. It is plain
//! synchronous code: the caller guarantees one mutation at a time.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    domain::{ChoiceId, UserId},
    errors::PollError,
    poll::model::{Choice, Poll, Vote},
};

/// Immutable view of a poll at one instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollSnapshot {
    pub poll: Arc<Poll>,
    /// Vote count per choice, index-aligned with `poll.choices`.
    pub counts: Vec<u64>,
}

#[derive(Debug)]
pub struct PollState {
    poll: Arc<Poll>,
    held: HashMap<UserId, BTreeSet<ChoiceId>>,
    counts: HashMap<ChoiceId, u64>,
}

impl PollState {
    /// Build state from stored rows. Votes for unknown choices and repeated
    /// rows are dropped.
    pub fn new(poll: Poll, votes: impl IntoIterator<Item = Vote>) -> Self {
        let mut state = Self {
            poll: Arc::new(poll),
            held: HashMap::new(),
            counts: HashMap::new(),
        };
        for v in votes {
            if v.poll_id != state.poll.id || state.poll.choice(v.choice_id).is_none() {
                tracing::warn!(poll_id = %state.poll.id, choice = v.choice_id.0, "dropping orphan vote");
                continue;
            }
            state.insert(v.voter_id, v.choice_id);
        }
        state
    }

    pub fn poll(&self) -> &Arc<Poll> {
        &self.poll
    }

    pub fn is_ended(&self) -> bool {
        self.poll.is_ended()
    }

    fn choice(&self, emoji: &str) -> Result<&Choice, PollError> {
        self.poll
            .choice_by_emoji(emoji)
            .ok_or_else(|| PollError::ChoiceNotFound(emoji.to_string()))
    }

    pub fn holds(&self, voter: UserId, emoji: &str) -> Result<bool, PollError> {
        let choice_id = self.choice(emoji)?.id;
        Ok(self
            .held
            .get(&voter)
            .is_some_and(|set| set.contains(&choice_id)))
    }

    pub fn votes_of(&self, voter: UserId) -> Vec<ChoiceId> {
        self.held
            .get(&voter)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn record_vote(
        &mut self,
        voter: UserId,
        emoji: &str,
        now: DateTime<Utc>,
    ) -> Result<Vote, PollError> {
        let choice_id = self.choice(emoji)?.id;
        if self.is_ended() {
            return Err(PollError::PollEnded);
        }

        let held = self.held.get(&voter);
        if held.is_some_and(|s| s.contains(&choice_id)) {
            return Err(PollError::DuplicateVote);
        }
        if let Some(limit) = self.poll.limit {
            let current = held.map(|s| s.len()).unwrap_or(0);
            if current >= limit as usize {
                return Err(PollError::LimitExceeded(limit));
            }
        }

        self.insert(voter, choice_id);
        Ok(Vote {
            poll_id: self.poll.id,
            choice_id,
            voter_id: voter,
            created_at: now,
        })
    }

    /// Returns the removed choice, or `None` when there was nothing to remove.
    pub fn retract_vote(
        &mut self,
        voter: UserId,
        emoji: &str,
    ) -> Result<Option<ChoiceId>, PollError> {
        let choice_id = self.choice(emoji)?.id;
        if self.is_ended() {
            return Ok(None);
        }

        let Some(set) = self.held.get_mut(&voter) else {
            return Ok(None);
        };
        if !set.remove(&choice_id) {
            return Ok(None);
        }
        if set.is_empty() {
            self.held.remove(&voter);
        }
        if let Some(c) = self.counts.get_mut(&choice_id) {
            *c = c.saturating_sub(1);
        }
        Ok(Some(choice_id))
    }

    pub fn end(&mut self, at: DateTime<Utc>) -> Result<Arc<Poll>, PollError> {
        if self.is_ended() {
            return Err(PollError::AlreadyEnded);
        }
        let mut poll = (*self.poll).clone();
        poll.ended_at = Some(at);
        self.poll = Arc::new(poll);
        Ok(self.poll.clone())
    }

    /// Undo an `end` whose durable write failed.
    pub(crate) fn reopen(&mut self) {
        if !self.is_ended() {
            return;
        }
        let mut poll = (*self.poll).clone();
        poll.ended_at = None;
        self.poll = Arc::new(poll);
    }

    pub fn snapshot(&self) -> PollSnapshot {
        let counts = self
            .poll
            .choices
            .iter()
            .map(|c| self.counts.get(&c.id).copied().unwrap_or(0))
            .collect();
        PollSnapshot {
            poll: self.poll.clone(),
            counts,
        }
    }

    fn insert(&mut self, voter: UserId, choice_id: ChoiceId) {
        if self.held.entry(voter).or_default().insert(choice_id) {
            *self.counts.entry(choice_id).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId, MessageRef, PollId};

    pub(crate) fn sample_poll(limit: Option<u32>, hidden: bool) -> Poll {
        let choices = ["🅰", "🅱", "🅾"]
            .iter()
            .enumerate()
            .map(|(i, e)| Choice {
                id: ChoiceId(i as i64 + 1),
                emoji: e.to_string(),
                value: format!("choice {i}"),
                position: i as u32,
            })
            .collect();
        Poll {
            id: PollId(7),
            message: MessageRef {
                chat_id: ChatId(100),
                message_id: MessageId(200),
            },
            owner_id: UserId(1),
            title: "Best letter".to_string(),
            choices,
            limit,
            hidden,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    #[test]
    fn duplicate_votes_are_soft_and_counted_once() {
        let mut s = PollState::new(sample_poll(None, false), []);
        s.record_vote(UserId(5), "🅰", Utc::now()).unwrap();
        for _ in 0..3 {
            assert_eq!(
                s.record_vote(UserId(5), "🅰", Utc::now()),
                Err(PollError::DuplicateVote)
            );
        }
        assert_eq!(s.snapshot().counts, vec![1, 0, 0]);
    }

    #[test]
    fn limit_blocks_new_choices_but_not_after_retracting() {
        let mut s = PollState::new(sample_poll(Some(1), false), []);
        s.record_vote(UserId(5), "🅰", Utc::now()).unwrap();
        assert_eq!(
            s.record_vote(UserId(5), "🅱", Utc::now()),
            Err(PollError::LimitExceeded(1))
        );
        assert_eq!(s.votes_of(UserId(5)), vec![ChoiceId(1)]);

        assert_eq!(s.retract_vote(UserId(5), "🅰"), Ok(Some(ChoiceId(1))));
        s.record_vote(UserId(5), "🅱", Utc::now()).unwrap();
        assert_eq!(s.votes_of(UserId(5)), vec![ChoiceId(2)]);
    }

    #[test]
    fn unknown_emoji_is_reported_before_anything_else() {
        let mut s = PollState::new(sample_poll(None, false), []);
        s.end(Utc::now()).unwrap();
        assert_eq!(
            s.record_vote(UserId(5), "🍕", Utc::now()),
            Err(PollError::ChoiceNotFound("🍕".to_string()))
        );
        assert_eq!(
            s.retract_vote(UserId(5), "🍕"),
            Err(PollError::ChoiceNotFound("🍕".to_string()))
        );
    }

    #[test]
    fn ended_poll_freezes_votes() {
        let mut s = PollState::new(sample_poll(None, false), []);
        s.record_vote(UserId(5), "🅰", Utc::now()).unwrap();
        s.end(Utc::now()).unwrap();

        assert_eq!(
            s.record_vote(UserId(6), "🅱", Utc::now()),
            Err(PollError::PollEnded)
        );
        assert_eq!(s.retract_vote(UserId(5), "🅰"), Ok(None));
        assert_eq!(s.snapshot().counts, vec![1, 0, 0]);
        assert_eq!(s.end(Utc::now()), Err(PollError::AlreadyEnded));
    }

    #[test]
    fn retract_then_record_nets_one_and_reverse_nets_zero() {
        let mut s = PollState::new(sample_poll(None, false), []);
        assert_eq!(s.retract_vote(UserId(5), "🅰"), Ok(None));
        s.record_vote(UserId(5), "🅰", Utc::now()).unwrap();
        assert_eq!(s.snapshot().counts[0], 1);

        s.record_vote(UserId(6), "🅱", Utc::now()).unwrap();
        s.retract_vote(UserId(6), "🅱").unwrap();
        assert_eq!(s.snapshot().counts[1], 0);
        assert!(s.votes_of(UserId(6)).is_empty());
    }

    #[test]
    fn loading_drops_orphans_and_duplicates() {
        let poll = sample_poll(None, false);
        let vote = |voter: i64, choice: i64| Vote {
            poll_id: PollId(7),
            choice_id: ChoiceId(choice),
            voter_id: UserId(voter),
            created_at: Utc::now(),
        };
        let s = PollState::new(poll, vec![vote(1, 1), vote(1, 1), vote(2, 3), vote(3, 99)]);
        assert_eq!(s.snapshot().counts, vec![1, 0, 1]);
    }

    #[test]
    fn reopen_only_undoes_an_end() {
        let mut s = PollState::new(sample_poll(None, false), []);
        s.reopen();
        assert!(!s.is_ended());
        s.end(Utc::now()).unwrap();
        s.reopen();
        assert!(!s.is_ended());
        assert!(s.record_vote(UserId(1), "🅾", Utc::now()).is_ok());
    }
}
