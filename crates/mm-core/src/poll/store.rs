//! Durable poll storage.
//!
//! The store is plain data access. Vote rules live in the controller; the
//! store only keeps rows unique.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChoiceId, MessageRef, PollId, UserId},
    errors::PollError,
    poll::model::{Choice, NewPoll, Poll, Vote},
    Error, Result,
};

/// Repository port for polls, choices and votes.
///
/// Implementations must tolerate concurrent calls for different polls. Calls
/// for the same poll are issued one at a time by that poll's controller.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, new: NewPoll) -> Result<Poll>;

    async fn load_poll(&self, message: MessageRef) -> Result<Option<Poll>>;

    async fn load_poll_by_id(&self, id: PollId) -> Result<Option<Poll>>;

    async fn load_votes(&self, poll_id: PollId) -> Result<Vec<Vote>>;

    /// Insert a vote; an existing (poll, voter, choice) row is left untouched.
    async fn upsert_vote(&self, vote: &Vote) -> Result<()>;

    async fn delete_vote(&self, poll_id: PollId, voter: UserId, choice: ChoiceId) -> Result<()>;

    /// Record the end time. A poll that already ended keeps its first timestamp.
    async fn mark_ended(&self, poll_id: PollId, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PollRecord {
    poll: Poll,
    votes: Vec<Vote>,
}

impl PollRecord {
    fn upsert_vote(&mut self, vote: &Vote) -> Result<()> {
        if self.poll.choice(vote.choice_id).is_none() {
            return Err(Error::Poll(PollError::ChoiceNotFound(format!(
                "choice #{}",
                vote.choice_id.0
            ))));
        }
        let exists = self
            .votes
            .iter()
            .any(|v| v.voter_id == vote.voter_id && v.choice_id == vote.choice_id);
        if !exists {
            self.votes.push(vote.clone());
        }
        Ok(())
    }

    fn delete_vote(&mut self, voter: UserId, choice: ChoiceId) {
        self.votes
            .retain(|v| !(v.voter_id == voter && v.choice_id == choice));
    }

    fn mark_ended(&mut self, at: DateTime<Utc>) {
        if self.poll.ended_at.is_none() {
            self.poll.ended_at = Some(at);
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    polls: BTreeMap<PollId, PollRecord>,
    by_message: HashMap<MessageRef, PollId>,
    last_poll_id: i64,
    last_choice_id: i64,
}

impl Tables {
    fn insert_record(&mut self, record: PollRecord) {
        self.last_poll_id = self.last_poll_id.max(record.poll.id.0);
        for c in &record.poll.choices {
            self.last_choice_id = self.last_choice_id.max(c.id.0);
        }
        self.by_message.insert(record.poll.message, record.poll.id);
        self.polls.insert(record.poll.id, record);
    }

    fn create(&mut self, new: NewPoll, now: DateTime<Utc>) -> Result<&PollRecord> {
        new.validate()?;
        if self.by_message.contains_key(&new.message) {
            return Err(Error::InvalidPoll(
                "that message already carries a poll".to_string(),
            ));
        }

        self.last_poll_id += 1;
        let id = PollId(self.last_poll_id);
        let mut choices = Vec::with_capacity(new.choices.len());
        for (position, c) in new.choices.into_iter().enumerate() {
            self.last_choice_id += 1;
            choices.push(Choice {
                id: ChoiceId(self.last_choice_id),
                emoji: c.emoji,
                value: c.value,
                position: position as u32,
            });
        }

        let poll = Poll {
            id,
            message: new.message,
            owner_id: new.owner_id,
            title: new.title,
            choices,
            limit: new.limit,
            hidden: new.hidden,
            created_at: now,
            ended_at: None,
        };
        self.by_message.insert(poll.message, id);
        let rec = self.polls.entry(id).or_insert(PollRecord {
            poll,
            votes: Vec::new(),
        });
        Ok(&*rec)
    }

    fn record(&self, id: PollId) -> Result<&PollRecord> {
        self.polls.get(&id).ok_or(Error::Poll(PollError::NotFound))
    }

    fn record_mut(&mut self, id: PollId) -> Result<&mut PollRecord> {
        self.polls
            .get_mut(&id)
            .ok_or(Error::Poll(PollError::NotFound))
    }

    fn poll_by_message(&self, message: MessageRef) -> Option<Poll> {
        let id = self.by_message.get(&message)?;
        self.polls.get(id).map(|r| r.poll.clone())
    }
}

/// Process-local store. Used by tests and for throwaway runs.
#[derive(Default)]
pub struct MemoryPollStore {
    tables: Mutex<Tables>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn create_poll(&self, new: NewPoll) -> Result<Poll> {
        let mut t = self.tables.lock().await;
        Ok(t.create(new, Utc::now())?.poll.clone())
    }

    async fn load_poll(&self, message: MessageRef) -> Result<Option<Poll>> {
        Ok(self.tables.lock().await.poll_by_message(message))
    }

    async fn load_poll_by_id(&self, id: PollId) -> Result<Option<Poll>> {
        Ok(self.tables.lock().await.polls.get(&id).map(|r| r.poll.clone()))
    }

    async fn load_votes(&self, poll_id: PollId) -> Result<Vec<Vote>> {
        let t = self.tables.lock().await;
        let rec = t.polls.get(&poll_id).ok_or(Error::Poll(PollError::NotFound))?;
        Ok(rec.votes.clone())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.record_mut(vote.poll_id)?.upsert_vote(vote)
    }

    async fn delete_vote(&self, poll_id: PollId, voter: UserId, choice: ChoiceId) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.record_mut(poll_id)?.delete_vote(voter, choice);
        Ok(())
    }

    async fn mark_ended(&self, poll_id: PollId, at: DateTime<Utc>) -> Result<()> {
        self.tables.lock().await.record_mut(poll_id)?.mark_ended(at);
        Ok(())
    }
}

/// One JSON document per poll (`poll-<id>.json`) under a data directory.
///
/// Every mutation rewrites the poll's document via a temp file + rename, so a
/// crash leaves either the old or the new version on disk.
pub struct JsonPollStore {
    dir: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonPollStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut tables = Tables::default();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(ent) = entries.next_entry().await? {
            let name = ent.file_name().to_string_lossy().to_string();
            if !name.starts_with("poll-") || !name.ends_with(".json") {
                continue;
            }
            let txt = tokio::fs::read_to_string(ent.path()).await?;
            match serde_json::from_str::<PollRecord>(&txt) {
                Ok(record) => tables.insert_record(record),
                Err(e) => tracing::error!(file = %name, error = %e, "skipping unreadable poll file"),
            }
        }

        tracing::info!(dir = %dir.display(), polls = tables.polls.len(), "poll store opened");
        Ok(Self {
            dir,
            tables: Mutex::new(tables),
        })
    }

    fn record_path(&self, id: PollId) -> PathBuf {
        self.dir.join(format!("poll-{}.json", id.0))
    }

    async fn persist(&self, record: &PollRecord) -> Result<()> {
        let path = self.record_path(record.poll.id);
        let tmp = path.with_extension("json.tmp");
        let txt = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the record and publish it only once it is
    /// on disk, so a failed write leaves memory as it was.
    async fn update<F>(&self, poll_id: PollId, change: F) -> Result<()>
    where
        F: FnOnce(&mut PollRecord) -> Result<()> + Send,
    {
        let mut record = self.tables.lock().await.record(poll_id)?.clone();
        change(&mut record)?;
        self.persist(&record).await?;
        self.tables.lock().await.polls.insert(poll_id, record);
        Ok(())
    }
}

#[async_trait]
impl PollStore for JsonPollStore {
    async fn create_poll(&self, new: NewPoll) -> Result<Poll> {
        let record = {
            let mut t = self.tables.lock().await;
            t.create(new, Utc::now())?.clone()
        };
        let poll = record.poll.clone();
        if let Err(e) = self.persist(&record).await {
            // Keep memory and disk in agreement: forget the unsaved poll.
            let mut t = self.tables.lock().await;
            t.polls.remove(&poll.id);
            t.by_message.remove(&poll.message);
            return Err(e);
        }
        Ok(poll)
    }

    async fn load_poll(&self, message: MessageRef) -> Result<Option<Poll>> {
        Ok(self.tables.lock().await.poll_by_message(message))
    }

    async fn load_poll_by_id(&self, id: PollId) -> Result<Option<Poll>> {
        Ok(self.tables.lock().await.polls.get(&id).map(|r| r.poll.clone()))
    }

    async fn load_votes(&self, poll_id: PollId) -> Result<Vec<Vote>> {
        let t = self.tables.lock().await;
        let rec = t.polls.get(&poll_id).ok_or(Error::Poll(PollError::NotFound))?;
        Ok(rec.votes.clone())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<()> {
        self.update(vote.poll_id, |r| r.upsert_vote(vote)).await
    }

    async fn delete_vote(&self, poll_id: PollId, voter: UserId, choice: ChoiceId) -> Result<()> {
        self.update(poll_id, |r| {
            r.delete_vote(voter, choice);
            Ok(())
        })
        .await
    }

    async fn mark_ended(&self, poll_id: PollId, at: DateTime<Utc>) -> Result<()> {
        self.update(poll_id, |r| {
            r.mark_ended(at);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, MessageId},
        poll::model::NewChoice,
    };

    fn msg(id: i32) -> MessageRef {
        MessageRef {
            chat_id: ChatId(42),
            message_id: MessageId(id),
        }
    }

    fn new_poll(message: MessageRef) -> NewPoll {
        NewPoll {
            title: "Tea or coffee".to_string(),
            choices: vec![NewChoice::new("🍵", "tea"), NewChoice::new("☕", "coffee")],
            limit: Some(1),
            hidden: false,
            owner_id: UserId(9),
            message,
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mm-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn memory_store_assigns_ids_and_positions() {
        let store = MemoryPollStore::new();
        let a = store.create_poll(new_poll(msg(1))).await.unwrap();
        let b = store.create_poll(new_poll(msg(2))).await.unwrap();
        assert_eq!(a.id, PollId(1));
        assert_eq!(b.id, PollId(2));
        assert_eq!(
            a.choices.iter().map(|c| c.position).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_ne!(a.choices[0].id, b.choices[0].id);

        let loaded = store.load_poll(msg(2)).await.unwrap().unwrap();
        assert_eq!(loaded, b);
        assert!(store.load_poll(msg(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_poll_per_message() {
        let store = MemoryPollStore::new();
        store.create_poll(new_poll(msg(1))).await.unwrap();
        let err = store.create_poll(new_poll(msg(1))).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPoll(_)));
    }

    #[tokio::test]
    async fn vote_rows_are_unique_and_end_is_first_write_wins() {
        let store = MemoryPollStore::new();
        let poll = store.create_poll(new_poll(msg(1))).await.unwrap();
        let vote = Vote {
            poll_id: poll.id,
            choice_id: poll.choices[0].id,
            voter_id: UserId(3),
            created_at: Utc::now(),
        };
        store.upsert_vote(&vote).await.unwrap();
        store.upsert_vote(&vote).await.unwrap();
        assert_eq!(store.load_votes(poll.id).await.unwrap().len(), 1);

        store
            .delete_vote(poll.id, UserId(3), poll.choices[0].id)
            .await
            .unwrap();
        assert!(store.load_votes(poll.id).await.unwrap().is_empty());

        let first = Utc::now();
        store.mark_ended(poll.id, first).await.unwrap();
        store
            .mark_ended(poll.id, first + chrono::Duration::seconds(5))
            .await
            .unwrap();
        let ended = store.load_poll_by_id(poll.id).await.unwrap().unwrap();
        assert_eq!(ended.ended_at, Some(first));
    }

    #[tokio::test]
    async fn writes_to_unknown_polls_fail() {
        let store = MemoryPollStore::new();
        let err = store.mark_ended(PollId(99), Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Poll(PollError::NotFound)));
    }

    #[tokio::test]
    async fn json_store_survives_reopen() {
        let dir = temp_dir("reopen");
        let poll = {
            let store = JsonPollStore::open(&dir).await.unwrap();
            let poll = store.create_poll(new_poll(msg(5))).await.unwrap();
            store
                .upsert_vote(&Vote {
                    poll_id: poll.id,
                    choice_id: poll.choices[1].id,
                    voter_id: UserId(11),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            store.mark_ended(poll.id, Utc::now()).await.unwrap();
            poll
        };

        let store = JsonPollStore::open(&dir).await.unwrap();
        let loaded = store.load_poll(msg(5)).await.unwrap().unwrap();
        assert_eq!(loaded.id, poll.id);
        assert!(loaded.is_ended());
        let votes = store.load_votes(poll.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice_id, poll.choices[1].id);

        // Ids keep counting after a reopen.
        let next = store.create_poll(new_poll(msg(6))).await.unwrap();
        assert!(next.id.0 > poll.id.0);
        assert!(next.choices[0].id.0 > poll.choices[1].id.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn json_store_keeps_memory_unchanged_when_a_write_fails() {
        let dir = temp_dir("unwritable");
        let store = JsonPollStore::open(&dir).await.unwrap();
        let poll = store.create_poll(new_poll(msg(8))).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let vote = Vote {
            poll_id: poll.id,
            choice_id: poll.choices[0].id,
            voter_id: UserId(4),
            created_at: Utc::now(),
        };
        assert!(store.upsert_vote(&vote).await.is_err());
        assert!(store.load_votes(poll.id).await.unwrap().is_empty());

        assert!(store.mark_ended(poll.id, Utc::now()).await.is_err());
        let loaded = store.load_poll_by_id(poll.id).await.unwrap().unwrap();
        assert!(!loaded.is_ended());

        // Once the directory is back the same writes go through.
        std::fs::create_dir_all(&dir).unwrap();
        store.upsert_vote(&vote).await.unwrap();
        store.mark_ended(poll.id, Utc::now()).await.unwrap();
        assert_eq!(store.load_votes(poll.id).await.unwrap().len(), 1);
        assert!(store.load_poll_by_id(poll.id).await.unwrap().unwrap().is_ended());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn json_store_skips_garbage_files() {
        let dir = temp_dir("garbage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("poll-1.json"), "{not json").unwrap();
        std::fs::write(dir.join("notes.txt"), "hello").unwrap();

        let store = JsonPollStore::open(&dir).await.unwrap();
        assert!(store.load_poll_by_id(PollId(1)).await.unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
