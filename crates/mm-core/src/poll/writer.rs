//! Per-poll write-behind queue.
//!
//! The controller never awaits storage on the vote path. Writes are queued
//! here and applied strictly in submission order, so an add followed by a
//! remove can never land on disk the other way round.
//!
//! A write that still fails after its retries stays at the head of a backlog.
//! Later writes queue behind it and every new operation replays the backlog
//! first, so order holds even across storage outages.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    domain::{ChoiceId, PollId, UserId},
    poll::{model::Vote, store::PollStore},
    retry::RetryPolicy,
    Error, Result,
};

enum WriteOp {
    Write(PendingWrite),
    MarkEnded {
        poll_id: PollId,
        at: DateTime<Utc>,
        ack: oneshot::Sender<Result<()>>,
    },
    Flush(oneshot::Sender<usize>),
}

enum PendingWrite {
    Upsert(Vote),
    Delete {
        poll_id: PollId,
        voter: UserId,
        choice: ChoiceId,
    },
}

pub(crate) struct StoreWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    task: JoinHandle<()>,
}

impl StoreWriter {
    pub(crate) fn spawn(store: Arc<dyn PollStore>, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(rx, store, retry));
        Self { tx, task }
    }

    pub(crate) fn upsert(&self, vote: Vote) {
        self.submit(WriteOp::Write(PendingWrite::Upsert(vote)));
    }

    pub(crate) fn delete(&self, poll_id: PollId, voter: UserId, choice: ChoiceId) {
        self.submit(WriteOp::Write(PendingWrite::Delete {
            poll_id,
            voter,
            choice,
        }));
    }

    /// Queue the end marker and wait until it, and every write before it, is stored.
    pub(crate) async fn mark_ended(&self, poll_id: PollId, at: DateTime<Utc>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.submit(WriteOp::MarkEnded { poll_id, at, ack });
        done.await
            .unwrap_or_else(|_| Err(Error::External("store writer stopped".to_string())))
    }

    /// Replay the backlog and wait for everything queued so far. Returns the
    /// number of writes that are still not stored.
    pub(crate) async fn flush(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.submit(WriteOp::Flush(tx));
        rx.await.unwrap_or(usize::MAX)
    }

    pub(crate) async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "store writer panicked");
        }
    }

    fn submit(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            tracing::error!("store writer is gone; write dropped");
        }
    }
}

async fn apply(store: &Arc<dyn PollStore>, retry: RetryPolicy, write: &PendingWrite) -> Result<()> {
    match write {
        PendingWrite::Upsert(vote) => retry.run("upsert vote", || store.upsert_vote(vote)).await,
        PendingWrite::Delete {
            poll_id,
            voter,
            choice,
        } => {
            retry
                .run("delete vote", || store.delete_vote(*poll_id, *voter, *choice))
                .await
        }
    }
}

/// Apply the backlog in order, stopping at the first write that fails.
/// Returns true once the backlog is empty.
async fn drain(
    store: &Arc<dyn PollStore>,
    retry: RetryPolicy,
    backlog: &mut VecDeque<PendingWrite>,
) -> bool {
    while let Some(write) = backlog.front() {
        if let Err(e) = apply(store, retry, write).await {
            let (poll_id, voter) = match write {
                PendingWrite::Upsert(v) => (v.poll_id, v.voter_id),
                PendingWrite::Delete { poll_id, voter, .. } => (*poll_id, *voter),
            };
            tracing::error!(
                %poll_id,
                voter = voter.0,
                pending = backlog.len(),
                error = %e,
                "persistence failure: writes held in memory until storage recovers"
            );
            return false;
        }
        backlog.pop_front();
    }
    true
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    store: Arc<dyn PollStore>,
    retry: RetryPolicy,
) {
    let mut backlog = VecDeque::new();
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Write(write) => {
                backlog.push_back(write);
                drain(&store, retry, &mut backlog).await;
            }
            WriteOp::MarkEnded { poll_id, at, ack } => {
                let res = if drain(&store, retry, &mut backlog).await {
                    retry.run("mark ended", || store.mark_ended(poll_id, at)).await
                } else {
                    Err(Error::External(format!(
                        "{} earlier writes are not stored yet",
                        backlog.len()
                    )))
                };
                let _ = ack.send(res);
            }
            WriteOp::Flush(done) => {
                drain(&store, retry, &mut backlog).await;
                let _ = done.send(backlog.len());
            }
        }
    }

    if !backlog.is_empty() && !drain(&store, retry, &mut backlog).await {
        tracing::error!(pending = backlog.len(), "writer stopped with unstored writes");
    }
}
