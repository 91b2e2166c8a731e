//! One task per active poll.
//!
//! The controller owns the poll's [`PollState`] and drains a mailbox of
//! commands one at a time, which is what keeps the limit, hidden and
//! duplicate rules race-free. Storage and transport calls are handed to side
//! tasks so the mailbox never waits on I/O, except for the initial load and
//! the durable end marker.

use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::PollSettings,
    domain::{MessageRef, UserId},
    errors::PollError,
    messaging::port::MessagingPort,
    poll::{
        model::Poll,
        router::Registry,
        state::{PollSnapshot, PollState},
        store::PollStore,
        throttle::{DisplaySink, DisplayThrottler},
        writer::StoreWriter,
    },
    retry::RetryPolicy,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionKind {
    Add,
    Remove,
    /// Button-style transports: remove when held, add otherwise.
    Toggle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    Retracted,
    /// Nothing to do: the vote was already there, or already gone.
    Unchanged,
    /// The event carries no voting intent (unknown message, closed poll,
    /// bot-removed marker on a hidden poll).
    Ignored,
}

pub(crate) enum Command {
    React {
        voter: UserId,
        emoji: String,
        kind: ReactionKind,
        reply: oneshot::Sender<Result<VoteOutcome, PollError>>,
    },
    End {
        reply: oneshot::Sender<Result<Arc<Poll>, PollError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<PollSnapshot, PollError>>,
    },
}

impl Command {
    fn fail(self, err: PollError) {
        match self {
            Command::React { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::End { reply } => {
                let _ = reply.send(Err(err));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Collaborators shared by every controller.
pub(crate) struct ControllerDeps {
    pub(crate) store: Arc<dyn PollStore>,
    pub(crate) messenger: Arc<dyn MessagingPort>,
    pub(crate) sink: Arc<dyn DisplaySink>,
    pub(crate) settings: PollSettings,
}

struct Loaded {
    state: PollState,
    writer: StoreWriter,
    display: DisplayThrottler,
}

impl Loaded {
    fn start(state: PollState, deps: &ControllerDeps) -> Self {
        Self {
            state,
            writer: StoreWriter::spawn(deps.store.clone(), deps.settings.store_retry),
            display: DisplayThrottler::spawn(
                deps.sink.clone(),
                deps.settings.render_debounce,
                deps.settings.transport_retry,
            ),
        }
    }

    async fn close(self) {
        self.writer.close().await;
        self.display.close().await;
    }
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct PollController {
    key: MessageRef,
    instance: u64,
    deps: Arc<ControllerDeps>,
    registry: Arc<Registry>,
    rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    loaded: Option<Loaded>,
}

impl PollController {
    pub(crate) fn new(
        key: MessageRef,
        instance: u64,
        deps: Arc<ControllerDeps>,
        registry: Arc<Registry>,
        rx: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
        preloaded: Option<PollState>,
    ) -> Self {
        let loaded = preloaded.map(|state| Loaded::start(state, &deps));
        Self {
            key,
            instance,
            deps,
            registry,
            rx,
            cancel,
            loaded,
        }
    }

    pub(crate) async fn run(mut self) {
        let idle = self.deps.settings.idle_eviction;
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = timeout(idle, self.rx.recv()) => next,
            };

            match next {
                Ok(Some(cmd)) => {
                    if let Flow::Stop = self.handle(cmd).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    if self.try_evict().await {
                        return;
                    }
                }
            }
        }

        // Shutdown: stop taking new work, finish what is already queued.
        self.deregister().await;
        while let Some(cmd) = self.rx.recv().await {
            if let Flow::Stop = self.handle(cmd).await {
                return;
            }
        }
        self.close().await;
    }

    async fn handle(&mut self, cmd: Command) -> Flow {
        if self.loaded.is_none() {
            match self.load().await {
                Ok(loaded) => self.loaded = Some(loaded),
                Err(PollError::NotFound) => {
                    tracing::debug!(message = self.key.message_id.0, "no poll on message");
                    self.retire(PollError::NotFound).await;
                    cmd.fail(PollError::NotFound);
                    return Flow::Stop;
                }
                Err(e) => {
                    // Stay registered; the next event retries the load.
                    tracing::warn!(message = self.key.message_id.0, error = %e, "poll load failed");
                    cmd.fail(e);
                    return Flow::Continue;
                }
            }
        }
        let Some(loaded) = self.loaded.as_mut() else {
            cmd.fail(PollError::NotFound);
            return Flow::Continue;
        };

        match cmd {
            Command::React {
                voter,
                emoji,
                kind,
                reply,
            } => {
                let res = react(loaded, &self.deps, voter, &emoji, kind);
                let _ = reply.send(res);
            }
            Command::End { reply } => {
                let _ = reply.send(end(loaded).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(loaded.state.snapshot()));
            }
        }
        Flow::Continue
    }

    async fn load(&self) -> Result<Loaded, PollError> {
        let store = &self.deps.store;
        let retry = self.deps.settings.store_retry;
        let key = self.key;

        let poll = retry
            .run("load poll", || store.load_poll(key))
            .await?
            .ok_or(PollError::NotFound)?;
        let votes = retry.run("load votes", || store.load_votes(poll.id)).await?;

        tracing::debug!(poll_id = %poll.id, votes = votes.len(), "poll loaded");
        Ok(Loaded::start(PollState::new(poll, votes), &self.deps))
    }

    /// Drop out of memory after an idle period. Returns false when new work
    /// showed up in the meantime, or when some votes are not stored yet and
    /// would be lost on reload.
    async fn try_evict(&mut self) -> bool {
        if let Some(loaded) = &self.loaded {
            let pending = loaded.writer.flush().await;
            if pending > 0 {
                tracing::warn!(
                    message = self.key.message_id.0,
                    pending,
                    "keeping idle poll in memory until its writes are stored"
                );
                return false;
            }
        }

        {
            let mut map = self.registry.lock().await;
            if !self.rx.is_empty() {
                return false;
            }
            if map.get(&self.key).is_some_and(|h| h.instance == self.instance) {
                map.remove(&self.key);
            }
            // Senders only push while holding the registry lock, so the
            // mailbox stays empty from here on.
            self.rx.close();
        }

        tracing::debug!(message = self.key.message_id.0, "evicting idle poll controller");
        self.close().await;
        true
    }

    async fn deregister(&mut self) {
        let mut map = self.registry.lock().await;
        if map.get(&self.key).is_some_and(|h| h.instance == self.instance) {
            map.remove(&self.key);
        }
        self.rx.close();
    }

    async fn retire(&mut self, err: PollError) {
        self.deregister().await;
        while let Some(cmd) = self.rx.recv().await {
            cmd.fail(err.clone());
        }
        self.close().await;
    }

    async fn close(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            loaded.close().await;
        }
    }
}

fn react(
    loaded: &mut Loaded,
    deps: &ControllerDeps,
    voter: UserId,
    emoji: &str,
    kind: ReactionKind,
) -> Result<VoteOutcome, PollError> {
    let poll = loaded.state.poll().clone();

    let add = match kind {
        ReactionKind::Add => true,
        ReactionKind::Remove if poll.hidden => {
            // Markers on hidden polls are removed by the bot itself.
            return Ok(VoteOutcome::Ignored);
        }
        ReactionKind::Remove => false,
        ReactionKind::Toggle => !loaded.state.holds(voter, emoji)?,
    };

    if add {
        let res = loaded.state.record_vote(voter, emoji, Utc::now());
        let visible_marker = kind == ReactionKind::Add && poll.hidden;
        return match res {
            Ok(vote) => {
                tracing::debug!(poll_id = %poll.id, voter = voter.0, %emoji, "vote recorded");
                loaded.writer.upsert(vote);
                loaded.display.trigger(loaded.state.snapshot());
                if visible_marker {
                    spawn_retraction(deps, poll.message, voter, emoji);
                }
                Ok(VoteOutcome::Recorded)
            }
            Err(PollError::DuplicateVote) => {
                if visible_marker {
                    spawn_retraction(deps, poll.message, voter, emoji);
                }
                Ok(VoteOutcome::Unchanged)
            }
            Err(e) => Err(e),
        };
    }

    if loaded.state.is_ended() {
        loaded.state.retract_vote(voter, emoji)?;
        return Ok(VoteOutcome::Ignored);
    }
    match loaded.state.retract_vote(voter, emoji)? {
        Some(choice) => {
            tracing::debug!(poll_id = %poll.id, voter = voter.0, %emoji, "vote retracted");
            loaded.writer.delete(poll.id, voter, choice);
            loaded.display.trigger(loaded.state.snapshot());
            Ok(VoteOutcome::Retracted)
        }
        None => Ok(VoteOutcome::Unchanged),
    }
}

async fn end(loaded: &mut Loaded) -> Result<Arc<Poll>, PollError> {
    let at = Utc::now();
    let poll = loaded.state.end(at)?;

    // Every vote accepted so far is queued ahead of the marker.
    if let Err(e) = loaded.writer.mark_ended(poll.id, at).await {
        tracing::error!(poll_id = %poll.id, error = %e, "could not store poll end; poll stays open");
        loaded.state.reopen();
        return Err(PollError::Persistence(e.to_string()));
    }

    tracing::info!(poll_id = %poll.id, "poll ended");
    loaded.display.trigger(loaded.state.snapshot());
    Ok(poll)
}

/// Fire-and-forget removal of a reaction marker. Failure never touches votes.
pub(crate) fn spawn_retraction(deps: &ControllerDeps, message: MessageRef, voter: UserId, emoji: &str) {
    if !deps.messenger.capabilities().supports_reaction_removal {
        tracing::debug!(voter = voter.0, %emoji, "messenger cannot remove reactions; marker stays");
        return;
    }
    let messenger = deps.messenger.clone();
    let retry: RetryPolicy = deps.settings.transport_retry;
    let emoji = emoji.to_string();
    tokio::spawn(async move {
        let res = retry
            .run("retract reaction", || messenger.remove_reaction(message, voter, &emoji))
            .await;
        if let Err(e) = res {
            tracing::warn!(voter = voter.0, %emoji, error = %e, "reaction retraction failed");
        }
    });
}
