//! Reaction routing: one in-memory controller per poll message.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::PollSettings,
    domain::{MessageRef, UserId},
    errors::PollError,
    messaging::port::MessagingPort,
    poll::{
        controller::{
            spawn_retraction, Command, ControllerDeps, PollController, ReactionKind, VoteOutcome,
        },
        model::Poll,
        state::{PollSnapshot, PollState},
        store::PollStore,
        throttle::{DisplaySink, MessengerDisplay},
    },
};

/// A raw reaction as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub message: MessageRef,
    pub emoji: String,
    pub user_id: UserId,
    pub kind: ReactionKind,
}

pub(crate) struct ControllerHandle {
    pub(crate) instance: u64,
    tx: mpsc::UnboundedSender<Command>,
}

/// Message → controller map. The only state shared across polls.
#[derive(Default)]
pub(crate) struct Registry {
    map: Mutex<HashMap<MessageRef, ControllerHandle>>,
}

impl Registry {
    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<MessageRef, ControllerHandle>> {
        self.map.lock().await
    }
}

#[derive(Clone)]
pub struct ReactionRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: Arc<Registry>,
    deps: Arc<ControllerDeps>,
    next_instance: AtomicU64,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ReactionRouter {
    pub fn new(
        store: Arc<dyn PollStore>,
        messenger: Arc<dyn MessagingPort>,
        settings: PollSettings,
    ) -> Self {
        let sink: Arc<dyn DisplaySink> = Arc::new(MessengerDisplay::new(messenger.clone()));
        Self::with_sink(store, messenger, sink, settings)
    }

    /// Like [`ReactionRouter::new`] but renders through a custom sink.
    pub fn with_sink(
        store: Arc<dyn PollStore>,
        messenger: Arc<dyn MessagingPort>,
        sink: Arc<dyn DisplaySink>,
        settings: PollSettings,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry: Arc::new(Registry::default()),
                deps: Arc::new(ControllerDeps {
                    store,
                    messenger,
                    sink,
                    settings,
                }),
                next_instance: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Apply a reaction event to its poll.
    ///
    /// Events for messages without a poll resolve to `Ignored`. Policy
    /// rejections of an `Add` also get their reaction marker removed.
    pub async fn dispatch(&self, ev: ReactionEvent) -> Result<VoteOutcome, PollError> {
        let (reply, rx) = oneshot::channel();
        self.send(
            ev.message,
            Command::React {
                voter: ev.user_id,
                emoji: ev.emoji.clone(),
                kind: ev.kind,
                reply,
            },
        )
        .await?;

        match recv(rx).await {
            Err(PollError::NotFound) => Ok(VoteOutcome::Ignored),
            Err(e) if e.is_rejection() && ev.kind == ReactionKind::Add => {
                tracing::debug!(voter = ev.user_id.0, emoji = %ev.emoji, reason = %e, "vote rejected");
                spawn_retraction(&self.inner.deps, ev.message, ev.user_id, &ev.emoji);
                Err(e)
            }
            other => other,
        }
    }

    /// End the poll on `message`. Ordered after every event already routed.
    pub async fn end(&self, message: MessageRef) -> Result<Arc<Poll>, PollError> {
        let (reply, rx) = oneshot::channel();
        self.send(message, Command::End { reply }).await?;
        recv(rx).await
    }

    pub async fn snapshot(&self, message: MessageRef) -> Result<PollSnapshot, PollError> {
        let (reply, rx) = oneshot::channel();
        self.send(message, Command::Snapshot { reply }).await?;
        recv(rx).await
    }

    /// Hand a freshly created poll to a controller without a store round trip.
    pub async fn register(&self, poll: Poll) {
        let key = poll.message;
        let mut map = self.inner.registry.lock().await;
        if self.inner.cancel.is_cancelled() || map.contains_key(&key) {
            return;
        }
        let handle = self.spawn_controller(key, Some(PollState::new(poll, [])));
        map.insert(key, handle);
    }

    /// Number of controllers currently in memory.
    pub async fn active_polls(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    /// Stop every controller after it has drained its mailbox and pending writes.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("poll controllers stopped");
    }

    async fn send(&self, key: MessageRef, cmd: Command) -> Result<(), PollError> {
        // Enqueue while holding the lock so mailbox order is arrival order.
        let mut map = self.inner.registry.lock().await;
        if self.inner.cancel.is_cancelled() {
            return Err(PollError::ShuttingDown);
        }

        let cmd = match map.get(&key) {
            Some(handle) => match handle.tx.send(cmd) {
                Ok(()) => return Ok(()),
                // The controller retired between lookups; start a fresh one.
                Err(mpsc::error::SendError(cmd)) => {
                    map.remove(&key);
                    cmd
                }
            },
            None => cmd,
        };

        let handle = self.spawn_controller(key, None);
        if handle.tx.send(cmd).is_err() {
            return Err(PollError::Persistence("poll controller failed to start".to_string()));
        }
        map.insert(key, handle);
        Ok(())
    }

    fn spawn_controller(&self, key: MessageRef, preloaded: Option<PollState>) -> ControllerHandle {
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = PollController::new(
            key,
            instance,
            self.inner.deps.clone(),
            self.inner.registry.clone(),
            rx,
            self.inner.cancel.child_token(),
            preloaded,
        );
        self.inner.tasks.spawn(controller.run());
        ControllerHandle { instance, tx }
    }
}

async fn recv<T>(rx: oneshot::Receiver<Result<T, PollError>>) -> Result<T, PollError> {
    rx.await
        .unwrap_or_else(|_| Err(PollError::Persistence("poll controller stopped".to_string())))
}
