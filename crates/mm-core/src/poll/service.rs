//! Application operations behind the `poll` commands.

use std::sync::Arc;

use crate::{
    config::PollSettings,
    domain::{ChatId, MessageId, MessageRef, PollId, UserId},
    errors::PollError,
    messaging::port::MessagingPort,
    poll::{
        command::PollRequest,
        controller::VoteOutcome,
        model::{NewPoll, Poll},
        router::{ReactionEvent, ReactionRouter},
        state::PollSnapshot,
        store::PollStore,
        tally::{tally, Tally},
    },
    render, Result,
};

/// Counted votes of one poll, open or ended.
#[derive(Clone, Debug)]
pub struct PollResult {
    pub poll: Arc<Poll>,
    pub tally: Tally,
}

impl PollResult {
    pub fn to_html(&self) -> String {
        render::result_html(&self.poll, &self.tally)
    }
}

#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn PollStore>,
    messenger: Arc<dyn MessagingPort>,
    router: ReactionRouter,
    settings: PollSettings,
}

impl PollService {
    pub fn new(
        store: Arc<dyn PollStore>,
        messenger: Arc<dyn MessagingPort>,
        settings: PollSettings,
    ) -> Self {
        let router = ReactionRouter::new(store.clone(), messenger.clone(), settings);
        Self::with_router(store, messenger, router, settings)
    }

    pub fn with_router(
        store: Arc<dyn PollStore>,
        messenger: Arc<dyn MessagingPort>,
        router: ReactionRouter,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            messenger,
            router,
            settings,
        }
    }

    pub fn router(&self) -> &ReactionRouter {
        &self.router
    }

    /// Post a new poll in `chat`.
    ///
    /// The poll is keyed by its own message, so a placeholder goes out first
    /// and is then replaced by the rendered poll.
    pub async fn create_poll(&self, chat: ChatId, owner: UserId, req: PollRequest) -> Result<Poll> {
        let mut new = NewPoll {
            title: req.title,
            choices: req.choices,
            limit: req.limit,
            hidden: req.hidden,
            owner_id: owner,
            message: MessageRef {
                chat_id: chat,
                message_id: MessageId(0),
            },
        };
        new.validate()?;

        let transport = self.settings.transport_retry;
        let messenger = &self.messenger;
        let placeholder = render::pending_poll_html();
        // Not retried: a timed-out send may still have posted the message.
        new.message = messenger.send_html(chat, &placeholder).await?;

        let store = &self.store;
        let created = self
            .settings
            .store_retry
            .run("create poll", || store.create_poll(new.clone()))
            .await;
        let poll = match created {
            Ok(poll) => poll,
            Err(e) => {
                tracing::error!(chat = chat.0, error = %e, "poll creation failed");
                let html = "⚠️ Could not create the poll. Please try again.";
                if let Err(edit_err) = messenger.edit_html(new.message, html, None).await {
                    tracing::warn!(error = %edit_err, "could not report poll creation failure");
                }
                return Err(e);
            }
        };

        self.router.register(poll.clone()).await;

        let snapshot = PollSnapshot {
            poll: Arc::new(poll.clone()),
            counts: vec![0; poll.choices.len()],
        };
        let html = render::poll_message_html(&snapshot);
        let keyboard = messenger
            .capabilities()
            .supports_inline_keyboards
            .then(|| render::poll_keyboard(&poll));
        if let Err(e) = transport
            .run("render new poll", || {
                messenger.edit_html(poll.message, &html, keyboard.as_ref())
            })
            .await
        {
            // The first vote renders the message again.
            tracing::warn!(poll_id = %poll.id, error = %e, "initial poll render failed");
        }

        tracing::info!(
            poll_id = %poll.id,
            chat = chat.0,
            owner = owner.0,
            choices = poll.choices.len(),
            limit = ?poll.limit,
            hidden = poll.hidden,
            "poll created"
        );
        Ok(poll)
    }

    /// End a poll on behalf of `requester`. Only the owner may end it.
    pub async fn end_poll(&self, id: PollId, requester: UserId) -> Result<Arc<Poll>> {
        let poll = self.find(id).await?;
        if poll.owner_id != requester {
            return Err(PollError::NotOwner.into());
        }
        Ok(self.router.end(poll.message).await?)
    }

    /// Current counts of a poll. Ended polls count the votes cast before the end.
    pub async fn result(&self, id: PollId) -> Result<PollResult> {
        let poll = self.find(id).await?;
        let snapshot = self.router.snapshot(poll.message).await?;
        Ok(PollResult {
            tally: tally(&snapshot),
            poll: snapshot.poll,
        })
    }

    pub async fn dispatch(&self, ev: ReactionEvent) -> std::result::Result<VoteOutcome, PollError> {
        self.router.dispatch(ev).await
    }

    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }

    async fn find(&self, id: PollId) -> Result<Poll> {
        let store = &self.store;
        self.settings
            .store_retry
            .run("load poll by id", || store.load_poll_by_id(id))
            .await?
            .ok_or_else(|| PollError::NotFound.into())
    }
}
