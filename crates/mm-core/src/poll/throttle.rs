//! Trailing-edge render coalescing for poll messages.
//!
//! Each poll gets one render task. A trigger publishes the newest snapshot on
//! a watch channel; the task waits out the debounce interval, then renders
//! whatever snapshot is newest at that moment. Triggers that land while the
//! task sleeps are absorbed. A trigger that lands during an in-flight render
//! leaves the channel marked changed, which buys exactly one more render.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle, time::sleep};

use crate::{
    messaging::port::MessagingPort,
    poll::state::PollSnapshot,
    render,
    retry::RetryPolicy,
    Result,
};

/// Where rendered snapshots go.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    async fn render(&self, snapshot: &PollSnapshot) -> Result<()>;
}

/// Renders snapshots by editing the poll's own message.
pub struct MessengerDisplay {
    messenger: Arc<dyn MessagingPort>,
}

impl MessengerDisplay {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }
}

#[async_trait]
impl DisplaySink for MessengerDisplay {
    async fn render(&self, snapshot: &PollSnapshot) -> Result<()> {
        let html = render::poll_message_html(snapshot);
        if !self.messenger.capabilities().supports_inline_keyboards {
            return self.messenger.edit_html(snapshot.poll.message, &html, None).await;
        }
        let keyboard = render::poll_keyboard(&snapshot.poll);
        self.messenger
            .edit_html(snapshot.poll.message, &html, Some(&keyboard))
            .await
    }
}

pub struct DisplayThrottler {
    latest: watch::Sender<Option<PollSnapshot>>,
    task: JoinHandle<()>,
}

impl DisplayThrottler {
    pub fn spawn(sink: Arc<dyn DisplaySink>, debounce: Duration, retry: RetryPolicy) -> Self {
        let (latest, rx) = watch::channel(None);
        let task = tokio::spawn(render_loop(rx, sink, debounce, retry));
        Self { latest, task }
    }

    /// Note a state change. Never blocks.
    pub fn trigger(&self, snapshot: PollSnapshot) {
        self.latest.send_replace(Some(snapshot));
    }

    /// Stop accepting triggers and wait for a scheduled render to go out.
    pub async fn close(self) {
        drop(self.latest);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "render task panicked");
        }
    }
}

async fn render_loop(
    mut rx: watch::Receiver<Option<PollSnapshot>>,
    sink: Arc<dyn DisplaySink>,
    debounce: Duration,
    retry: RetryPolicy,
) {
    while rx.changed().await.is_ok() {
        sleep(debounce).await;

        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };

        let poll_id = snapshot.poll.id;
        if let Err(e) = retry.run("render poll", || sink.render(&snapshot)).await {
            tracing::warn!(%poll_id, error = %e, "render failure; poll state unaffected");
        }
    }
}
