// SPDX-License-Identifier: MIT OR Apache-2.0
//! Instance event channel.

use crate::error::InstanceError;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// Events published by an instance.
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    /// An OS-level process error. May fire any number of times.
    Error(Arc<InstanceError>),
    /// The instance has stopped. Fires at most once.
    ///
    /// Also fires right after the spawn-failure `Error`, so waiters and
    /// temp-dir cleanup complete even when no process ever ran.
    Stop,
}

impl InstanceEvent {
    /// Event name (`"error"` or `"stop"`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Stop => "stop",
        }
    }

    /// Returns `true` for [`InstanceEvent::Stop`].
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Boxed stream of [`InstanceEvent`]s.
pub type EventStream = Pin<Box<dyn Stream<Item = InstanceEvent> + Send>>;

const EVENT_CAPACITY: usize = 64;

/// Fan-out channel with subscribe/emit semantics.
///
/// Subscribers only see events emitted after they subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InstanceEvent>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish `event` to every current subscriber.
    pub fn emit(&self, event: InstanceEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    /// Raw receiver for future events.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.tx.subscribe()
    }

    /// Future events as a stream. Lagged gaps are logged and skipped.
    pub fn stream(&self) -> EventStream {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(target: "bi.instance", "event subscriber lagged: {e}");
                None
            }
        });
        Box::pin(stream)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
