//! Event bus: a per-project history ring plus live fan-out.
//!
//! Each project gets a topic on its first published event. A topic keeps the
//! most recent `history_limit` events and a list of subscriber queues.
//! Appending to the ring and delivering to subscribers happen under one lock
//! acquisition, which is what gives every subscriber a gap-free,
//! duplicate-free view: the history copy handed out by `subscribe` and the
//! live queue registration are taken at the same instant.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ProjectEvent;
use crate::errors::ProjectError;

/// Sending half of one subscriber queue.
enum SubscriberQueue {
    Unbounded(mpsc::UnboundedSender<ProjectEvent>),
    Bounded(mpsc::Sender<ProjectEvent>),
}

struct Subscriber {
    id: u64,
    queue: SubscriberQueue,
}

impl Subscriber {
    /// Hand the event to the queue without waiting. Returns `false` when the
    /// subscriber should be dropped from the topic.
    fn deliver(&self, event: &ProjectEvent) -> bool {
        match &self.queue {
            SubscriberQueue::Unbounded(tx) => tx.send(event.clone()).is_ok(),
            SubscriberQueue::Bounded(tx) => match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        project_id = %event.project_id,
                        subscriber_id = self.id,
                        "Subscriber queue full, disconnecting slow consumer"
                    );
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

#[derive(Default)]
struct Topic {
    history: VecDeque<ProjectEvent>,
    subscribers: Vec<Subscriber>,
}

/// Receiving half handed to an observer. Yields `None` once the bus drops
/// the subscription (unsubscribe, slow-consumer disconnect, or shutdown).
pub enum EventReceiver {
    Unbounded(mpsc::UnboundedReceiver<ProjectEvent>),
    Bounded(mpsc::Receiver<ProjectEvent>),
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ProjectEvent> {
        match self {
            EventReceiver::Unbounded(rx) => rx.recv().await,
            EventReceiver::Bounded(rx) => rx.recv().await,
        }
    }

    /// Non-blocking receive; `None` when nothing is queued right now.
    pub fn try_recv(&mut self) -> Option<ProjectEvent> {
        match self {
            EventReceiver::Unbounded(rx) => rx.try_recv().ok(),
            EventReceiver::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// A registered observer: the history as of registration plus a live queue.
pub struct Subscription {
    pub id: u64,
    pub project_id: String,
    pub history: Vec<ProjectEvent>,
    pub receiver: EventReceiver,
}

/// In-memory pub/sub keyed by project id.
pub struct EventBus {
    topics: Mutex<HashMap<String, Topic>>,
    history_limit: usize,
    subscriber_capacity: Option<usize>,
    next_subscriber_id: AtomicU64,
}

impl EventBus {
    /// `history_limit` is clamped to at least 1. `subscriber_capacity` of
    /// `None` gives unbounded subscriber queues.
    pub fn new(history_limit: usize, subscriber_capacity: Option<usize>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            history_limit: history_limit.max(1),
            subscriber_capacity: subscriber_capacity.map(|c| c.max(1)),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the project's history and deliver to every live subscriber.
    ///
    /// Delivery runs while the bus lock is held instead of on a copied
    /// subscriber list after release. Every send is non-blocking (unbounded
    /// `send` or bounded `try_send`), so holding the lock never waits on a
    /// consumer, and a full bounded queue drops its subscriber.
    pub fn publish(&self, event: ProjectEvent) {
        let mut topics = self.topics();
        let topic = topics.entry(event.project_id.clone()).or_default();

        topic.history.push_back(event.clone());
        while topic.history.len() > self.history_limit {
            topic.history.pop_front();
        }

        let before = topic.subscribers.len();
        topic.subscribers.retain(|sub| sub.deliver(&event));
        let pruned = before - topic.subscribers.len();

        debug!(
            project_id = %event.project_id,
            kind = %event.kind,
            subscribers = topic.subscribers.len(),
            pruned,
            "Published event"
        );
    }

    /// Register a new observer for `project_id`.
    pub fn subscribe(&self, project_id: &str) -> Result<Subscription, ProjectError> {
        let mut topics = self.topics();
        let topic = topics
            .get_mut(project_id)
            .ok_or_else(|| ProjectError::not_found(project_id))?;

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (queue, receiver) = match self.subscriber_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (SubscriberQueue::Bounded(tx), EventReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (SubscriberQueue::Unbounded(tx), EventReceiver::Unbounded(rx))
            }
        };
        topic.subscribers.push(Subscriber { id, queue });

        debug!(project_id = %project_id, subscriber_id = id, "Subscriber registered");
        Ok(Subscription {
            id,
            project_id: project_id.to_string(),
            history: topic.history.iter().cloned().collect(),
            receiver,
        })
    }

    /// Remove a subscriber. Unknown projects and ids are ignored.
    pub fn unsubscribe(&self, project_id: &str, subscriber_id: u64) {
        if let Some(topic) = self.topics().get_mut(project_id) {
            topic.subscribers.retain(|sub| sub.id != subscriber_id);
        }
    }

    pub fn history(&self, project_id: &str) -> Vec<ProjectEvent> {
        self.topics()
            .get(project_id)
            .map(|topic| topic.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.topics()
            .get(project_id)
            .map_or(0, |topic| topic.subscribers.len())
    }

    /// Drop one project's topic; its subscribers see end-of-stream.
    pub fn forget(&self, project_id: &str) {
        self.topics().remove(project_id);
    }

    pub fn clear(&self) {
        self.topics().clear();
    }
}
