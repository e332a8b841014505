//! BroadcastHub - per-task publish/subscribe fan-out.
//!
//! - `RwLock<HashMap>` registry keyed by task id. Publishing only takes the
//!   read lock; register, unregister and pruning take the write lock.
//! - Each observer owns a bounded `tokio::sync::mpsc` queue. Sends use
//!   `try_send`, so a full queue drops the message for that observer and the
//!   publisher never waits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use prism_models::{Progress, TaskId};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::message::Message;

/// Identifies one observer within the hub.
pub type ObserverId = u64;

type Registry = HashMap<TaskId, HashMap<ObserverId, mpsc::Sender<String>>>;

/// The receiving side handed to an observer by [`BroadcastHub::register`].
#[derive(Debug)]
pub struct Subscription {
    pub id: ObserverId,
    pub task_id: TaskId,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    /// Waits for the next serialized message. `None` once unregistered.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Waits for the next message and decodes it.
    /// Undecodable payloads are skipped.
    pub async fn recv_message(&mut self) -> Option<Message> {
        while let Some(raw) = self.receiver.recv().await {
            match serde_json::from_str(&raw) {
                Ok(message) => return Some(message),
                Err(e) => debug!(error = %e, "Skipping undecodable hub message"),
            }
        }
        None
    }

    /// Returns a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Fans out execution events to observers registered per task.
pub struct BroadcastHub {
    config: HubConfig,
    observers: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl BroadcastHub {
    /// Creates a hub. A zero capacity is raised to one.
    pub fn new(config: HubConfig) -> Self {
        let config = HubConfig {
            capacity: config.capacity.max(1),
        };
        Self {
            config,
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds an observer for `task_id`.
    pub fn register(&self, task_id: &TaskId) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.observers
            .write()
            .map_err(|e| HubError::LockPoisoned(e.to_string()))?
            .entry(task_id.clone())
            .or_default()
            .insert(id, tx);

        debug!(task_id = %task_id, observer = id, "Observer registered");
        Ok(Subscription {
            id,
            task_id: task_id.clone(),
            receiver: rx,
        })
    }

    /// Removes an observer. Removing the last one drops the task key.
    /// Returns false if it was not registered.
    pub fn unregister(&self, task_id: &TaskId, id: ObserverId) -> Result<bool> {
        let mut observers = self
            .observers
            .write()
            .map_err(|e| HubError::LockPoisoned(e.to_string()))?;

        let Some(set) = observers.get_mut(task_id) else {
            return Ok(false);
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            observers.remove(task_id);
        }
        if removed {
            debug!(task_id = %task_id, observer = id, "Observer unregistered");
        }
        Ok(removed)
    }

    /// Delivers `message` to every observer of `task_id`.
    ///
    /// Returns the number of observers that accepted it. Observers with a
    /// full queue miss this message; observers whose receiver is gone are
    /// removed.
    pub fn broadcast(&self, task_id: &TaskId, message: &Message) -> Result<usize> {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let observers = self
                .observers
                .read()
                .map_err(|e| HubError::LockPoisoned(e.to_string()))?;
            let Some(set) = observers.get(task_id) else {
                return Ok(0);
            };
            let payload = message.to_json()?;

            for (id, tx) in set {
                match tx.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(task_id = %task_id, observer = id, "Observer queue full; dropping message");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            self.prune(task_id, &closed)?;
        }
        trace!(task_id = %task_id, kind = ?message.kind, delivered, "Broadcast");
        Ok(delivered)
    }

    fn prune(&self, task_id: &TaskId, ids: &[ObserverId]) -> Result<()> {
        let mut observers = self
            .observers
            .write()
            .map_err(|e| HubError::LockPoisoned(e.to_string()))?;
        if let Some(set) = observers.get_mut(task_id) {
            for id in ids {
                set.remove(id);
            }
            if set.is_empty() {
                observers.remove(task_id);
            }
        }
        debug!(task_id = %task_id, pruned = ids.len(), "Pruned closed observers");
        Ok(())
    }

    fn send(&self, task_id: &TaskId, message: Message) -> usize {
        match self.broadcast(task_id, &message) {
            Ok(n) => n,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Broadcast failed");
                0
            }
        }
    }

    pub fn send_log(&self, task_id: &TaskId, line: impl Into<String>) -> usize {
        self.send(task_id, Message::log(task_id.clone(), line))
    }

    pub fn send_progress(&self, task_id: &TaskId, progress: &Progress) -> usize {
        self.send(task_id, Message::progress(task_id.clone(), progress))
    }

    pub fn send_complete(&self, task_id: &TaskId, success: bool, result: Value) -> usize {
        self.send(task_id, Message::complete(task_id.clone(), success, result))
    }

    pub fn send_error(&self, task_id: &TaskId, error: impl Into<String>) -> usize {
        self.send(task_id, Message::error(task_id.clone(), error))
    }

    /// Number of observers registered for `task_id`.
    pub fn observer_count(&self, task_id: &TaskId) -> usize {
        self.observers
            .read()
            .map(|o| o.get(task_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    /// Number of task keys with at least one observer.
    pub fn task_count(&self) -> usize {
        self.observers.read().map(|o| o.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delivery_is_scoped_to_task() {
        let hub = BroadcastHub::default();
        let t1 = TaskId::from("T1");
        let t2 = TaskId::from("T2");

        let mut a = hub.register(&t1).unwrap();
        let mut b = hub.register(&t1).unwrap();
        let mut other = hub.register(&t2).unwrap();

        assert_eq!(hub.send_log(&t1, "hello"), 2);

        for sub in [&mut a, &mut b] {
            let msg = sub.recv_message().await.unwrap();
            assert_eq!(msg.kind, MessageType::Log);
            assert_eq!(msg.task_id, t1);
            assert_eq!(msg.data, "hello");
        }
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let hub = BroadcastHub::new(HubConfig::new().with_capacity(2));
        let task = TaskId::from("T");
        let mut slow = hub.register(&task).unwrap();

        assert_eq!(hub.send_log(&task, "1"), 1);
        assert_eq!(hub.send_log(&task, "2"), 1);
        assert_eq!(hub.send_log(&task, "3"), 0);

        assert_eq!(slow.recv_message().await.unwrap().data, "1");
        assert_eq!(slow.recv_message().await.unwrap().data, "2");
        assert!(slow.try_recv().is_none());
        // Still registered after a drop.
        assert_eq!(hub.observer_count(&task), 1);
    }

    #[tokio::test]
    async fn test_slow_observer_does_not_starve_others() {
        let hub = BroadcastHub::new(HubConfig::new().with_capacity(1));
        let task = TaskId::from("T");
        let _slow = hub.register(&task).unwrap();
        let mut fast = hub.register(&task).unwrap();

        hub.send_log(&task, "a");
        assert_eq!(fast.recv_message().await.unwrap().data, "a");
        hub.send_log(&task, "b");
        assert_eq!(fast.recv_message().await.unwrap().data, "b");
    }

    #[test]
    fn test_unregister_last_drops_key() {
        let hub = BroadcastHub::default();
        let task = TaskId::from("T");
        let a = hub.register(&task).unwrap();
        let b = hub.register(&task).unwrap();
        assert_eq!(hub.task_count(), 1);

        assert!(hub.unregister(&task, a.id).unwrap());
        assert_eq!(hub.observer_count(&task), 1);
        assert!(hub.unregister(&task, b.id).unwrap());
        assert_eq!(hub.task_count(), 0);
        assert!(!hub.unregister(&task, b.id).unwrap());
    }

    #[test]
    fn test_closed_observers_are_pruned() {
        let hub = BroadcastHub::default();
        let task = TaskId::from("T");
        let dropped = hub.register(&task).unwrap();
        let _kept = hub.register(&task).unwrap();
        drop(dropped);

        assert_eq!(hub.send_log(&task, "x"), 1);
        assert_eq!(hub.observer_count(&task), 1);
    }

    #[test]
    fn test_broadcast_without_observers() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.send_error(&TaskId::from("nobody"), "boom"), 0);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let hub = BroadcastHub::default();
        let task = TaskId::from("T");
        let mut sub = hub.register(&task).unwrap();

        hub.send_progress(&task, &Progress::new("init", 10, "Initializing"));
        hub.send_complete(&task, true, serde_json::json!({"id": "i-123"}));
        hub.send_error(&task, "terraform apply failed");

        let progress = sub.recv_message().await.unwrap();
        assert_eq!(progress.kind, MessageType::Progress);
        assert_eq!(progress.data["percent"], 10);

        let complete = sub.recv_message().await.unwrap();
        assert_eq!(complete.kind, MessageType::Complete);
        assert_eq!(complete.data["success"], true);
        assert_eq!(complete.data["result"]["id"], "i-123");

        let error = sub.recv_message().await.unwrap();
        assert_eq!(error.kind, MessageType::Error);
    }

    #[tokio::test]
    async fn test_order_preserved_per_task() {
        let hub = Arc::new(BroadcastHub::default());
        let task = TaskId::from("T");
        let mut sub = hub.register(&task).unwrap();

        for n in 0..50 {
            hub.send_log(&task, n.to_string());
        }
        for n in 0..50 {
            assert_eq!(sub.recv_message().await.unwrap().data, n.to_string());
        }
    }
}
