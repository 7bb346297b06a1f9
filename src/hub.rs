//! Fan-out of live messages to subscribers.
//!
//! One task owns the subscriber set. Handles talk to it through a bounded
//! command queue, so membership changes and publishes are applied in the
//! order they were sent. Delivery to a subscriber never waits: a subscriber
//! whose queue is full is dropped and its channel closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::LiveMessage;

pub type SubscriberId = u64;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("broadcast hub stopped")]
    Stopped,
}

enum HubCommand {
    Subscribe {
        id: SubscriberId,
        sender: mpsc::Sender<Arc<LiveMessage>>,
    },
    Unsubscribe(SubscriberId),
    Publish(Arc<LiveMessage>),
}

/// Receiving end of one subscriber. Yields `None` once the hub dropped it.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<LiveMessage>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<LiveMessage>> {
        self.receiver.recv().await
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
    subscriber_count: Arc<AtomicUsize>,
    subscriber_buffer: usize,
}

impl HubHandle {
    pub async fn subscribe(&self) -> Result<Subscription, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.subscriber_buffer);

        self.commands
            .send(HubCommand::Subscribe { id, sender })
            .await
            .map_err(|_| HubError::Stopped)?;

        Ok(Subscription { id, receiver })
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Unsubscribe(id))
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Queues `message` for every current subscriber. Only waits for room in
    /// the hub's own queue, never for a subscriber.
    pub async fn publish(&self, message: LiveMessage) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Publish(Arc::new(message)))
            .await
            .map_err(|_| HubError::Stopped)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    pub(crate) fn subscriber_counter(&self) -> Arc<AtomicUsize> {
        self.subscriber_count.clone()
    }
}

pub struct BroadcastHub {
    commands: mpsc::Receiver<HubCommand>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<LiveMessage>>>,
    subscriber_count: Arc<AtomicUsize>,
}

impl BroadcastHub {
    /// Starts the hub task. It stops when `cancel` fires or every handle is
    /// dropped.
    pub fn spawn(queue: usize, subscriber_buffer: usize, cancel: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(queue);
        let subscriber_count = Arc::new(AtomicUsize::new(0));

        let hub = BroadcastHub {
            commands: commands_rx,
            subscribers: HashMap::new(),
            subscriber_count: subscriber_count.clone(),
        };
        let handle = HubHandle {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            subscriber_count,
            subscriber_buffer,
        };

        (handle, tokio::spawn(hub.run(cancel)))
    }

    async fn run(mut self, cancel: CancellationToken) {
        log::info!("broadcast hub started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.subscribers.clear();
        self.subscriber_count.store(0, Ordering::Relaxed);
        log::info!("broadcast hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Subscribe { id, sender } => {
                self.subscribers.insert(id, sender);
                log::debug!("subscriber {} joined, {} connected", id, self.subscribers.len());
            }
            HubCommand::Unsubscribe(id) => {
                if self.subscribers.remove(&id).is_some() {
                    log::debug!("subscriber {} left, {} connected", id, self.subscribers.len());
                }
            }
            HubCommand::Publish(message) => {
                self.subscribers.retain(|id, sender| match sender.try_send(message.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        log::warn!("subscriber {} is not keeping up, disconnecting it", id);
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::debug!("subscriber {} went away", id);
                        false
                    }
                });
            }
        }

        self.subscriber_count.store(self.subscribers.len(), Ordering::Relaxed);
    }
}
