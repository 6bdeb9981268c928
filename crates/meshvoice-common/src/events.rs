use tokio::sync::broadcast;

/// Fan-out channel for observable state changes.
///
/// Publishing never waits on subscribers; a lagging subscriber loses the
/// oldest events instead of stalling the publisher.
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
