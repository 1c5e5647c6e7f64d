use super::types::ActionEvent;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Synchronous observer of lifecycle events
pub trait ActionObserver: Send + Sync {
    fn on_event(&self, event: &ActionEvent);
}

impl<F> ActionObserver for F
where
    F: Fn(&ActionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ActionEvent) {
        self(event)
    }
}

/// Fans lifecycle events out to registered observers and broadcast subscribers
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ActionEvent>,
    observers: Arc<RwLock<Vec<Arc<dyn ActionObserver>>>>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ActionObserver>) {
        self.observers.write().push(observer);
    }

    /// Notify observers in registration order, then broadcast.
    ///
    /// Observers run on the caller's task; the observer list lock is released before they are
    /// invoked so an observer may register further observers.
    pub fn publish(&self, event: ActionEvent) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_event(&event);
        }

        debug!(
            event = event.name(),
            request_id = %event.request_id(),
            observers = observers.len(),
            "Lifecycle event published"
        );

        // No subscribers is fine; events are still delivered to observers
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("subscribers", &self.subscriber_count())
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSubject;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn cancelled_event() -> ActionEvent {
        ActionEvent::Cancelled {
            subject: EventSubject {
                request_id: Uuid::new_v4(),
                user_id: "user-1".to_string(),
                action_type: "purchase".to_string(),
            },
            while_executing: false,
        }
    }

    #[test]
    fn test_observers_receive_events_in_order() {
        let publisher = EventPublisher::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        publisher.add_observer(Arc::new(move |event: &ActionEvent| {
            first.lock().push(format!("first:{}", event.name()));
        }));
        let second = seen.clone();
        publisher.add_observer(Arc::new(move |event: &ActionEvent| {
            second.lock().push(format!("second:{}", event.name()));
        }));

        publisher.publish(cancelled_event());

        assert_eq!(
            *seen.lock(),
            vec!["first:action.cancelled", "second:action.cancelled"]
        );
    }

    #[tokio::test]
    async fn test_broadcast_subscribers_receive_events() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        let event = cancelled_event();
        publisher.publish(event.clone());

        assert_eq!(receiver.recv().await.unwrap(), event);
    }

    #[test]
    fn test_publish_without_listeners_is_ok() {
        let publisher = EventPublisher::new(4);
        publisher.publish(cancelled_event());
        assert_eq!(publisher.observer_count(), 0);
    }
}
