/// Event publication for notification intents and security signals
use crate::config::NotificationSettings;
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use event_schema::{AuthEvent, EventEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Event bus collaborator. At-least-once delivery is acceptable.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope<AuthEvent>) -> Result<()>;
}

/// Publisher that forwards envelopes into a tokio channel.
///
/// The receiving half is handed to whatever relays events to the real bus;
/// tests read it directly.
#[derive(Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<EventEnvelope<AuthEvent>>,
}

impl ChannelEventPublisher {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<EventEnvelope<AuthEvent>>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, envelope: EventEnvelope<AuthEvent>) -> Result<()> {
        self.sender
            .send(envelope)
            .await
            .map_err(|_| AuthError::Internal("event channel closed".to_string()))
    }
}

/// Fire-and-forget wrapper used by every engine component.
///
/// Each publish is bounded by a timeout; failures are logged and swallowed so a
/// notification problem never changes the outcome of the operation that raised it.
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
    source: String,
    timeout: Duration,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn EventPublisher>, settings: &NotificationSettings) -> Self {
        Self {
            publisher,
            source: settings.source.clone(),
            timeout: settings.publish_timeout(),
        }
    }

    /// Publish `event`; returns whether it was handed off
    pub async fn notify(&self, event: AuthEvent) -> bool {
        let event_type = event.event_type();
        let user_id = event.user_id();
        let envelope = event
            .into_envelope(self.source.as_str())
            .with_correlation_id(Uuid::new_v4());

        match tokio::time::timeout(self.timeout, self.publisher.publish(envelope)).await {
            Ok(Ok(())) => {
                debug!(event_type, user_id = %user_id, "Event published");
                true
            }
            Ok(Err(err)) => {
                warn!(event_type, user_id = %user_id, error = %err, "Failed to publish event");
                false
            }
            Err(_) => {
                warn!(
                    event_type,
                    user_id = %user_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out publishing event"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn settings(timeout_ms: u64) -> NotificationSettings {
        NotificationSettings {
            source: "auth-engine-test".to_string(),
            publish_timeout_ms: timeout_ms,
        }
    }

    fn event() -> AuthEvent {
        AuthEvent::TwoFactorEnabled {
            user_id: Uuid::new_v4(),
            enabled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers_envelope() {
        let (publisher, mut rx) = ChannelEventPublisher::new(8);
        let notifier = Notifier::new(Arc::new(publisher), &settings(500));

        let event = event();
        assert!(notifier.notify(event.clone()).await);

        let envelope = rx.recv().await.expect("envelope delivered");
        assert_eq!(envelope.source, "auth-engine-test");
        assert!(envelope.correlation_id.is_some());
        assert_eq!(envelope.data, event);
    }

    #[tokio::test]
    async fn test_closed_channel_is_swallowed() {
        let (publisher, rx) = ChannelEventPublisher::new(1);
        drop(rx);
        let notifier = Notifier::new(Arc::new(publisher), &settings(500));

        assert!(!notifier.notify(event()).await);
    }

    #[tokio::test]
    async fn test_full_channel_times_out() {
        let (publisher, _rx) = ChannelEventPublisher::new(1);
        let notifier = Notifier::new(Arc::new(publisher), &settings(20));

        assert!(notifier.notify(event()).await);
        // Buffer is full and nobody reads; the bounded publish gives up
        assert!(!notifier.notify(event()).await);
    }
}
