// crates/vigil-daemon/src/events.rs
//
// Availability event fan-out.
//
// The loops publish engine events on a tokio broadcast channel. The daemon
// subscribes one consumer that writes them to the log as structured JSON;
// notification collaborators subscribe the same way.

use tokio::sync::broadcast;

use vigil_core::{AvailabilityEvent, AvailabilityEventKind};

/// Capacity of the broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Publish events. Returns how many were delivered to at least one receiver.
pub fn publish(tx: &broadcast::Sender<AvailabilityEvent>, events: Vec<AvailabilityEvent>) -> usize {
    let mut delivered = 0;
    for event in events {
        match tx.send(event) {
            Ok(_) => delivered += 1,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!("No subscribers for event on {}", event.validator);
            }
        }
    }
    delivered
}

/// Log every received event until the channel closes.
pub async fn run_event_logger(mut rx: broadcast::Receiver<AvailabilityEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let payload = serde_json::to_string(&event)
                    .unwrap_or_else(|e| format!("<unserializable event: {}>", e));
                match event.kind() {
                    AvailabilityEventKind::Verdict => tracing::info!(target: "vigil::events", "{}", payload),
                    AvailabilityEventKind::Transition => tracing::debug!(target: "vigil::events", "{}", payload),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Event logger lagged; {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{EpochStatus, EventDetail, ValidatorKey};

    fn verdict(epoch: u64) -> AvailabilityEvent {
        AvailabilityEvent {
            validator: ValidatorKey::from("hmpA"),
            epoch,
            phrase: 1,
            detail: EventDetail::Verdict {
                status: EpochStatus::Pass,
                inactive_seconds: 0,
                threshold_seconds: 7200,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        assert_eq!(publish(&tx, vec![verdict(1), verdict(2)]), 2);
        assert_eq!(rx.recv().await.unwrap().epoch, 1);
        assert_eq!(rx.recv().await.unwrap().epoch, 2);
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let (tx, rx) = broadcast::channel::<AvailabilityEvent>(4);
        drop(rx);
        assert_eq!(publish(&tx, vec![verdict(1)]), 0);
    }

    #[tokio::test]
    async fn test_logger_stops_when_channel_closes() {
        let (tx, rx) = broadcast::channel(4);
        let handle = tokio::spawn(run_event_logger(rx));
        publish(&tx, vec![verdict(1)]);
        drop(tx);
        handle.await.unwrap();
    }
}
