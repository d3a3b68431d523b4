//! Publishes canonical events as JSON bytes over a bounded channel.
//!
//! The receiving end is whatever forwards to the real bus; a full channel
//! applies backpressure to the publisher.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::application::ports::{EventPublishError, EventPublisherPort};
use crate::domain::canonical::CanonicalEvent;

/// One serialized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Routing key, `<kind>.<venue>.<symbol|asset>`.
    pub topic: String,
    /// JSON-encoded [`CanonicalEvent`].
    pub payload: Bytes,
}

/// [`EventPublisherPort`] writing [`BusMessage`]s to an mpsc channel.
#[derive(Debug, Clone)]
pub struct SerializedChannelPublisher {
    tx: mpsc::Sender<BusMessage>,
}

impl SerializedChannelPublisher {
    /// Create a publisher and the receiver it feeds.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Wrap an existing sender.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<BusMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventPublisherPort for SerializedChannelPublisher {
    async fn publish_events(&self, events: Vec<CanonicalEvent>) -> Result<(), EventPublishError> {
        for event in events {
            let payload =
                serde_json::to_vec(&event).map_err(|e| EventPublishError::SerializationError {
                    message: e.to_string(),
                })?;
            let message = BusMessage {
                topic: event.topic(),
                payload: Bytes::from(payload),
            };
            self.tx
                .send(message)
                .await
                .map_err(|_| EventPublishError::ConnectionError {
                    message: "bus receiver closed".to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::canonical::{PositionUpdate, Trade};
    use crate::domain::order_execution::OrderSide;
    use crate::domain::shared::Venue;

    fn trade() -> CanonicalEvent {
        CanonicalEvent::Trade(Trade {
            venue: Venue::Deribit,
            symbol: "BTC-PERPETUAL".into(),
            trade_id: "t-1".into(),
            price: 50_000.0,
            qty: 10.0,
            side: Some(OrderSide::Sell),
            timestamp_us: 1_640_995_200_000_000,
        })
    }

    #[tokio::test]
    async fn events_arrive_as_tagged_json_in_order() {
        let (publisher, mut rx) = SerializedChannelPublisher::channel(4);
        let position =
            PositionUpdate::from_signed(Venue::Deribit, "BTC-PERPETUAL", -0.1, 1.0, 0.0, 2)
                .unwrap();
        publisher
            .publish_events(vec![trade(), CanonicalEvent::Position(position)])
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, "trade.deribit.BTC-PERPETUAL");
        let decoded: CanonicalEvent = serde_json::from_slice(&first.payload).unwrap();
        assert_eq!(decoded, trade());
        let json: serde_json::Value = serde_json::from_slice(&first.payload).unwrap();
        assert_eq!(json["type"], "trade");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.topic, "position.deribit.BTC-PERPETUAL");
    }

    #[tokio::test]
    async fn closed_receiver_is_a_connection_error() {
        let (publisher, rx) = SerializedChannelPublisher::channel(1);
        drop(rx);
        let err = publisher.publish_event(trade()).await.unwrap_err();
        assert!(matches!(err, EventPublishError::ConnectionError { .. }));
    }
}
