use async_trait::async_trait;
use mockprep_core::notify::Notifier;
use mockprep_core::{CoreError, CoreResult};
use mockprep_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BOOKING_CANCELLED_TOPIC, BOOKING_CONFIRMED_TOPIC,
};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Publishes booking events keyed by booking id.
pub struct KafkaNotifier {
    producer: EventProducer,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }

    async fn send<T: serde::Serialize>(&self, topic: &str, key: &str, event: &T) -> CoreResult<()> {
        let payload = serde_json::to_string(event).map_err(|e| CoreError::Storage(e.to_string()))?;
        self.producer
            .publish(topic, key, &payload)
            .await
            .map_err(|e| CoreError::Storage(format!("kafka: {}", e)))
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> CoreResult<()> {
        self.send(BOOKING_CONFIRMED_TOPIC, &event.booking_id.to_string(), event).await
    }

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> CoreResult<()> {
        self.send(BOOKING_CANCELLED_TOPIC, &event.booking_id.to_string(), event).await
    }
}
